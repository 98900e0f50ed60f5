//! Utility to create AFL fuzzing corpus data.
//!
//! Generates a set of representative signal-channel datagrams for the parser
//! fuzz target and writes them into the `fuzz/corpus` directory.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use dots_client::{
    message::{Block, Code, ContentFormat, Message, MessageType, Observe, OptionNumber, Token},
    payload::encode_cbor,
};
use serde_json::json;

const CORPUS_DIR: &str = "fuzz/corpus";

fn token(byte: u8) -> io::Result<Token> { Token::from_bytes(&[byte; 8]).map_err(io::Error::other) }

fn observe_mitigations() -> io::Result<Message> {
    let mut msg = Message::new(MessageType::Confirmable, Code::GET, 1, token(0x11)?);
    msg.set_uint(OptionNumber::OBSERVE, Observe::Register.value());
    msg.set_path("/.well-known/dots/mitigate/cuid=dz6pHjaADkaFTbjr0JGBpw");
    Ok(msg)
}

fn config_response() -> io::Result<Message> {
    let body = json!({
        "ietf-dots-signal-channel:signal-config": {
            "idle-config": {
                "heartbeat-interval": { "current-value": 30 },
                "missing-hb-allowed": { "current-value": 5 },
                "max-retransmit": { "current-value": 3 },
                "ack-timeout": { "current-value": 2.0 },
                "ack-random-factor": { "current-value": 1.5 },
            }
        }
    });
    let mut msg = Message::new(MessageType::Acknowledgement, Code::CONTENT, 2, token(0x22)?);
    msg.set_uint(OptionNumber::CONTENT_FORMAT, u32::from(ContentFormat::CBOR.0));
    msg.set_uint(OptionNumber::MAX_AGE, 7200);
    msg.payload = encode_cbor(&body).map_err(io::Error::other)?;
    Ok(msg)
}

fn notification_fragment() -> io::Result<Message> {
    let mut msg = Message::new(MessageType::NonConfirmable, Code::CONTENT, 3, token(0x11)?);
    msg.set_uint(OptionNumber::OBSERVE, 12);
    msg.set_option(OptionNumber::ETAG, vec![0x00, 0x5e, 0xed]);
    msg.set_block2(Block::new(0, true, 2));
    msg.payload = vec![0xa1; 64];
    Ok(msg)
}

fn diagnostic_reply() -> io::Result<Message> {
    let mut msg = Message::new(MessageType::Acknowledgement, Code::BAD_REQUEST, 4, token(0x33)?);
    msg.payload = b"Invalid cuid".to_vec();
    Ok(msg)
}

fn save(msg: &Message, path: &Path) -> io::Result<()> {
    let bytes = msg.to_bytes().map_err(io::Error::other)?;
    let mut f = File::create(path)?;
    f.write_all(&bytes)?;
    Ok(())
}

fn main() -> io::Result<()> {
    fs::create_dir_all(CORPUS_DIR)?;
    let dir = Path::new(CORPUS_DIR);
    save(&observe_mitigations()?, &dir.join("observe_mitigations.bin"))?;
    save(&config_response()?, &dir.join("config_response.bin"))?;
    save(&notification_fragment()?, &dir.join("notification_fragment.bin"))?;
    save(&diagnostic_reply()?, &dir.join("diagnostic_reply.bin"))?;
    save(&Message::ping(5), &dir.join("ping.bin"))?;
    save(&Message::reset(6), &dir.join("reset.bin"))?;
    Ok(())
}
