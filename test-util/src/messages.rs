//! Builders for server-side messages and bodies.

use dots_client::{
    message::{Block, Code, ContentFormat, Message, MessageType, OptionNumber, Token},
    payload::encode_cbor,
};
use serde_json::{Value, json};

/// Piggybacked acknowledgement answering `request` with `code`.
#[must_use]
pub fn piggybacked(request: &Message, code: Code) -> Message {
    Message::new(MessageType::Acknowledgement, code, request.message_id, request.token.clone())
}

/// Notification with an Observe sequence number.
#[must_use]
pub fn notification(kind: MessageType, message_id: u16, token: Token, observe: u32) -> Message {
    let mut message = Message::new(kind, Code::CONTENT, message_id, token);
    message.set_uint(OptionNumber::OBSERVE, observe);
    message
}

/// CBOR encoding of `body`.
///
/// # Panics
/// Panics if `body` cannot be encoded.
#[must_use]
pub fn cbor(body: &Value) -> Vec<u8> {
    match encode_cbor(body) {
        Ok(bytes) => bytes,
        Err(error) => panic!("encode body: {error}"),
    }
}

/// Attach `body` as a CBOR payload.
#[must_use]
pub fn with_cbor(mut message: Message, body: &Value) -> Message {
    message.payload = cbor(body);
    message.set_uint(OptionNumber::CONTENT_FORMAT, u32::from(ContentFormat::CBOR.0));
    message
}

/// Attach a Max-Age option.
#[must_use]
pub fn with_max_age(mut message: Message, seconds: u32) -> Message {
    message.set_uint(OptionNumber::MAX_AGE, seconds);
    message
}

/// Copy of `message` carrying block `num` of `payload`, cut into
/// `2^(szx+4)`-byte blocks and tagged with `etag`.
#[must_use]
pub fn fragment(message: &Message, payload: &[u8], num: u32, szx: u8, etag: &[u8]) -> Message {
    let block_size = Block::new(0, false, szx).size();
    let start = Block::new(num, false, szx).offset().min(payload.len());
    let end = start.saturating_add(block_size).min(payload.len());
    let more = end < payload.len();

    let mut out = message.clone();
    out.payload = payload.get(start..end).map(<[u8]>::to_vec).unwrap_or_default();
    out.set_uint(OptionNumber::CONTENT_FORMAT, u32::from(ContentFormat::CBOR.0));
    out.set_block2(Block::new(num, more, szx));
    out.set_option(OptionNumber::ETAG, etag.to_vec());
    out
}

/// Mitigation body listing `ids`.
#[must_use]
pub fn mitigation_body(ids: &[u32]) -> Value {
    let scope: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "mitigation-id": id,
                "target-prefix": ["192.0.2.0/24"],
                "lifetime": 3600,
                "status": 2,
                "bytes-dropped": 0,
                "pkts-dropped": 0,
            })
        })
        .collect();
    json!({ "ietf-dots-signal-channel:mitigation-scope": { "scope": scope } })
}

/// Values of one configuration half.
#[derive(Debug, Clone, Copy)]
pub struct ConfigValues {
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: u32,
    /// Missed heartbeats tolerated.
    pub missing_hb_allowed: u32,
    /// Maximum retransmissions.
    pub max_retransmit: u32,
    /// Acknowledgement timeout in seconds.
    pub ack_timeout: f64,
    /// Random factor.
    pub ack_random_factor: f64,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            heartbeat_interval: 30,
            missing_hb_allowed: 5,
            max_retransmit: 3,
            ack_timeout: 2.0,
            ack_random_factor: 1.5,
        }
    }
}

fn half(values: ConfigValues) -> Value {
    json!({
        "heartbeat-interval": { "current-value": values.heartbeat_interval },
        "missing-hb-allowed": { "current-value": values.missing_hb_allowed },
        "max-retransmit": { "current-value": values.max_retransmit },
        "ack-timeout": { "current-value": values.ack_timeout },
        "ack-random-factor": { "current-value": values.ack_random_factor },
    })
}

/// Session-configuration body with the given idle and mitigating halves.
#[must_use]
pub fn config_body(idle: ConfigValues, mitigating: ConfigValues) -> Value {
    json!({
        "ietf-dots-signal-channel:signal-config": {
            "mitigating-config": half(mitigating),
            "idle-config": half(idle),
        }
    })
}
