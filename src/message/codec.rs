//! `tokio_util` codec adapter for datagram transports.
//!
//! Each datagram holds exactly one message, so decoding consumes the whole
//! buffer and encoding appends one encoded message.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{Message, parse_message, wire::MAX_DATAGRAM};

/// Codec mapping datagrams to [`Message`] values.
#[derive(Clone, Debug, Default)]
pub struct DatagramCodec;

impl DatagramCodec {
    /// Create a new datagram codec.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Decoder for DatagramCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        if datagram.len() > MAX_DATAGRAM {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "datagram too large"));
        }
        parse_message(&datagram)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

impl Encoder<Message> for DatagramCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;
    use crate::message::{Code, MessageType, Token};

    #[rstest]
    fn decodes_whole_datagram() {
        let msg = Message::new(MessageType::NonConfirmable, Code::CONTENT, 9, Token::random());
        let mut codec = DatagramCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).expect("encode");

        let decoded = codec.decode(&mut buf).expect("decode");

        assert_eq!(decoded, Some(msg));
        assert!(buf.is_empty());
    }

    #[rstest]
    fn malformed_datagram_is_invalid_data() {
        let mut codec = DatagramCodec::new();
        let mut buf = BytesMut::from(&[0x40_u8][..]);

        let err = codec.decode(&mut buf).expect_err("short datagram");

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
