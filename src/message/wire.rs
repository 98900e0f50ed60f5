//! Datagram encoding and parsing for signal-channel messages.
//!
//! Layout: a fixed four-byte header (version, type, token length, code,
//! message id), the token, delta-encoded options, then an optional payload
//! introduced by the `0xFF` marker.

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use super::{Code, MAX_TOKEN_LEN, Message, MessageError, MessageType, OptionNumber, Token};

/// Protocol version carried in the top two header bits.
pub const VERSION: u8 = 1;
/// Length of the fixed header in bytes.
pub const HEADER_LEN: usize = 4;
/// Marker byte separating options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xff;
/// Largest datagram the codec will build or accept.
pub const MAX_DATAGRAM: usize = 64 * 1024;

const EXT_ONE_BYTE: u8 = 13;
const EXT_TWO_BYTES: u8 = 14;
const RESERVED: u8 = 15;
const ONE_BYTE_BASE: usize = 13;
const TWO_BYTE_BASE: usize = 269;

impl Message {
    /// Encode this message into a datagram.
    ///
    /// # Errors
    /// Returns an error if the token or an option value cannot be expressed
    /// on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> { encode_message(self) }
}

/// Encode `message` into a datagram.
///
/// # Errors
/// Returns [`MessageError::TokenTooLong`] or [`MessageError::OptionTooLong`]
/// when a field exceeds the wire limits.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, MessageError> {
    let token = message.token.as_bytes();
    let token_len = u8::try_from(token.len())
        .ok()
        .filter(|len| usize::from(*len) <= MAX_TOKEN_LEN)
        .ok_or(MessageError::TokenTooLong(token.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + token.len() + message.payload.len() + 16);
    out.push((VERSION << 6) | (message.kind.bits() << 4) | token_len);
    out.push(message.code.as_u8());
    out.extend_from_slice(&message.message_id.to_be_bytes());
    out.extend_from_slice(token);

    let mut previous = 0_u16;
    for opt in &message.options {
        let delta = usize::from(opt.number.0.saturating_sub(previous));
        let (delta_nibble, delta_ext) = nibble(delta)?;
        let (len_nibble, len_ext) = nibble(opt.value.len())?;
        out.push((delta_nibble << 4) | len_nibble);
        out.extend_from_slice(&delta_ext);
        out.extend_from_slice(&len_ext);
        out.extend_from_slice(&opt.value);
        previous = opt.number.0;
    }

    if !message.payload.is_empty() {
        out.push(PAYLOAD_MARKER);
        out.extend_from_slice(&message.payload);
    }
    Ok(out)
}

fn nibble(value: usize) -> Result<(u8, Vec<u8>), MessageError> {
    if value < ONE_BYTE_BASE {
        let small = u8::try_from(value).map_err(|_| MessageError::OptionTooLong(value))?;
        return Ok((small, Vec::new()));
    }
    if value < TWO_BYTE_BASE {
        let ext = u8::try_from(value - ONE_BYTE_BASE).map_err(|_| MessageError::OptionTooLong(value))?;
        return Ok((EXT_ONE_BYTE, vec![ext]));
    }
    let ext = u16::try_from(value - TWO_BYTE_BASE).map_err(|_| MessageError::OptionTooLong(value))?;
    Ok((EXT_TWO_BYTES, ext.to_be_bytes().to_vec()))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn byte(&mut self) -> Option<u8> { self.take(1).and_then(|b| b.first().copied()) }

    fn rest(&self) -> &'a [u8] { self.buf.get(self.pos..).unwrap_or_default() }

    fn is_done(&self) -> bool { self.pos >= self.buf.len() }
}

/// Parse a datagram into a [`Message`].
///
/// # Errors
/// Returns a [`MessageError`] describing the first malformed field.
pub fn parse_message(buf: &[u8]) -> Result<Message, MessageError> {
    let mut cur = Cursor::new(buf);
    let [first, code, id_hi, id_lo]: [u8; HEADER_LEN] = cur
        .take(HEADER_LEN)
        .and_then(|header| header.try_into().ok())
        .ok_or(MessageError::ShortBuffer)?;

    let version = first >> 6;
    if version != VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    let token_len = usize::from(first & 0x0f);
    if token_len > MAX_TOKEN_LEN {
        return Err(MessageError::TokenTooLong(token_len));
    }
    let token = Token::from_bytes(cur.take(token_len).ok_or(MessageError::ShortBuffer)?)?;

    let mut message = Message::new(
        MessageType::from_bits(first >> 4),
        Code::from_u8(code),
        u16::from_be_bytes([id_hi, id_lo]),
        token,
    );

    let mut number = 0_u16;
    while let Some(lead) = cur.byte() {
        if lead == PAYLOAD_MARKER {
            let payload = cur.rest();
            if payload.is_empty() {
                return Err(MessageError::EmptyPayload);
            }
            message.payload = payload.to_vec();
            return Ok(message);
        }
        let delta = extended(&mut cur, lead >> 4)?;
        let len = extended(&mut cur, lead & 0x0f)?;
        number = u16::try_from(delta)
            .ok()
            .and_then(|d| number.checked_add(d))
            .ok_or(MessageError::OptionOverflow)?;
        let value = cur.take(len).ok_or(MessageError::TruncatedOption)?;
        message.options.push(super::MessageOption {
            number: OptionNumber(number),
            value: value.to_vec(),
        });
    }
    debug_assert!(cur.is_done(), "option loop consumes the datagram");
    Ok(message)
}

fn extended(cur: &mut Cursor<'_>, nib: u8) -> Result<usize, MessageError> {
    match nib {
        EXT_ONE_BYTE => cur
            .byte()
            .map(|b| usize::from(b) + ONE_BYTE_BASE)
            .ok_or(MessageError::TruncatedOption),
        EXT_TWO_BYTES => cur
            .take(2)
            .and_then(|b| b.try_into().ok())
            .map(|b: [u8; 2]| usize::from(u16::from_be_bytes(b)) + TWO_BYTE_BASE)
            .ok_or(MessageError::TruncatedOption),
        RESERVED => Err(MessageError::ReservedNibble),
        small => Ok(usize::from(small)),
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::message::Block;

    fn sample() -> Message {
        let mut msg = Message::new(
            MessageType::Confirmable,
            Code::GET,
            0x1234,
            Token::from_bytes(b"abcdefgh").expect("token"),
        );
        msg.set_path("/.well-known/dots/mitigate/cuid=dz6pHjaADkaFTbjr0JGBpw");
        msg.set_uint(OptionNumber::OBSERVE, 0);
        msg.set_block2(Block::new(0, false, 6));
        msg
    }

    #[rstest]
    fn header_layout_matches_rfc() {
        let bytes = sample().to_bytes().expect("encode");
        assert_eq!(bytes.first(), Some(&0x48)); // ver 1, CON, tkl 8
        assert_eq!(bytes.get(1), Some(&0x01));
        assert_eq!(bytes.get(2..4), Some(&[0x12, 0x34][..]));
        assert_eq!(bytes.get(4..12), Some(&b"abcdefgh"[..]));
    }

    #[rstest]
    fn parses_encoded_message() {
        let mut msg = sample();
        msg.payload = vec![0xa1, 0x01, 0x02];
        let parsed = parse_message(&msg.to_bytes().expect("encode")).expect("parse");
        assert_eq!(parsed, msg);
    }

    #[rstest]
    fn long_option_uses_extended_length() {
        let mut msg = Message::new(MessageType::NonConfirmable, Code::PUT, 1, Token::default());
        msg.set_option(OptionNumber::URI_QUERY, vec![b'x'; 300]);
        let parsed = parse_message(&msg.to_bytes().expect("encode")).expect("parse");
        assert_eq!(parsed.option(OptionNumber::URI_QUERY).map(<[u8]>::len), Some(300));
    }

    #[rstest]
    #[case(&[0x40, 0x01], MessageError::ShortBuffer)]
    #[case(&[0x80, 0x01, 0x00, 0x01], MessageError::UnsupportedVersion(2))]
    #[case(&[0x49, 0x01, 0x00, 0x01], MessageError::TokenTooLong(9))]
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xf0], MessageError::ReservedNibble)]
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xb3, b'a'], MessageError::TruncatedOption)]
    #[case(&[0x40, 0x01, 0x00, 0x01, 0xff], MessageError::EmptyPayload)]
    fn rejects_malformed_datagrams(#[case] bytes: &[u8], #[case] expected: MessageError) {
        assert_eq!(parse_message(bytes).expect_err("malformed"), expected);
    }

    proptest! {
        #[test]
        fn parser_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse_message(&bytes);
        }
    }
}
