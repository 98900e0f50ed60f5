//! Transport message model for the signal channel.
//!
//! A [`Message`] carries a type, a code, a message id, a [`Token`], a sorted
//! option list and an opaque payload. The session engine only relies on the
//! option semantics exposed here (fragment descriptor, cache validator,
//! subscription directive, freshness lifetime, conditional-update marker);
//! byte layout lives in [`wire`] and is only needed by real transports.

use std::fmt;

use rand::RngCore;

pub mod codec;
pub mod errors;
pub mod options;
pub mod wire;

pub use codec::DatagramCodec;
pub use errors::MessageError;
pub use options::{Block, ContentFormat, ETag, MessageOption, Observe, OptionNumber};
pub use wire::parse_message;

/// Maximum token length permitted by the wire format.
pub const MAX_TOKEN_LEN: usize = 8;

/// Message type carried in the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Confirmable: the peer must acknowledge or reset.
    Confirmable,
    /// Non-confirmable: fire and forget.
    NonConfirmable,
    /// Acknowledgement of a confirmable message.
    Acknowledgement,
    /// Reset: the peer could not process a message.
    Reset,
}

impl MessageType {
    /// Two-bit header value for this type.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Confirmable => 0,
            Self::NonConfirmable => 1,
            Self::Acknowledgement => 2,
            Self::Reset => 3,
        }
    }

    /// Decode the two-bit header value.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }
}

/// Request method or response code, packed as `class.detail`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(u8);

impl Code {
    /// Empty message (pings, bare acknowledgements and resets).
    pub const EMPTY: Self = Self::new(0, 0);
    /// GET request.
    pub const GET: Self = Self::new(0, 1);
    /// POST request.
    pub const POST: Self = Self::new(0, 2);
    /// PUT request.
    pub const PUT: Self = Self::new(0, 3);
    /// DELETE request.
    pub const DELETE: Self = Self::new(0, 4);
    /// 2.01 Created.
    pub const CREATED: Self = Self::new(2, 1);
    /// 2.02 Deleted.
    pub const DELETED: Self = Self::new(2, 2);
    /// 2.03 Valid.
    pub const VALID: Self = Self::new(2, 3);
    /// 2.04 Changed.
    pub const CHANGED: Self = Self::new(2, 4);
    /// 2.05 Content.
    pub const CONTENT: Self = Self::new(2, 5);
    /// 2.31 Continue.
    pub const CONTINUE: Self = Self::new(2, 31);
    /// 4.00 Bad Request.
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    /// 4.04 Not Found.
    pub const NOT_FOUND: Self = Self::new(4, 4);
    /// 4.05 Method Not Allowed.
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    /// 4.09 Conflict.
    pub const CONFLICT: Self = Self::new(4, 9);
    /// 4.12 Precondition Failed.
    pub const PRECONDITION_FAILED: Self = Self::new(4, 12);
    /// 5.00 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    /// 5.03 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);

    /// Build a code from its class (0-7) and detail (0-31).
    #[must_use]
    pub const fn new(class: u8, detail: u8) -> Self { Self(((class & 0x07) << 5) | (detail & 0x1f)) }

    /// Wrap a raw header byte.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self { Self(raw) }

    /// Raw header byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self.0 }

    /// Code class (`2` in `2.05`).
    #[must_use]
    pub const fn class(self) -> u8 { self.0 >> 5 }

    /// Code detail (`5` in `2.05`).
    #[must_use]
    pub const fn detail(self) -> u8 { self.0 & 0x1f }

    /// `true` for the 0.00 empty code.
    #[must_use]
    pub const fn is_empty(self) -> bool { self.0 == 0 }

    /// `true` for request methods (class 0, non-empty).
    #[must_use]
    pub const fn is_request(self) -> bool { self.class() == 0 && !self.is_empty() }

    /// `true` for 2.xx codes.
    #[must_use]
    pub const fn is_success(self) -> bool { self.class() == 2 }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Code({self})") }
}

/// Opaque correlation token.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Vec<u8>);

impl Token {
    /// Mint a fresh eight-byte random token.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = vec![0_u8; MAX_TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw token bytes.
    ///
    /// # Errors
    /// Returns [`MessageError::TokenTooLong`] when more than eight bytes are
    /// supplied.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() > MAX_TOKEN_LEN {
            return Err(MessageError::TokenTooLong(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    /// `true` for the zero-length token.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&hex::encode(&self.0)) }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Token({self})") }
}

/// A single signal-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub kind: MessageType,
    /// Method or response code.
    pub code: Code,
    /// Message id used for deduplication and acknowledgement matching.
    pub message_id: u16,
    /// Correlation token.
    pub token: Token,
    options: Vec<MessageOption>,
    /// Opaque body.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message without options or payload.
    #[must_use]
    pub const fn new(kind: MessageType, code: Code, message_id: u16, token: Token) -> Self {
        Self {
            kind,
            code,
            message_id,
            token,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Build an empty acknowledgement for `message_id`.
    #[must_use]
    pub const fn ack(message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, Code::EMPTY, message_id, Token(Vec::new()))
    }

    /// Build an empty reset for `message_id`.
    #[must_use]
    pub const fn reset(message_id: u16) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, message_id, Token(Vec::new()))
    }

    /// Build an empty confirmable message (a keepalive ping).
    #[must_use]
    pub const fn ping(message_id: u16) -> Self {
        Self::new(MessageType::Confirmable, Code::EMPTY, message_id, Token(Vec::new()))
    }

    /// `true` when this message is confirmable.
    #[must_use]
    pub fn is_confirmable(&self) -> bool { self.kind == MessageType::Confirmable }

    /// `true` for empty messages.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.code.is_empty() }

    /// Options in ascending number order.
    #[must_use]
    pub fn options(&self) -> &[MessageOption] { &self.options }

    /// Append an option, keeping the list sorted. Repeatable options keep
    /// their insertion order.
    pub fn add_option(&mut self, number: OptionNumber, value: Vec<u8>) {
        let at = self
            .options
            .iter()
            .position(|opt| opt.number > number)
            .unwrap_or(self.options.len());
        self.options.insert(at, MessageOption { number, value });
    }

    /// Replace every occurrence of `number` with a single value.
    pub fn set_option(&mut self, number: OptionNumber, value: Vec<u8>) {
        self.remove_option(number);
        self.add_option(number, value);
    }

    /// Drop every occurrence of `number`.
    pub fn remove_option(&mut self, number: OptionNumber) {
        self.options.retain(|opt| opt.number != number);
    }

    /// First value stored for `number`.
    #[must_use]
    pub fn option(&self, number: OptionNumber) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|opt| opt.number == number)
            .map(|opt| opt.value.as_slice())
    }

    /// Store an unsigned integer option using the minimal big-endian form.
    pub fn set_uint(&mut self, number: OptionNumber, value: u32) {
        self.set_option(number, options::encode_uint(value));
    }

    /// Read an unsigned integer option.
    #[must_use]
    pub fn uint_option(&self, number: OptionNumber) -> Option<u32> {
        self.option(number).and_then(options::decode_uint)
    }

    /// Replace the Uri-Path options with the `/`-separated segments of `path`.
    pub fn set_path(&mut self, path: &str) {
        self.remove_option(OptionNumber::URI_PATH);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(OptionNumber::URI_PATH, segment.as_bytes().to_vec());
        }
    }

    /// Reassemble the Uri-Path options into a `/`-separated path.
    #[must_use]
    pub fn path(&self) -> String {
        self.options
            .iter()
            .filter(|opt| opt.number == OptionNumber::URI_PATH)
            .fold(String::new(), |mut acc, opt| {
                acc.push('/');
                acc.push_str(&String::from_utf8_lossy(&opt.value));
                acc
            })
    }

    /// Observe option value, if present.
    #[must_use]
    pub fn observe(&self) -> Option<u32> { self.uint_option(OptionNumber::OBSERVE) }

    /// Max-Age option value in seconds, if present.
    #[must_use]
    pub fn max_age(&self) -> Option<u32> { self.uint_option(OptionNumber::MAX_AGE) }

    /// Block2 fragment descriptor, if present.
    #[must_use]
    pub fn block2(&self) -> Option<Block> { self.uint_option(OptionNumber::BLOCK2).map(Block::from_u32) }

    /// Store a Block2 fragment descriptor.
    pub fn set_block2(&mut self, block: Block) { self.set_uint(OptionNumber::BLOCK2, block.to_u32()); }

    /// ETag cache validator, if present and well-formed.
    #[must_use]
    pub fn etag(&self) -> Option<ETag> { self.option(OptionNumber::ETAG).and_then(ETag::from_bytes) }

    /// Store `tag` as the only ETag option, or clear it for `None`.
    pub fn set_etag(&mut self, tag: Option<&ETag>) {
        match tag {
            Some(tag) => self.set_option(OptionNumber::ETAG, tag.as_bytes().to_vec()),
            None => self.remove_option(OptionNumber::ETAG),
        }
    }

    /// Content-Format option, if present.
    #[must_use]
    pub fn content_format(&self) -> Option<ContentFormat> {
        self.uint_option(OptionNumber::CONTENT_FORMAT)
            .and_then(|raw| u16::try_from(raw).ok())
            .map(ContentFormat)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Code::GET, "0.01")]
    #[case(Code::CONTENT, "2.05")]
    #[case(Code::CONTINUE, "2.31")]
    #[case(Code::INTERNAL_SERVER_ERROR, "5.00")]
    fn code_displays_class_and_detail(#[case] code: Code, #[case] shown: &str) {
        assert_eq!(code.to_string(), shown);
    }

    #[rstest]
    fn random_tokens_are_eight_bytes_and_distinct() {
        let a = Token::random();
        let b = Token::random();
        assert_eq!(a.as_bytes().len(), MAX_TOKEN_LEN);
        assert_ne!(a, b);
    }

    #[rstest]
    fn oversized_token_is_rejected() {
        let err = Token::from_bytes(&[0; 9]).expect_err("nine bytes");
        assert!(matches!(err, MessageError::TokenTooLong(9)));
    }

    #[rstest]
    fn options_stay_sorted() {
        let mut msg = Message::new(MessageType::Confirmable, Code::GET, 1, Token::default());
        msg.set_uint(OptionNumber::BLOCK2, 2);
        msg.set_path("/.well-known/dots/mitigate/cuid=abc");
        msg.set_uint(OptionNumber::OBSERVE, 0);
        let numbers: Vec<_> = msg.options().iter().map(|o| o.number).collect();
        let mut sorted = numbers.clone();
        sorted.sort();
        assert_eq!(numbers, sorted);
        assert_eq!(msg.path(), "/.well-known/dots/mitigate/cuid=abc");
        assert_eq!(msg.observe(), Some(0));
    }

    #[rstest]
    fn set_option_replaces_previous_value() {
        let mut msg = Message::new(MessageType::Confirmable, Code::GET, 1, Token::default());
        msg.set_option(OptionNumber::ETAG, vec![7]);
        msg.set_option(OptionNumber::ETAG, vec![0, 9]);
        assert_eq!(msg.etag(), ETag::from_bytes(&[0, 9]));
        assert_eq!(
            msg.options()
                .iter()
                .filter(|o| o.number == OptionNumber::ETAG)
                .count(),
            1
        );
    }
}
