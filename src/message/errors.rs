//! Error types for signal-channel message parsing.

use thiserror::Error;

/// Errors raised while parsing or building messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Datagram shorter than the fixed four-byte header.
    #[error("buffer too short")]
    ShortBuffer,
    /// Version bits other than 1.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    /// Token longer than eight bytes.
    #[error("token length {0} exceeds 8 bytes")]
    TokenTooLong(usize),
    /// Option delta or length nibble set to the reserved value 15.
    #[error("reserved option nibble")]
    ReservedNibble,
    /// Option header or value runs past the end of the datagram.
    #[error("truncated option")]
    TruncatedOption,
    /// Option number overflowed while applying deltas.
    #[error("option number overflow")]
    OptionOverflow,
    /// Payload marker present with no payload after it.
    #[error("payload marker without payload")]
    EmptyPayload,
    /// Option value longer than the wire format can express.
    #[error("option value too long ({0} bytes)")]
    OptionTooLong(usize),
}
