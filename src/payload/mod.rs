//! Body codec for signal-channel payloads.
//!
//! Request and response bodies travel as CBOR. This module encodes request
//! bodies, decodes replies into the typed shapes selected by
//! [`decoder::decoder_for`] and recognises plain-text diagnostic payloads.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::message::{ContentFormat, Message};

pub mod decoder;
pub mod mitigation;
pub mod session_config;

pub use decoder::{NotificationClass, classify_notification, decode_notification, decoder_for};
pub use mitigation::{MitigationRequest, MitigationResponse, MitigationResponsePut};
pub use session_config::{
    ConfigurationResponse,
    HeartbeatParams,
    SessionConfigMode,
    SignalConfigRequest,
};

/// Errors raised while encoding or decoding a body.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The body could not be serialised.
    #[error("failed to encode body: {0}")]
    Encode(String),
    /// The bytes are not valid CBOR for the expected shape.
    #[error("failed to decode body: {0}")]
    Decode(String),
    /// A notification carried neither known top-level marker.
    #[error("notification body has no recognised top-level marker")]
    UnknownNotification,
}

/// A decoded body, tagged by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Decoded {
    /// Mitigation read reply or mitigation notification.
    MitigationResponse(MitigationResponse),
    /// Mitigation create or update reply.
    MitigationResponsePut(MitigationResponsePut),
    /// Mitigation body echoed for other methods.
    MitigationRequest(MitigationRequest),
    /// Session-configuration read reply or notification.
    ConfigurationResponse(ConfigurationResponse),
    /// Session-configuration body echoed for other methods.
    SignalConfigRequest(SignalConfigRequest),
}

impl Decoded {
    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if the value cannot be represented as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> { serde_json::to_string_pretty(self) }

    /// Number of mitigation scopes, for mitigation read shapes.
    #[must_use]
    pub fn mitigation_count(&self) -> Option<usize> {
        match self {
            Self::MitigationResponse(body) => Some(body.scope_count()),
            _ => None,
        }
    }

    /// Session configuration, for configuration read shapes.
    #[must_use]
    pub const fn configuration(&self) -> Option<&ConfigurationResponse> {
        match self {
            Self::ConfigurationResponse(body) => Some(body),
            _ => None,
        }
    }
}

/// Encode `value` as CBOR.
///
/// # Errors
/// Returns [`PayloadError::Encode`] if serialisation fails.
pub fn encode_cbor<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, PayloadError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| PayloadError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode CBOR `bytes` into `T`.
///
/// # Errors
/// Returns [`PayloadError::Decode`] when the bytes do not match `T`.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PayloadError> {
    ciborium::from_reader(bytes).map_err(|e| PayloadError::Decode(e.to_string()))
}

/// `true` when `message` carries a human-readable diagnostic instead of a
/// structured body.
///
/// A payload counts as diagnostic when it is labelled `text/plain`, or when it
/// is unlabelled valid UTF-8 that does not open with a CBOR map header.
#[must_use]
pub fn is_diagnostic(message: &Message) -> bool {
    if message.payload.is_empty() {
        return false;
    }
    match message.content_format() {
        Some(format) => format == ContentFormat::TEXT_PLAIN,
        None => {
            let opens_map = message.payload.first().is_some_and(|b| b >> 5 == CBOR_MAJOR_MAP);
            !opens_map && std::str::from_utf8(&message.payload).is_ok()
        }
    }
}

const CBOR_MAJOR_MAP: u8 = 5;

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::message::{Code, MessageType, OptionNumber, Token};

    fn reply(payload: &[u8], format: Option<ContentFormat>) -> Message {
        let mut msg = Message::new(MessageType::Acknowledgement, Code::BAD_REQUEST, 1, Token::default());
        if let Some(f) = format {
            msg.set_uint(OptionNumber::CONTENT_FORMAT, u32::from(f.0));
        }
        msg.payload = payload.to_vec();
        msg
    }

    #[rstest]
    #[case(b"Bad cuid".as_slice(), None, true)]
    #[case(b"Bad cuid".as_slice(), Some(ContentFormat::TEXT_PLAIN), true)]
    #[case(b"Bad cuid".as_slice(), Some(ContentFormat::CBOR), false)]
    #[case(&[0xa1, 0x01, 0x02], None, false)]
    #[case(&[0xff, 0xfe], None, false)]
    #[case(&[], None, false)]
    fn diagnostic_detection(
        #[case] payload: &[u8],
        #[case] format: Option<ContentFormat>,
        #[case] expected: bool,
    ) {
        assert_eq!(is_diagnostic(&reply(payload, format)), expected);
    }

    #[rstest]
    fn json_body_encodes_to_cbor_map() {
        let body = json!({ "ietf-dots-signal-channel:mitigation-scope": { "scope": [] } });
        let bytes = encode_cbor(&body).expect("encode");
        assert_eq!(bytes.first().map(|b| b >> 5), Some(CBOR_MAJOR_MAP));
        let back: serde_json::Value = decode_cbor(&bytes).expect("decode");
        assert_eq!(back, body);
    }

    #[rstest]
    fn garbage_fails_to_decode() {
        let err = decode_cbor::<MitigationResponse>(&[0x01, 0x02]).expect_err("not a map");
        assert!(matches!(err, PayloadError::Decode(_)));
    }
}
