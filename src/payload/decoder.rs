//! Reply decoding keyed by request kind and method, plus content sniffing for
//! notifications that arrive without an originating request.

use ciborium::Value;

use super::{
    ConfigurationResponse,
    Decoded,
    MitigationResponse,
    PayloadError,
    decode_cbor,
    mitigation::MITIGATION_SCOPE,
    session_config::SIGNAL_CONFIG,
};
use crate::request_kind::{Method, RequestKind};

/// Decoder selected for one `(kind, method)` pair.
pub type DecodeFn = fn(&[u8]) -> Result<Decoded, PayloadError>;

fn mitigation_response(bytes: &[u8]) -> Result<Decoded, PayloadError> {
    decode_cbor(bytes).map(Decoded::MitigationResponse)
}

fn mitigation_response_put(bytes: &[u8]) -> Result<Decoded, PayloadError> {
    decode_cbor(bytes).map(Decoded::MitigationResponsePut)
}

fn mitigation_request(bytes: &[u8]) -> Result<Decoded, PayloadError> {
    decode_cbor(bytes).map(Decoded::MitigationRequest)
}

fn configuration_response(bytes: &[u8]) -> Result<Decoded, PayloadError> {
    decode_cbor(bytes).map(Decoded::ConfigurationResponse)
}

fn signal_config_request(bytes: &[u8]) -> Result<Decoded, PayloadError> {
    decode_cbor(bytes).map(Decoded::SignalConfigRequest)
}

/// Look up the decoder for a reply to a `method` request on `kind`.
#[must_use]
pub const fn decoder_for(kind: RequestKind, method: Method) -> DecodeFn {
    match (kind, method) {
        (RequestKind::Mitigation, Method::Get) => mitigation_response,
        (RequestKind::Mitigation, Method::Put) => mitigation_response_put,
        (RequestKind::Mitigation, _) => mitigation_request,
        (RequestKind::SessionConfiguration, Method::Get) => configuration_response,
        (RequestKind::SessionConfiguration, _) => signal_config_request,
    }
}

/// Structural class of a notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationClass {
    /// Carries the mitigation-scope marker.
    Mitigation,
    /// Carries the signal-config marker.
    SessionConfig,
    /// Neither marker is present, or the body is not a CBOR map.
    Unknown,
}

/// Classify a notification body by its top-level keys.
///
/// The mitigation marker wins when both are present.
#[must_use]
pub fn classify_notification(bytes: &[u8]) -> NotificationClass {
    let Ok(Value::Map(entries)) = ciborium::from_reader::<Value, _>(bytes) else {
        return NotificationClass::Unknown;
    };
    let has = |marker: &str| {
        entries
            .iter()
            .any(|(key, _)| key.as_text().is_some_and(|k| k == marker))
    };
    if has(MITIGATION_SCOPE) {
        NotificationClass::Mitigation
    } else if has(SIGNAL_CONFIG) {
        NotificationClass::SessionConfig
    } else {
        NotificationClass::Unknown
    }
}

/// Decode a notification body after classifying it by content.
///
/// # Errors
/// Returns [`PayloadError::UnknownNotification`] when no marker is present or
/// [`PayloadError::Decode`] when the body does not fit the detected shape.
pub fn decode_notification(bytes: &[u8]) -> Result<(NotificationClass, Decoded), PayloadError> {
    match classify_notification(bytes) {
        NotificationClass::Mitigation => decode_cbor::<MitigationResponse>(bytes)
            .map(|b| (NotificationClass::Mitigation, Decoded::MitigationResponse(b))),
        NotificationClass::SessionConfig => decode_cbor::<ConfigurationResponse>(bytes)
            .map(|b| (NotificationClass::SessionConfig, Decoded::ConfigurationResponse(b))),
        NotificationClass::Unknown => Err(PayloadError::UnknownNotification),
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;
    use serde_json::{Value as Json, json};

    use super::*;
    use crate::payload::encode_cbor;

    fn mitigation_body() -> Json {
        json!({
            "ietf-dots-signal-channel:mitigation-scope": {
                "scope": [
                    { "mitigation-id": 12, "lifetime": 3600, "status": 2 },
                    { "mitigation-id": 13, "lifetime": 3600, "status": 2 }
                ]
            }
        })
    }

    fn config_body() -> Json {
        json!({
            "ietf-dots-signal-channel:signal-config": {
                "idle-config": {
                    "heartbeat-interval": { "current-value": 30 },
                    "missing-hb-allowed": { "current-value": 5 },
                    "max-retransmit": { "current-value": 3 },
                    "ack-timeout": { "current-value": 2.0 },
                    "ack-random-factor": { "current-value": 1.5 }
                }
            }
        })
    }

    fn cbor(value: &Json) -> Vec<u8> { encode_cbor(value).expect("encode") }

    #[rstest]
    #[case(RequestKind::Mitigation, Method::Put, "put")]
    #[case(RequestKind::Mitigation, Method::Delete, "request")]
    #[case(RequestKind::SessionConfiguration, Method::Put, "config-request")]
    fn table_covers_write_methods(#[case] kind: RequestKind, #[case] method: Method, #[case] shape: &str) {
        let body = match shape {
            "put" => json!({ "ietf-dots-signal-channel:mitigation-scope": { "scope": [{ "mitigation-id": 1, "lifetime": 60 }] } }),
            "request" => json!({ "ietf-dots-signal-channel:mitigation-scope": { "scope": [{ "target-prefix": ["1.2.3.0/24"] }] } }),
            _ => json!({ "ietf-dots-signal-channel:signal-config": { "sid": 7 } }),
        };
        let decoded = decoder_for(kind, method)(&cbor(&body)).expect("decode");
        let matches_shape = match shape {
            "put" => matches!(decoded, Decoded::MitigationResponsePut(_)),
            "request" => matches!(decoded, Decoded::MitigationRequest(_)),
            _ => matches!(decoded, Decoded::SignalConfigRequest(_)),
        };
        assert!(matches_shape, "unexpected shape {decoded:?}");
    }

    #[rstest]
    fn mitigation_read_uses_mitigation_shape_even_with_config_marker() {
        let mut body = mitigation_body();
        if let (Some(map), Some(cfg)) = (body.as_object_mut(), config_body().as_object().cloned()) {
            map.extend(cfg);
        }
        let decoded = decoder_for(RequestKind::Mitigation, Method::Get)(&cbor(&body)).expect("decode");
        assert_eq!(decoded.mitigation_count(), Some(2));
    }

    #[rstest]
    fn config_read_decodes_configuration() {
        let decoded = decoder_for(RequestKind::SessionConfiguration, Method::Get)(&cbor(&config_body())).expect("decode");
        let cfg = decoded.configuration().expect("configuration shape");
        assert_eq!(cfg.signal_config.idle_config.heartbeat_interval.current_value, 30);
    }

    #[rstest]
    #[case(mitigation_body(), NotificationClass::Mitigation)]
    #[case(config_body(), NotificationClass::SessionConfig)]
    #[case(json!({ "other": 1 }), NotificationClass::Unknown)]
    #[case(json!([1, 2, 3]), NotificationClass::Unknown)]
    fn notifications_are_classified_by_content(#[case] body: Json, #[case] expected: NotificationClass) {
        assert_eq!(classify_notification(&cbor(&body)), expected);
    }

    #[rstest]
    fn unknown_notification_is_an_error() {
        let err = decode_notification(&cbor(&json!({ "other": 1 }))).expect_err("unknown");
        assert!(matches!(err, PayloadError::UnknownNotification));
    }

    #[rstest]
    fn truncated_body_is_not_classified() {
        assert_eq!(classify_notification(&[0xa1]), NotificationClass::Unknown);
    }
}
