//! Caller-facing request and response types.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::env::{Env, RequestQuery, query_params_to_string};
use crate::{
    message::{Block, Code, ContentFormat, Message, MessageType, Observe, OptionNumber, Token},
    payload::{Decoded, PayloadError, decoder::DecodeFn, encode_cbor, is_diagnostic},
    request_kind::{Method, RequestKind},
};

/// Options a caller may attach to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Raw Observe value. Only `0` (register) and `1` (deregister) affect
    /// the subscription table.
    pub observe: Option<u32>,
    /// If-Match value for conditional updates.
    pub if_match: Option<Vec<u8>>,
}

/// A request to run through the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Target resource.
    pub kind: RequestKind,
    /// Method.
    pub method: Method,
    /// Query parameters appended to the resource path, e.g. `cuid=abc`.
    pub query_params: Vec<String>,
    /// Send as a confirmable message.
    pub confirmable: bool,
    /// Observe and If-Match options.
    pub options: RequestOptions,
    /// CBOR body.
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Confirmable request without body, query or options.
    #[must_use]
    pub const fn new(kind: RequestKind, method: Method) -> Self {
        Self {
            kind,
            method,
            query_params: Vec::new(),
            confirmable: true,
            options: RequestOptions {
                observe: None,
                if_match: None,
            },
            body: None,
        }
    }

    /// Append query parameters.
    #[must_use]
    pub fn with_query<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Attach a subscription directive.
    #[must_use]
    pub const fn with_observe(mut self, directive: Observe) -> Self {
        self.options.observe = Some(directive.value());
        self
    }

    /// Attach an If-Match option.
    #[must_use]
    pub fn with_if_match(mut self, tag: Vec<u8>) -> Self {
        self.options.if_match = Some(tag);
        self
    }

    /// Send as non-confirmable.
    #[must_use]
    pub const fn non_confirmable(mut self) -> Self {
        self.confirmable = false;
        self
    }

    /// Encode `body` as the CBOR payload.
    ///
    /// # Errors
    /// Returns [`PayloadError::Encode`] when `body` cannot be serialised.
    pub fn with_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, PayloadError> {
        self.body = Some(encode_cbor(body)?);
        Ok(self)
    }
}

/// Build the outbound message for `request`, applying the subscription
/// lifecycle to `env`.
///
/// A register directive reuses the token of an existing subscription to the
/// same query or records a new one; a deregister directive sends on the
/// subscription's original token and forgets it.
pub fn create_message(env: &mut Env, request: &Request) -> Message {
    let kind = if request.confirmable {
        MessageType::Confirmable
    } else {
        MessageType::NonConfirmable
    };
    let mut message = Message::new(kind, request.method.into(), env.new_message_id(), Token::random());

    match request.options.observe.map(|v| (v, Observe::from_value(v))) {
        Some((_, Some(directive))) => apply_observe(env, request, &mut message, directive),
        Some((value, None)) => debug!(observe = value, "observe value is not a subscription directive"),
        None => {}
    }

    if let Some(tag) = &request.options.if_match {
        message.set_option(OptionNumber::IF_MATCH, tag.clone());
    }

    if request.kind == RequestKind::Mitigation && request.method == Method::Get {
        match env.initial_block_size {
            Some(szx) => message.set_block2(Block::new(0, false, szx)),
            None => debug!("no initial block size configured"),
        }
    }

    if let Some(body) = &request.body {
        message.payload.clone_from(body);
        message.set_uint(OptionNumber::CONTENT_FORMAT, u32::from(ContentFormat::CBOR.0));
    }

    let path = format!("{}/{}", request.kind.path(), request.query_params.join("/"));
    message.set_path(&path);
    debug!(path = %path, token = %message.token, id = message.message_id, "request created");
    message
}

fn apply_observe(env: &mut Env, request: &Request, message: &mut Message, directive: Observe) {
    message.set_uint(OptionNumber::OBSERVE, directive.value());
    let query = query_params_to_string(&request.query_params);
    let existing = env.token_for_query(&query).cloned();
    match (directive, existing) {
        (Observe::Register, Some(token)) => message.token = token,
        (Observe::Register, None) => env.add_request_query(message.token.clone(), RequestQuery::new(query)),
        (Observe::Deregister, Some(token)) => {
            env.remove_request_query(&token);
            message.token = token;
        }
        (Observe::Deregister, None) => debug!(query = %query, "deregister for unknown subscription"),
    }
}

/// Body of a response or notification as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No body, or a body that could not be decoded.
    Empty,
    /// Plain-text diagnostic from the server.
    Diagnostic(String),
    /// Structured body.
    Decoded(Decoded),
}

impl Payload {
    /// Decode the body of `message` with `decode`, degrading to
    /// [`Payload::Empty`] on failure.
    pub(crate) fn from_message(message: &Message, decode: DecodeFn) -> Self {
        if message.payload.is_empty() {
            return Self::Empty;
        }
        debug!(payload = %hex::encode(&message.payload), "raw payload");
        if is_diagnostic(message) {
            return Self::Diagnostic(String::from_utf8_lossy(&message.payload).into_owned());
        }
        match decode(&message.payload) {
            Ok(decoded) => {
                info!(decoded = ?decoded, "CBOR decoded");
                Self::Decoded(decoded)
            }
            Err(error) => {
                warn!(error = %error, "CBOR decode failed");
                Self::Empty
            }
        }
    }

    /// Human-readable rendering: JSON for structured bodies, the text for
    /// diagnostics.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Diagnostic(text) => Some(text.clone()),
            Self::Decoded(decoded) => decoded.to_json().ok(),
        }
    }
}

/// Result of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response code; `5.00` when the exchange timed out.
    pub code: Code,
    /// Max-Age option, in seconds.
    pub max_age: Option<u32>,
    /// Observe option.
    pub observe: Option<u32>,
    /// Decoded body.
    pub payload: Payload,
}

impl Response {
    /// Outcome reported when no response arrived before the deadline.
    #[must_use]
    pub const fn timeout() -> Self {
        Self {
            code: Code::INTERNAL_SERVER_ERROR,
            max_age: None,
            observe: None,
            payload: Payload::Empty,
        }
    }

    pub(crate) fn from_message(message: &Message, payload: Payload) -> Self {
        Self {
            code: message.code,
            max_age: message.max_age(),
            observe: message.observe(),
            payload,
        }
    }
}

/// Server-pushed update for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Token of the subscription the update belongs to.
    pub token: Token,
    /// Response code.
    pub code: Code,
    /// Observe sequence number.
    pub observe: Option<u32>,
    /// Max-Age option, in seconds.
    pub max_age: Option<u32>,
    /// Decoded body.
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::{fixture, rstest};

    use super::*;
    use crate::session::env::SessionSettings;

    #[fixture]
    fn env() -> Env { Env::new(&SessionSettings::default()) }

    fn observe(kind: Observe) -> Request {
        Request::new(RequestKind::Mitigation, Method::Get)
            .with_query(["cuid=dz6pHjaADkaFTbjr0JGBpw"])
            .with_observe(kind)
    }

    #[rstest]
    fn re_register_reuses_token(mut env: Env) {
        let first = create_message(&mut env, &observe(Observe::Register));
        let second = create_message(&mut env, &observe(Observe::Register));

        assert_eq!(first.token, second.token);
        assert_ne!(first.message_id, second.message_id);
        assert_eq!(env.request_queries.len(), 1);
        assert_eq!(
            env.token_for_query("/cuid=dz6pHjaADkaFTbjr0JGBpw"),
            Some(&first.token)
        );
    }

    #[rstest]
    fn deregister_sends_original_token(mut env: Env) {
        let register = create_message(&mut env, &observe(Observe::Register));
        let deregister = create_message(&mut env, &observe(Observe::Deregister));

        assert_eq!(deregister.token, register.token);
        assert_eq!(deregister.observe(), Some(1));
        assert!(env.token_for_query("/cuid=dz6pHjaADkaFTbjr0JGBpw").is_none());
    }

    #[rstest]
    fn unknown_observe_value_leaves_table_alone(mut env: Env) {
        let mut request = Request::new(RequestKind::Mitigation, Method::Get).with_query(["cuid=a"]);
        request.options.observe = Some(7);

        let message = create_message(&mut env, &request);

        assert_eq!(message.observe(), None);
        assert!(env.request_queries.is_empty());
    }

    #[rstest]
    fn path_carries_query_segments(mut env: Env) {
        let request = Request::new(RequestKind::SessionConfiguration, Method::Get).with_query(["sid=123"]);
        let message = create_message(&mut env, &request);
        assert_eq!(message.path(), "/.well-known/dots/config/sid=123");
        assert!(message.is_confirmable());
    }

    #[rstest]
    fn mitigation_read_gets_initial_block(mut env: Env) {
        env.initial_block_size = Some(2);
        let message = create_message(&mut env, &Request::new(RequestKind::Mitigation, Method::Get));
        assert_eq!(message.block2(), Some(Block::new(0, false, 2)));

        let put = create_message(&mut env, &Request::new(RequestKind::Mitigation, Method::Put));
        assert_eq!(put.block2(), None);
    }

    #[rstest]
    fn body_and_if_match_are_attached(mut env: Env) {
        let request = Request::new(RequestKind::Mitigation, Method::Put)
            .with_if_match(Vec::new())
            .with_body(&serde_json::json!({ "a": 1 }))
            .expect("encode");
        let message = create_message(&mut env, &request);
        assert_eq!(message.option(OptionNumber::IF_MATCH), Some(&[][..]));
        assert_eq!(message.content_format(), Some(ContentFormat::CBOR));
        assert!(!message.payload.is_empty());
    }
}
