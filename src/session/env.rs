//! Per-connection session state.
//!
//! [`Env`] is owned by the runner task and only mutated from inside its loop.
//! Callers read it through [`EnvSnapshot`].

use std::{collections::HashMap, time::Duration};

use rand::Rng;

use super::{
    exchange::InFlight,
    fragment::{FragmentBuffer, FragmentKey},
    heartbeat::Heartbeat,
    refresh::RefreshTask,
};
use crate::{
    message::Token,
    payload::{HeartbeatParams, SessionConfigMode},
};

/// Retransmission schedule of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProfile {
    /// Delay between retransmissions of a confirmable message.
    pub interval: Duration,
    /// Retransmissions sent before giving up on an acknowledgement.
    pub max_retries: u32,
    /// Overall deadline for a response.
    pub timeout: Duration,
}

impl RetryProfile {
    /// Fixed profile used to pull the remaining fragments of a payload.
    pub const BLOCK_TRANSFER: Self = Self::new(Duration::from_secs(2), 2, Duration::from_secs(10));

    /// Build a profile.
    #[must_use]
    pub const fn new(interval: Duration, max_retries: u32, timeout: Duration) -> Self {
        Self {
            interval,
            max_retries,
            timeout,
        }
    }

    /// Profile advertised by the server's session configuration.
    ///
    /// The deadline is the server's maximum transmit wait:
    /// `ack_timeout * ack_random_factor * (2^(max_retransmit + 1) - 1)`.
    #[must_use]
    pub fn from_server(params: &HeartbeatParams) -> Self {
        let attempts = 1_u32
            .checked_shl(params.max_retransmit.saturating_add(1))
            .map_or(u32::MAX, |n| n.saturating_sub(1));
        let wait = params.ack_timeout.as_secs_f64() * params.ack_random_factor.max(1.0) * f64::from(attempts);
        Self {
            interval: params.ack_timeout,
            max_retries: params.max_retransmit,
            timeout: Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX),
        }
    }
}

/// Static settings a session starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Profile for confirmable requests until the server advertises its own.
    pub confirmable: RetryProfile,
    /// Profile for non-confirmable requests.
    pub non_confirmable: RetryProfile,
    /// Safety margin subtracted from Max-Age before refreshing the session
    /// configuration.
    pub interval_before_max_age: Duration,
    /// Size exponent of the first Block2 option on mitigation reads.
    pub initial_block_size: Option<u8>,
    /// Configuration half driving the heartbeat.
    pub session_config_mode: SessionConfigMode,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            confirmable: RetryProfile::new(Duration::from_secs(2), 3, Duration::from_secs(20)),
            non_confirmable: RetryProfile::new(Duration::from_secs(2), 0, Duration::from_secs(10)),
            interval_before_max_age: Duration::from_secs(10),
            initial_block_size: None,
            session_config_mode: SessionConfigMode::Idle,
        }
    }
}

/// An observed query: the subscription a token stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestQuery {
    /// Query parameters as `/a=1/b=2`.
    pub query: String,
    /// Mitigations in the latest read or notification for this query.
    pub mitigation_count: Option<usize>,
    /// `true` when the latest count came from a notification.
    pub is_notification: bool,
}

impl RequestQuery {
    /// Fresh subscription for `query` with no count yet.
    #[must_use]
    pub const fn new(query: String) -> Self {
        Self {
            query,
            mitigation_count: None,
            is_notification: false,
        }
    }
}

/// Join query parameters into the form stored in [`RequestQuery::query`].
#[must_use]
pub fn query_params_to_string(params: &[String]) -> String {
    params.iter().fold(String::new(), |mut acc, p| {
        acc.push('/');
        acc.push_str(p);
        acc
    })
}

/// Session state shared by every exchange on one connection.
#[derive(Debug)]
pub struct Env {
    pub(crate) request_queries: HashMap<Token, RequestQuery>,
    pub(crate) fragments: FragmentBuffer,
    pub(crate) in_flight: HashMap<Token, InFlight>,
    pub(crate) missing_heartbeats: u32,
    pub(crate) heartbeat_allowed: u32,
    pub(crate) heartbeat: Option<Heartbeat>,
    pub(crate) session_config: Option<RefreshTask>,
    pub(crate) retransmission: RetryProfile,
    pub(crate) non_confirmable: RetryProfile,
    pub(crate) interval_before_max_age: Duration,
    pub(crate) initial_block_size: Option<u8>,
    pub(crate) session_config_mode: SessionConfigMode,
    next_message_id: u16,
}

impl Env {
    /// Create the state for a new session.
    #[must_use]
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            request_queries: HashMap::new(),
            fragments: FragmentBuffer::new(),
            in_flight: HashMap::new(),
            missing_heartbeats: 0,
            heartbeat_allowed: 0,
            heartbeat: None,
            session_config: None,
            retransmission: settings.confirmable,
            non_confirmable: settings.non_confirmable,
            interval_before_max_age: settings.interval_before_max_age,
            initial_block_size: settings.initial_block_size,
            session_config_mode: settings.session_config_mode,
            next_message_id: rand::thread_rng().r#gen(),
        }
    }

    /// Tokens of the exchanges currently awaiting a response.
    pub fn requests(&self) -> impl Iterator<Item = &Token> { self.in_flight.keys() }

    /// Fragment reassembly buffer.
    #[must_use]
    pub const fn blocks(&self) -> &FragmentBuffer { &self.fragments }

    /// Subscription recorded for `token`.
    #[must_use]
    pub fn request_query(&self, token: &Token) -> Option<&RequestQuery> { self.request_queries.get(token) }

    /// Token of the subscription for `query`, if any.
    #[must_use]
    pub fn token_for_query(&self, query: &str) -> Option<&Token> {
        self.request_queries
            .iter()
            .find(|(_, q)| q.query == query)
            .map(|(token, _)| token)
    }

    /// Record a subscription under `token`.
    pub fn add_request_query(&mut self, token: Token, query: RequestQuery) {
        self.request_queries.insert(token, query);
    }

    /// Forget the subscription under `token`.
    pub fn remove_request_query(&mut self, token: &Token) -> Option<RequestQuery> {
        self.request_queries.remove(token)
    }

    /// Update the mitigation count of the subscription under `token`.
    /// Tokens without a subscription are ignored.
    pub fn set_mitigation_count(&mut self, token: &Token, count: usize, is_notification: bool) {
        if let Some(query) = self.request_queries.get_mut(token) {
            query.mitigation_count = Some(count);
            query.is_notification = is_notification;
        }
    }

    /// `true` while the missed-heartbeat counter is within the allowance.
    #[must_use]
    pub const fn is_heartbeat_allowed(&self) -> bool { self.missing_heartbeats <= self.heartbeat_allowed }

    /// Allocate the next message id.
    pub const fn new_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = id.wrapping_add(1);
        id
    }

    /// Copy of the observable state.
    #[must_use]
    pub fn snapshot(&self) -> EnvSnapshot {
        let mut in_flight: Vec<Token> = self.in_flight.keys().cloned().collect();
        in_flight.sort();
        EnvSnapshot {
            request_queries: self.request_queries.clone(),
            in_flight,
            fragments: self.fragments.keys().cloned().collect(),
            missing_heartbeats: self.missing_heartbeats,
            heartbeat_allowed: self.heartbeat_allowed,
            heartbeat_interval: self.heartbeat.as_ref().map(|hb| hb.interval),
            refresh_scheduled: self.session_config.is_some(),
            retransmission: self.retransmission,
        }
    }
}

/// Read-only copy of [`Env`] handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot {
    /// Active subscriptions by token.
    pub request_queries: HashMap<Token, RequestQuery>,
    /// Tokens awaiting a response, sorted.
    pub in_flight: Vec<Token>,
    /// Fragment chains being reassembled.
    pub fragments: Vec<FragmentKey>,
    /// Consecutive unacknowledged heartbeats.
    pub missing_heartbeats: u32,
    /// Heartbeats that may go unacknowledged before reconnecting.
    pub heartbeat_allowed: u32,
    /// Interval of the running heartbeat, if any.
    pub heartbeat_interval: Option<Duration>,
    /// `true` while a session-configuration refresh is pending.
    pub refresh_scheduled: bool,
    /// Current profile for confirmable requests.
    pub retransmission: RetryProfile,
}

impl EnvSnapshot {
    /// Token of the subscription for `query`, if any.
    #[must_use]
    pub fn token_for_query(&self, query: &str) -> Option<&Token> {
        self.request_queries
            .iter()
            .find(|(_, q)| q.query == query)
            .map(|(token, _)| token)
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(&[], "")]
    #[case(&["cuid=abc"], "/cuid=abc")]
    #[case(&["cuid=abc", "mid=123"], "/cuid=abc/mid=123")]
    fn query_string_prefixes_each_parameter(#[case] params: &[&str], #[case] expected: &str) {
        let owned: Vec<String> = params.iter().map(|p| (*p).to_owned()).collect();
        assert_eq!(query_params_to_string(&owned), expected);
    }

    #[rstest]
    fn message_ids_wrap() {
        let mut env = Env::new(&SessionSettings::default());
        env.next_message_id = u16::MAX;
        assert_eq!(env.new_message_id(), u16::MAX);
        assert_eq!(env.new_message_id(), 0);
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    fn heartbeat_allowance_is_inclusive(#[case] missing: u32, #[case] allowed: bool) {
        let mut env = Env::new(&SessionSettings::default());
        env.heartbeat_allowed = 2;
        env.missing_heartbeats = missing;
        assert_eq!(env.is_heartbeat_allowed(), allowed);
    }

    #[rstest]
    fn mitigation_count_only_updates_known_tokens() {
        let mut env = Env::new(&SessionSettings::default());
        let token = Token::random();
        env.add_request_query(token.clone(), RequestQuery::new("/cuid=abc".to_owned()));

        env.set_mitigation_count(&token, 3, true);
        env.set_mitigation_count(&Token::random(), 9, false);

        let query = env.request_query(&token).expect("recorded");
        assert_eq!(query.mitigation_count, Some(3));
        assert!(query.is_notification);
        assert_eq!(env.request_queries.len(), 1);
    }

    #[rstest]
    fn server_profile_uses_max_transmit_wait() {
        let params = HeartbeatParams {
            interval: Duration::from_secs(30),
            missing_hb_allowed: 5,
            max_retransmit: 3,
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
        };
        let profile = RetryProfile::from_server(&params);
        assert_eq!(profile.interval, Duration::from_secs(2));
        assert_eq!(profile.max_retries, 3);
        assert_eq!(profile.timeout, Duration::from_secs(45));
    }
}
