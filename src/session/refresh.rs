//! Session-configuration refresh cycle.
//!
//! After a successful configuration read the runner schedules a one-shot
//! refresh `Max-Age - interval_before_max_age` later. The refresh re-sends
//! the originating request on a fresh token; its response restarts the
//! heartbeat and schedules the next refresh.

use std::time::Duration;

use tokio_util::time::delay_queue::Key;
use tracing::{debug, info};

use super::{
    env::RetryProfile,
    exchange::{ExchangeTask, Handler},
    request::Payload,
    runner::{Runner, Timer},
};
use crate::{
    message::{Code, Message, Token},
    payload::{ConfigurationResponse, Decoded, decoder_for},
    request_kind::{Method, RequestKind},
};

/// The pending or running refresh.
#[derive(Debug)]
pub(crate) struct RefreshTask {
    pub message: Message,
    timer: Option<Key>,
    in_flight: Option<Token>,
}

impl Runner {
    /// Cancel the refresh timer and any refresh exchange in flight.
    /// Idempotent.
    pub(super) fn stop_session_config(&mut self) {
        let Some(task) = self.env.session_config.take() else {
            return;
        };
        if let Some(key) = &task.timer {
            self.timers.try_remove(key);
        }
        if let Some(token) = &task.in_flight {
            self.take_in_flight(token);
        }
        debug!("session config refresh stopped");
    }

    /// Replace the refresh with one firing `max_age - interval_before_max_age`
    /// from now. An absent Max-Age counts as zero; a non-positive window
    /// leaves no refresh scheduled.
    pub(super) fn refresh_session_config(&mut self, max_age: Option<u32>, message: Message) {
        self.stop_session_config();
        let max_age = Duration::from_secs(u64::from(max_age.unwrap_or(0)));
        let margin = self.env.interval_before_max_age;
        let Some(fresh) = max_age.checked_sub(margin).filter(|d| !d.is_zero()) else {
            info!(max_age = ?max_age, margin = ?margin, "Max-Age within interval-before-max-age; not refreshing session config");
            return;
        };
        let key = self.timers.insert(Timer::RefreshDue, fresh);
        self.env.session_config = Some(RefreshTask {
            message,
            timer: Some(key),
            in_flight: None,
        });
        debug!(after = ?fresh, "session config refresh scheduled");
    }

    /// Refresh timer fired: re-send the originating request.
    pub(super) async fn refresh_due(&mut self) {
        let id = self.env.new_message_id();
        let Some(task) = self.env.session_config.as_mut() else {
            return;
        };
        task.timer = None;
        let mut message = task.message.clone();
        message.token = Token::random();
        message.message_id = id;
        task.in_flight = Some(message.token.clone());

        let profile = if message.is_confirmable() {
            self.env.retransmission
        } else {
            self.env.non_confirmable
        };
        info!(token = %message.token, path = %message.path(), "refreshing session config");
        self.submit(ExchangeTask {
            message,
            profile,
            handler: Handler::SessionConfigRefresh,
        })
        .await;
    }

    /// Response to a refresh exchange.
    pub(super) async fn session_config_refreshed(&mut self, request: Message, response: &Message) {
        let Some(task) = self.env.session_config.as_mut() else {
            debug!("refresh response after the refresh was stopped; ignored");
            return;
        };
        task.in_flight = None;
        info!(code = %response.code, max_age = ?response.max_age(), "session config refresh response");

        let decode = decoder_for(RequestKind::SessionConfiguration, Method::Get);
        let Payload::Decoded(Decoded::ConfigurationResponse(config)) = Payload::from_message(response, decode) else {
            return;
        };
        if response.code == Code::CONTENT {
            self.apply_session_config(&config).await;
            self.refresh_session_config(response.max_age(), request);
        }
    }

    /// Adopt the server's heartbeat and retransmission parameters for the
    /// configured mode and restart the heartbeat with them.
    pub(super) async fn apply_session_config(&mut self, config: &ConfigurationResponse) {
        let params = config.heartbeat_params(self.env.session_config_mode);
        debug!(
            interval = ?params.interval,
            missing_hb_allowed = params.missing_hb_allowed,
            mode = %self.env.session_config_mode,
            "session configuration received; restarting heartbeat"
        );
        self.env.retransmission = RetryProfile::from_server(&params);
        self.start_heartbeat(params.interval, params.missing_hb_allowed).await;
    }
}
