//! Message exchange tasks: send, retransmit, expire.
//!
//! Every outstanding exchange is stored in [`Env`](super::Env) under its
//! token together with the keys of its retransmission and expiry timers.
//! Removing an exchange always removes both keys, so a stale timer never
//! fires for it.

use tokio::sync::oneshot;
use tokio_util::time::delay_queue::Key;
use tracing::{debug, info};

use super::{
    env::RetryProfile,
    request::Response,
    runner::{Runner, Timer},
};
use crate::{
    message::{Message, Token},
    request_kind::{Method, RequestKind},
};

/// Caller waiting on a direct request.
#[derive(Debug)]
pub(crate) struct RequestContext {
    pub kind: RequestKind,
    pub method: Method,
    pub query_params: Vec<String>,
    pub reply: oneshot::Sender<Response>,
}

impl RequestContext {
    pub fn reply(self, response: Response) {
        if self.reply.send(response).is_err() {
            debug!(kind = %self.kind, "caller went away before the response arrived");
        }
    }
}

/// What to do when an exchange resolves.
#[derive(Debug)]
pub(crate) enum Handler {
    /// Deliver the decoded response to a caller.
    Request(RequestContext),
    /// Continue reassembling a notification for `subscription`.
    NotificationBlock { subscription: Token },
    /// Apply a refreshed session configuration.
    SessionConfigRefresh,
}

/// One outbound exchange.
#[derive(Debug)]
pub(crate) struct ExchangeTask {
    pub message: Message,
    pub profile: RetryProfile,
    pub handler: Handler,
}

/// Bookkeeping for an exchange awaiting its response.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub task: ExchangeTask,
    retries_left: u32,
    retransmit: Option<Key>,
    expiry: Key,
}

impl Runner {
    /// Send `task` and arm its timers. A task already in flight on the same
    /// token is superseded and resolved as timed out.
    pub(super) async fn submit(&mut self, task: ExchangeTask) {
        let token = task.message.token.clone();
        if let Some(previous) = self.take_in_flight(&token) {
            debug!(token = %token, "superseding exchange on the same token");
            abandon(previous.task.handler);
        }

        self.transmit(&task.message).await;

        let retransmit = (task.message.is_confirmable() && task.profile.max_retries > 0)
            .then(|| self.timers.insert(Timer::Retransmit(token.clone()), task.profile.interval));
        let expiry = self.timers.insert(Timer::Expire(token.clone()), task.profile.timeout);
        self.env.in_flight.insert(
            token,
            InFlight {
                retries_left: task.profile.max_retries,
                retransmit,
                expiry,
                task,
            },
        );
    }

    /// Remove the exchange on `token` and cancel its timers.
    pub(super) fn take_in_flight(&mut self, token: &Token) -> Option<InFlight> {
        let entry = self.env.in_flight.remove(token)?;
        if let Some(key) = &entry.retransmit {
            self.timers.try_remove(key);
        }
        self.timers.try_remove(&entry.expiry);
        Some(entry)
    }

    /// Resend the message on `token` if retries remain.
    pub(super) async fn retransmit(&mut self, token: &Token) {
        let Some(entry) = self.env.in_flight.get_mut(token) else {
            return;
        };
        entry.retransmit = None;
        if entry.retries_left == 0 {
            return;
        }
        entry.retries_left = entry.retries_left.saturating_sub(1);
        let remaining = entry.retries_left;
        let interval = entry.task.profile.interval;
        let message = entry.task.message.clone();

        debug!(token = %token, id = message.message_id, remaining, "retransmitting");
        self.transmit(&message).await;

        if remaining > 0 {
            let key = self.timers.insert(Timer::Retransmit(token.clone()), interval);
            if let Some(entry) = self.env.in_flight.get_mut(token) {
                entry.retransmit = Some(key);
            }
        }
    }

    /// The deadline of the exchange on `token` passed: drop its transient
    /// state and run its timeout path. Subscriptions are kept.
    pub(super) fn expire(&mut self, token: &Token) {
        let Some(entry) = self.env.in_flight.remove(token) else {
            return;
        };
        if let Some(key) = &entry.retransmit {
            self.timers.try_remove(key);
        }
        self.fail(token, entry.task.handler, "timed out");
    }

    /// The server reset the confirmable exchange sent as `message_id`:
    /// resolve it now instead of waiting for its deadline.
    pub(super) fn reject(&mut self, message_id: u16) -> bool {
        let Some(token) = self.confirmable_in_flight(message_id).map(|e| e.task.message.token.clone()) else {
            return false;
        };
        let Some(entry) = self.take_in_flight(&token) else {
            return false;
        };
        self.fail(&token, entry.task.handler, "reset by server");
        true
    }

    fn fail(&mut self, token: &Token, handler: Handler, reason: &'static str) {
        self.env.fragments.remove_token(token);
        match handler {
            Handler::Request(ctx) => {
                info!(token = %token, kind = %ctx.kind, method = %ctx.method, reason, "request failed");
                ctx.reply(Response::timeout());
            }
            Handler::NotificationBlock { subscription } => {
                info!(token = %token, subscription = %subscription, reason, "notification block transfer failed");
            }
            Handler::SessionConfigRefresh => {
                info!(reason, "session config refresh failed");
                self.stop_session_config();
            }
        }
    }

    fn confirmable_in_flight(&mut self, message_id: u16) -> Option<&mut InFlight> {
        self.env
            .in_flight
            .values_mut()
            .find(|e| e.task.message.is_confirmable() && e.task.message.message_id == message_id)
    }

    /// Match an empty acknowledgement to a confirmable exchange and stop
    /// retransmitting it. The exchange keeps waiting for its response.
    pub(super) fn acknowledge(&mut self, message_id: u16) -> bool {
        let Some(entry) = self.confirmable_in_flight(message_id) else {
            return false;
        };
        entry.retries_left = 0;
        let retransmit = entry.retransmit.take();
        let token = entry.task.message.token.clone();
        if let Some(key) = retransmit {
            self.timers.try_remove(&key);
        }
        debug!(token = %token, id = message_id, "exchange acknowledged, awaiting response");
        true
    }
}

fn abandon(handler: Handler) {
    match handler {
        Handler::Request(ctx) => ctx.reply(Response::timeout()),
        Handler::NotificationBlock { subscription } => {
            debug!(subscription = %subscription, "notification block transfer superseded");
        }
        Handler::SessionConfigRefresh => debug!("session config refresh superseded"),
    }
}
