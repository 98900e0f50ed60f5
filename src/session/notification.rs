//! Server-pushed notifications and their block-wise continuation.

use tracing::{debug, error, info, warn};

use super::{
    env::RetryProfile,
    exchange::{ExchangeTask, Handler},
    fragment::{BlockStatus, FragmentKey},
    request::{Notification, Payload},
    runner::Runner,
};
use crate::{
    message::{Block, Code, ETag, Message, MessageType, Token},
    payload::{Decoded, NotificationClass, PayloadError, decode_notification, is_diagnostic},
    request_kind::RequestKind,
};

/// Exchange a notification fragment arrived on, when it was pulled by a
/// continuation request rather than pushed.
#[derive(Debug)]
pub(crate) struct Continuation {
    pub request: Message,
    pub subscription: Token,
}

impl Runner {
    /// Handle a notification or a continuation fragment of one.
    pub(super) async fn handle_notification(&mut self, continuation: Option<Continuation>, message: Message) {
        let status = match self.env.fragments.check_block(&message) {
            Ok(status) => status,
            Err(error) => {
                warn!(token = %message.token, error = %error, "discarding notification fragments");
                return;
            }
        };
        match status {
            BlockStatus::More { next, tag } => self.continue_notification(continuation, &message, next, tag).await,
            BlockStatus::Last { key } => {
                let subscription = continuation.map_or_else(|| message.token.clone(), |c| c.subscription);
                match self.env.fragments.take(&key) {
                    Some(partial) => self.notify(subscription, &partial.into_message()).await,
                    None => self.notify(subscription, &message).await,
                }
            }
            BlockStatus::Whole => {
                let subscription = continuation.map_or_else(|| message.token.clone(), |c| c.subscription);
                self.notify(subscription, &message).await;
            }
        }
    }

    async fn continue_notification(
        &mut self,
        continuation: Option<Continuation>,
        message: &Message,
        next: Block,
        tag: Option<ETag>,
    ) {
        let id = self.env.new_message_id();
        let (mut request, subscription) = if let Some(c) = continuation {
            let mut request = c.request;
            request.message_id = id;
            (request, c.subscription)
        } else {
            debug!(token = %message.token, "first notification fragment; requesting the remaining fragments");
            let key = FragmentKey {
                tag: tag.clone(),
                token: message.token.clone(),
            };
            let Some(query) = self.env.request_query(&message.token).map(|q| q.query.clone()) else {
                error!(token = %message.token, "no request query for notification; abandoning fragment chain");
                self.env.fragments.take(&key);
                return;
            };
            let kind = if message.is_confirmable() {
                MessageType::Confirmable
            } else {
                MessageType::NonConfirmable
            };
            let mut request = Message::new(kind, Code::GET, id, Token::random());
            request.set_path(&format!("{}{}", RequestKind::Mitigation.path(), query));
            self.env.fragments.rekey(&key, request.token.clone());
            (request, message.token.clone())
        };

        request.set_block2(next);
        request.set_etag(tag.as_ref());
        self.submit(ExchangeTask {
            message: request,
            profile: RetryProfile::BLOCK_TRANSFER,
            handler: Handler::NotificationBlock { subscription },
        })
        .await;
    }

    /// Log a complete notification, apply its effects on the session and
    /// forward it to the caller.
    async fn notify(&mut self, subscription: Token, message: &Message) {
        info!(code = %message.code, observe = ?message.observe(), max_age = ?message.max_age(), "notification");

        let payload = if message.payload.is_empty() {
            Payload::Empty
        } else if is_diagnostic(message) {
            let text = String::from_utf8_lossy(&message.payload).into_owned();
            debug!(text = %text, "server sent notification with diagnostic");
            Payload::Diagnostic(text)
        } else {
            debug!(payload = %hex::encode(&message.payload), "raw payload");
            self.apply_notification(&subscription, message).await
        };

        let notification = Notification {
            token: subscription,
            code: message.code,
            observe: message.observe(),
            max_age: message.max_age(),
            payload,
        };
        if self.notifications.send(notification).is_err() {
            debug!("no notification listener");
        }
    }

    async fn apply_notification(&mut self, subscription: &Token, message: &Message) -> Payload {
        match decode_notification(&message.payload) {
            Ok((NotificationClass::Mitigation, decoded)) => {
                if let Some(count) = decoded.mitigation_count() {
                    self.env.set_mitigation_count(subscription, count, true);
                }
                info!(decoded = ?decoded, "CBOR decoded");
                Payload::Decoded(decoded)
            }
            Ok((_, Decoded::ConfigurationResponse(config))) => {
                debug!("session configuration notification; restarting heartbeat");
                self.apply_session_config(&config).await;
                // Only an existing refresh is rescheduled; after Max-Age lapsed
                // the server pushes instead.
                if let Some(origin) = self.env.session_config.as_ref().map(|t| t.message.clone()) {
                    self.refresh_session_config(message.max_age(), origin);
                }
                Payload::Decoded(Decoded::ConfigurationResponse(config))
            }
            Ok((_, decoded)) => Payload::Decoded(decoded),
            Err(PayloadError::UnknownNotification) => {
                warn!("unknown notification received");
                Payload::Empty
            }
            Err(error) => {
                warn!(error = %error, "CBOR decode failed");
                Payload::Empty
            }
        }
    }
}
