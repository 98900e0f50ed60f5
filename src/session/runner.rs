//! The serialized task runner.
//!
//! One tokio task owns [`Env`] and a [`DelayQueue`] of timers. Caller
//! commands, inbound messages and timer expiries are handled one at a time
//! in the same loop, so no two exchanges ever mutate session state
//! concurrently.

use std::{future::poll_fn, sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use super::{
    env::{Env, EnvSnapshot, RetryProfile},
    exchange::{ExchangeTask, Handler, RequestContext},
    fragment::{BlockStatus, PartialPayload},
    notification::Continuation,
    request::{Notification, Payload, Request, Response, create_message},
};
use crate::{
    message::{Code, Message, MessageType, Token},
    payload::decoder_for,
    request_kind::{Method, RequestKind},
    transport::{Reconnect, Transport},
};

/// Timer kinds held in the runner's delay queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Timer {
    Retransmit(Token),
    Expire(Token),
    PingTick,
    RefreshDue,
}

/// Work submitted to the runner.
#[derive(Debug)]
pub(crate) enum Event {
    Send {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Incoming(Message),
    StartHeartbeat {
        interval: Duration,
        allowed: u32,
    },
    StopHeartbeat,
    StopSessionConfig,
    Snapshot(oneshot::Sender<EnvSnapshot>),
    Shutdown,
}

pub(crate) struct Runner {
    pub(super) env: Env,
    pub(super) timers: DelayQueue<Timer>,
    pub(super) reconnect: Arc<dyn Reconnect>,
    pub(super) notifications: mpsc::UnboundedSender<Notification>,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Runner {
    pub(super) fn new(
        env: Env,
        transport: Arc<dyn Transport>,
        reconnect: Arc<dyn Reconnect>,
        events: mpsc::UnboundedReceiver<Event>,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            env,
            timers: DelayQueue::new(),
            reconnect,
            notifications,
            transport,
            events,
        }
    }

    /// Process events and timers until shut down or every handle is gone.
    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(Event::Shutdown) | None => break,
                    Some(event) => self.handle_event(event).await,
                },
                Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)), if !self.timers.is_empty() => {
                    self.handle_timer(expired.into_inner()).await;
                }
            }
        }
        self.stop_heartbeat();
        self.stop_session_config();
        debug!("session runner stopped");
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Send { request, reply } => self.send_request(request, reply).await,
            Event::Incoming(message) => self.incoming(message).await,
            Event::StartHeartbeat { interval, allowed } => self.start_heartbeat(interval, allowed).await,
            Event::StopHeartbeat => self.stop_heartbeat(),
            Event::StopSessionConfig => self.stop_session_config(),
            Event::Snapshot(reply) => {
                if reply.send(self.env.snapshot()).is_err() {
                    debug!("snapshot requester went away");
                }
            }
            Event::Shutdown => {}
        }
    }

    async fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Retransmit(token) => self.retransmit(&token).await,
            Timer::Expire(token) => self.expire(&token),
            Timer::PingTick => self.heartbeat_tick().await,
            Timer::RefreshDue => self.refresh_due().await,
        }
    }

    /// Hand `message` to the transport. Send failures are logged; the
    /// exchange's own timers decide what happens next.
    pub(super) async fn transmit(&self, message: &Message) {
        debug!(
            kind = ?message.kind,
            code = %message.code,
            id = message.message_id,
            token = %message.token,
            "sending message"
        );
        if let Err(error) = self.transport.send(message).await {
            warn!(error = %error, token = %message.token, "failed to send message");
        }
    }

    async fn send_request(&mut self, request: Request, reply: oneshot::Sender<Response>) {
        let message = create_message(&mut self.env, &request);
        let profile = if message.is_confirmable() {
            self.env.retransmission
        } else {
            self.env.non_confirmable
        };
        let ctx = RequestContext {
            kind: request.kind,
            method: request.method,
            query_params: request.query_params,
            reply,
        };
        self.submit(ExchangeTask {
            message,
            profile,
            handler: Handler::Request(ctx),
        })
        .await;
    }

    /// Route an inbound message.
    ///
    /// Empty acknowledgements and resets match pings or confirmable
    /// exchanges by message id. Anything else is correlated by token: first
    /// against exchanges in flight, then against subscriptions. Inbound
    /// confirmable messages are acknowledged, or reset when nothing matches
    /// and they are not fragments.
    async fn incoming(&mut self, message: Message) {
        debug!(
            kind = ?message.kind,
            code = %message.code,
            id = message.message_id,
            token = %message.token,
            "incoming message"
        );
        if message.is_empty() {
            self.incoming_empty(&message).await;
            return;
        }

        let token = message.token.clone();
        if let Some(entry) = self.take_in_flight(&token) {
            self.acknowledge_inbound(&message).await;
            self.on_response(entry.task, message).await;
        } else if self.env.request_queries.contains_key(&token) || message.block2().is_some_and(|b| b.more) {
            // Uncorrelated fragment chains are abandoned by the notification path.
            self.acknowledge_inbound(&message).await;
            self.handle_notification(None, message).await;
        } else {
            warn!(token = %token, code = %message.code, "no exchange or subscription for token; dropping message");
            if message.is_confirmable() {
                self.transmit(&Message::reset(message.message_id)).await;
            }
        }
    }

    async fn incoming_empty(&mut self, message: &Message) {
        match message.kind {
            MessageType::Acknowledgement => {
                if !self.ping_acknowledged(message.message_id) && !self.acknowledge(message.message_id) {
                    debug!(id = message.message_id, "empty acknowledgement matches nothing");
                }
            }
            MessageType::Reset => {
                if !self.ping_acknowledged(message.message_id) && !self.reject(message.message_id) {
                    debug!(id = message.message_id, "reset matches nothing");
                }
            }
            MessageType::Confirmable => self.transmit(&Message::reset(message.message_id)).await,
            MessageType::NonConfirmable => debug!(id = message.message_id, "ignoring empty non-confirmable message"),
        }
    }

    async fn acknowledge_inbound(&self, message: &Message) {
        if message.is_confirmable() {
            self.transmit(&Message::ack(message.message_id)).await;
        }
    }

    async fn on_response(&mut self, task: ExchangeTask, message: Message) {
        match task.handler {
            Handler::Request(ctx) => self.request_response(task.message, ctx, message).await,
            Handler::NotificationBlock { subscription } => {
                let continuation = Continuation {
                    request: task.message,
                    subscription,
                };
                self.handle_notification(Some(continuation), message).await;
            }
            Handler::SessionConfigRefresh => self.session_config_refreshed(task.message, &message).await,
        }
    }

    async fn request_response(&mut self, mut request: Message, ctx: RequestContext, message: Message) {
        let message = match self.env.fragments.check_block(&message) {
            Ok(BlockStatus::More { next, tag }) => {
                request.message_id = self.env.new_message_id();
                request.set_block2(next);
                request.set_etag(tag.as_ref());
                debug!(token = %request.token, block = %next, "requesting next fragment");
                self.submit(ExchangeTask {
                    message: request,
                    profile: RetryProfile::BLOCK_TRANSFER,
                    handler: Handler::Request(ctx),
                })
                .await;
                return;
            }
            Ok(BlockStatus::Last { key }) => self
                .env
                .fragments
                .take(&key)
                .map_or(message, PartialPayload::into_message),
            Ok(BlockStatus::Whole) => message,
            Err(error) => {
                warn!(token = %message.token, error = %error, "discarding fragmented response");
                let mut head = message;
                head.payload.clear();
                head
            }
        };

        info!(code = %message.code, max_age = ?message.max_age(), observe = ?message.observe(), "response");
        let payload = Payload::from_message(&message, decoder_for(ctx.kind, ctx.method));

        if ctx.kind == RequestKind::Mitigation && ctx.method == Method::Get {
            if let Payload::Decoded(decoded) = &payload {
                if let Some(count) = decoded.mitigation_count() {
                    self.env.set_mitigation_count(&message.token, count, false);
                }
            }
        }

        if ctx.kind == RequestKind::SessionConfiguration {
            self.session_config_response(&ctx, &request, &message, &payload).await;
        }

        ctx.reply(Response::from_message(&message, payload));
    }

    async fn session_config_response(
        &mut self,
        ctx: &RequestContext,
        request: &Message,
        message: &Message,
        payload: &Payload,
    ) {
        match (ctx.method, message.code) {
            (Method::Get, Code::CONTENT) if !ctx.query_params.is_empty() => {
                debug!("session configuration read; updating heartbeat and refresh");
                if let Payload::Decoded(decoded) = payload {
                    if let Some(config) = decoded.configuration() {
                        self.apply_session_config(config).await;
                    }
                }
                self.refresh_session_config(message.max_age(), request.clone());
            }
            (Method::Put, Code::CREATED) => {
                debug!("session configuration created; stopping refresh");
                self.stop_session_config();
            }
            (Method::Delete, Code::DELETED) => {
                debug!("session configuration deleted; stopping refresh");
                self.stop_session_config();
            }
            _ => {}
        }
    }
}
