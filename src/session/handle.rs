//! Clonable handle to a running session.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};

use super::{
    env::{Env, EnvSnapshot, SessionSettings},
    errors::SessionError,
    request::{Notification, Request, Response},
    runner::{Event, Runner},
};
use crate::{
    message::Message,
    transport::{Reconnect, Transport},
};

/// Receiver of server-pushed notifications.
pub type Notifications = mpsc::UnboundedReceiver<Notification>;

/// Handle used to submit work to a session runner.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl SessionHandle {
    /// Spawn a session runner on the current tokio runtime.
    ///
    /// Returns the handle and the stream of complete notifications. The
    /// runner stops on [`SessionHandle::shutdown`] or when every handle is
    /// dropped.
    #[must_use]
    pub fn spawn(
        settings: &SessionSettings,
        transport: Arc<dyn Transport>,
        reconnect: Arc<dyn Reconnect>,
    ) -> (Self, Notifications) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let runner = Runner::new(Env::new(settings), transport, reconnect, events_rx, notify_tx);
        tokio::spawn(runner.run());
        (Self { events: events_tx }, notify_rx)
    }

    fn submit(&self, event: Event) -> Result<(), SessionError> {
        self.events.send(event).map_err(|_| SessionError::Closed)
    }

    /// Send `request` and wait for its response. A request that gets no
    /// response in time resolves to [`Response::timeout`].
    ///
    /// # Errors
    /// Returns [`SessionError`] when the runner is gone.
    pub async fn send(&self, request: Request) -> Result<Response, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Event::Send { request, reply })?;
        rx.await.map_err(|_| SessionError::Dropped)
    }

    /// Feed a message received from the transport into the session.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] when the runner is gone.
    pub fn deliver(&self, message: Message) -> Result<(), SessionError> { self.submit(Event::Incoming(message)) }

    /// Start (or restart) the heartbeat.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] when the runner is gone.
    pub fn start_heartbeat(&self, interval: Duration, allowed: u32) -> Result<(), SessionError> {
        self.submit(Event::StartHeartbeat { interval, allowed })
    }

    /// Stop the heartbeat.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] when the runner is gone.
    pub fn stop_heartbeat(&self) -> Result<(), SessionError> { self.submit(Event::StopHeartbeat) }

    /// Cancel any pending session-configuration refresh.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] when the runner is gone.
    pub fn stop_session_config(&self) -> Result<(), SessionError> { self.submit(Event::StopSessionConfig) }

    /// Copy of the session state once every earlier command has been
    /// processed.
    ///
    /// # Errors
    /// Returns [`SessionError`] when the runner is gone.
    pub async fn snapshot(&self) -> Result<EnvSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Event::Snapshot(reply))?;
        rx.await.map_err(|_| SessionError::Dropped)
    }

    /// Stop the runner after the commands already queued.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] when the runner is already gone.
    pub fn shutdown(&self) -> Result<(), SessionError> { self.submit(Event::Shutdown) }
}
