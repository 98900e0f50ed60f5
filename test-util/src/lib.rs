//! Utilities for integration tests.
//!
//! The `test-util` crate stands in for the network side of a session: a
//! [`RecordingTransport`] captures every outbound message, a
//! [`CountingReconnect`] records reconnect attempts, and the [`messages`]
//! module builds the server replies the tests feed back in.

pub mod messages;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use dots_client::{
    message::Message,
    session::{Notifications, Request, Response, SessionError, SessionHandle, SessionSettings},
    transport::{Reconnect, Transport, TransportError},
};
use tokio::{sync::mpsc, task::JoinHandle};

/// Transport that forwards outbound messages to a channel.
#[derive(Debug)]
pub struct RecordingTransport {
    sent: mpsc::UnboundedSender<Message>,
}

impl RecordingTransport {
    /// Create the transport and the receiver observing what it sends.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (Self { sent }, rx)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        tracing::trace!(message_id = message.message_id, "recorded outbound message");
        self.sent.send(message.clone()).map_err(|_| TransportError::Closed)
    }
}

/// Reconnect procedure that only counts invocations.
#[derive(Debug, Default)]
pub struct CountingReconnect {
    calls: AtomicUsize,
}

impl CountingReconnect {
    /// Number of reconnects requested so far.
    #[must_use]
    pub fn count(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl Reconnect for CountingReconnect {
    fn reconnect(&self) { self.calls.fetch_add(1, Ordering::SeqCst); }
}

/// A session wired to recording collaborators.
pub struct Harness {
    /// Handle to the running session.
    pub session: SessionHandle,
    /// Complete notifications delivered by the session.
    pub notifications: Notifications,
    /// Messages the session put on the wire.
    pub sent: mpsc::UnboundedReceiver<Message>,
    /// Reconnect counter.
    pub reconnect: Arc<CountingReconnect>,
}

impl Harness {
    /// Spawn a session with `settings` on the current runtime.
    #[must_use]
    pub fn spawn(settings: &SessionSettings) -> Self {
        let (transport, sent) = RecordingTransport::new();
        let reconnect = Arc::new(CountingReconnect::default());
        let (session, notifications) = SessionHandle::spawn(settings, Arc::new(transport), reconnect.clone());
        Self {
            session,
            notifications,
            sent,
            reconnect,
        }
    }

    /// Spawn a session with default settings.
    #[must_use]
    pub fn with_defaults() -> Self { Self::spawn(&SessionSettings::default()) }

    /// Submit `request` on a background task so the test can play the server
    /// while the caller waits.
    #[must_use]
    pub fn spawn_send(&self, request: Request) -> JoinHandle<Result<Response, SessionError>> {
        let session = self.session.clone();
        tokio::spawn(async move { session.send(request).await })
    }

    /// Wait for the next outbound message.
    ///
    /// # Panics
    /// Panics if the session stopped sending.
    pub async fn next_sent(&mut self) -> Message {
        match self.sent.recv().await {
            Some(message) => message,
            None => panic!("session transport closed"),
        }
    }

    /// Feed a server message into the session.
    ///
    /// # Panics
    /// Panics if the session runner is gone.
    pub fn deliver(&self, message: Message) {
        if let Err(error) = self.session.deliver(message) {
            panic!("deliver failed: {error}");
        }
    }

    /// Messages already sent, without waiting.
    pub fn drain_sent(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = self.sent.try_recv() {
            out.push(message);
        }
        out
    }
}
