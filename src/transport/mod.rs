//! Transport collaborators of the session engine.
//!
//! The engine only needs to hand messages to a [`Transport`] and to trigger a
//! [`Reconnect`] when the heartbeat allowance runs out. [`UdpTransport`] is
//! the plain-datagram adapter used by the binary; secured transports plug in
//! behind the same trait.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use async_trait::async_trait;
use futures_util::{
    SinkExt,
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use thiserror::Error;
use tokio::{
    net::{UdpSocket, lookup_host},
    sync::Mutex,
};
use tokio_util::udp::UdpFramed;
use tracing::{debug, warn};

use crate::{
    message::{DatagramCodec, Message},
    session::SessionHandle,
};

/// Errors raised by transport adapters.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// The server address did not resolve.
    #[error("could not resolve server address '{0}'")]
    Resolve(String),
    /// The transport was shut down.
    #[error("transport closed")]
    Closed,
}

/// Outbound half of a connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to the server.
    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

/// Procedure run when the connection is presumed dead.
pub trait Reconnect: Send + Sync {
    /// Tear down and re-establish the connection.
    fn reconnect(&self);
}

type Framed = UdpFramed<DatagramCodec>;

/// Inbound half of a [`UdpTransport`].
pub type Inbound = SplitStream<Framed>;

/// Datagram transport bound to a single server.
pub struct UdpTransport {
    peer: SocketAddr,
    sink: Mutex<SplitSink<Framed, (Message, SocketAddr)>>,
}

impl UdpTransport {
    /// Resolve `server` and open a socket connected to it.
    ///
    /// # Errors
    /// Returns [`TransportError`] if resolution or socket setup fails.
    pub async fn connect(server: &str) -> Result<(Self, Inbound), TransportError> {
        let peer = lookup_host(server)
            .await?
            .next()
            .ok_or_else(|| TransportError::Resolve(server.to_owned()))?;
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!(peer = %peer, local = ?socket.local_addr().ok(), "udp transport connected");

        let (sink, inbound) = UdpFramed::new(socket, DatagramCodec::new()).split();
        Ok((
            Self {
                peer,
                sink: Mutex::new(sink),
            },
            inbound,
        ))
    }

    /// Address of the server.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr { self.peer }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send((message.clone(), self.peer))
            .await
            .map_err(TransportError::from)
    }
}

/// Feed datagrams from `inbound` into `session` until either side closes.
/// Malformed datagrams are logged and skipped.
pub async fn pump_inbound(mut inbound: Inbound, session: SessionHandle) {
    while let Some(item) = inbound.next().await {
        match item {
            Ok((message, from)) => {
                debug!(from = %from, "datagram received");
                if session.deliver(message).is_err() {
                    debug!("session closed; stopping inbound pump");
                    break;
                }
            }
            Err(error) => warn!(error = %error, "dropping malformed datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use std::{sync::Arc, time::Duration};

    use rstest::rstest;

    use super::*;
    use crate::{
        message::{Code, MessageType, Token},
        session::SessionSettings,
    };

    struct NoReconnect;

    impl Reconnect for NoReconnect {
        fn reconnect(&self) {}
    }

    #[rstest]
    #[tokio::test]
    async fn udp_transport_sends_encoded_messages() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = server.local_addr().expect("addr").to_string();
        let (transport, _inbound) = UdpTransport::connect(&addr).await.expect("connect");

        let msg = Message::new(MessageType::Confirmable, Code::GET, 7, Token::random());
        transport.send(&msg).await.expect("send");

        let mut buf = [0_u8; 64];
        let (len, _) = server.recv_from(&mut buf).await.expect("recv");
        let parsed = crate::message::parse_message(buf.get(..len).expect("len")).expect("parse");
        assert_eq!(parsed, msg);
    }

    #[rstest]
    #[tokio::test]
    async fn pump_skips_garbage_and_delivers_messages() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = server.local_addr().expect("addr").to_string();
        let (transport, inbound) = UdpTransport::connect(&addr).await.expect("connect");
        let (session, _notifications) =
            SessionHandle::spawn(&SessionSettings::default(), Arc::new(transport), Arc::new(NoReconnect));
        tokio::spawn(pump_inbound(inbound, session.clone()));

        // Learn the client's address from a ping.
        session.start_heartbeat(Duration::from_secs(60), 1).expect("start");
        let mut buf = [0_u8; 64];
        let (_, client) = server.recv_from(&mut buf).await.expect("ping");

        server.send_to(&[0x01], client).await.expect("garbage");
        let stray = Message::new(MessageType::Confirmable, Code::CONTENT, 0x0bad, Token::random());
        server
            .send_to(&stray.to_bytes().expect("encode"), client)
            .await
            .expect("stray");

        let (len, _) = server.recv_from(&mut buf).await.expect("reset");
        let reply = crate::message::parse_message(buf.get(..len).expect("len")).expect("parse");
        assert_eq!(reply, Message::reset(0x0bad));
        session.shutdown().expect("shutdown");
    }
}
