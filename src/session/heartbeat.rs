//! Keepalive pings and the missed-heartbeat allowance.
//!
//! A ping is an empty confirmable message. Each tick sends a new ping; if the
//! previous one is still unacknowledged the miss counter grows first, and once
//! it passes the allowance the heartbeat stops and the connection is handed to
//! the reconnection procedure.

use std::time::Duration;

use tokio_util::time::delay_queue::Key;
use tracing::{debug, info, warn};

use super::runner::{Runner, Timer};
use crate::message::Message;

/// The running heartbeat.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    pub interval: Duration,
    outstanding: Option<u16>,
    tick: Option<Key>,
}

impl Runner {
    /// Replace any running heartbeat with one pinging every `interval`.
    pub(super) async fn start_heartbeat(&mut self, interval: Duration, allowed: u32) {
        self.stop_heartbeat();
        if interval.is_zero() {
            warn!("heartbeat interval is zero; heartbeat not started");
            return;
        }
        self.env.heartbeat_allowed = allowed;
        self.env.missing_heartbeats = 0;
        self.env.heartbeat = Some(Heartbeat {
            interval,
            outstanding: None,
            tick: None,
        });
        debug!(interval = ?interval, allowed, "heartbeat started");
        self.ping().await;
    }

    /// Stop the heartbeat. Idempotent.
    pub(super) fn stop_heartbeat(&mut self) {
        if let Some(hb) = self.env.heartbeat.take() {
            if let Some(key) = &hb.tick {
                self.timers.try_remove(key);
            }
            debug!("heartbeat stopped");
        }
    }

    /// Heartbeat timer fired.
    pub(super) async fn heartbeat_tick(&mut self) {
        let Some(hb) = self.env.heartbeat.as_mut() else {
            return;
        };
        hb.tick = None;
        if hb.outstanding.is_some() {
            self.env.missing_heartbeats = self.env.missing_heartbeats.saturating_add(1);
            info!(missing = self.env.missing_heartbeats, "ping timeout");
            if !self.env.is_heartbeat_allowed() {
                debug!(allowed = self.env.heartbeat_allowed, "exceeded missing-hb-allowed; stopping heartbeat");
                self.stop_heartbeat();
                self.reconnect.reconnect();
                return;
            }
        }
        self.ping().await;
    }

    /// Match an empty acknowledgement or reset to the outstanding ping.
    pub(super) fn ping_acknowledged(&mut self, message_id: u16) -> bool {
        let Some(hb) = self.env.heartbeat.as_mut() else {
            return false;
        };
        if hb.outstanding != Some(message_id) {
            return false;
        }
        hb.outstanding = None;
        self.env.missing_heartbeats = 0;
        debug!(id = message_id, "ping acknowledged");
        true
    }

    async fn ping(&mut self) {
        let id = self.env.new_message_id();
        let Some(hb) = self.env.heartbeat.as_mut() else {
            return;
        };
        hb.outstanding = Some(id);
        hb.tick = Some(self.timers.insert(Timer::PingTick, hb.interval));
        self.transmit(&Message::ping(id)).await;
    }
}
