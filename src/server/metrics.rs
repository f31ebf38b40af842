//! Traffic accounting.
//!
//! Only payload bytes relayed between the peer and the remote host are
//! counted. Handshake and control messages travel as text and are not
//! included, nor is any transport framing overhead.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::transport::QueueSnapshot;

/// Append-only byte counter shared by every session of a supervisor.
///
/// Keeps a running total and, when someone has subscribed, also forwards
/// each recorded chunk size to that single subscriber.
pub struct TrafficSink {
    total: AtomicU64,
    events: Mutex<Option<mpsc::UnboundedSender<u64>>>,
}

impl TrafficSink {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            events: Mutex::new(None),
        }
    }

    /// Record `bytes` relayed.
    pub fn record(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
        let mut events = self.events.lock();
        if let Some(tx) = events.as_ref() {
            if tx.send(bytes).is_err() {
                *events = None;
            }
        }
    }

    /// Receive every chunk size recorded from now on. Replaces any
    /// previous subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock() = Some(tx);
        rx
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for TrafficSink {
    fn default() -> Self {
        Self::new()
    }
}

/// The two sinks a supervisor hands to each of its sessions.
#[derive(Clone, Default)]
pub struct Telemetry {
    /// Payload bytes written to the peer
    pub sent_to_peer: Arc<TrafficSink>,
    /// Payload bytes read from the peer
    pub received_from_peer: Arc<TrafficSink>,
}

/// Per-session byte counters. Monotone.
#[derive(Default)]
pub struct SessionCounters {
    socket_sent: AtomicU64,
    socket_received: AtomicU64,
    channel_sent: AtomicU64,
    channel_received: AtomicU64,
    /// Socket chunks read but not yet forwarded (0 or 1)
    socket_pending: AtomicUsize,
    /// A socket read is outstanding
    socket_reading: AtomicBool,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_socket_sent(&self, bytes: u64) {
        self.socket_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_socket_received(&self, bytes: u64) {
        self.socket_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_channel_sent(&self, bytes: u64) {
        self.channel_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_channel_received(&self, bytes: u64) {
        self.channel_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn set_socket_pending(&self, pending: usize) {
        self.socket_pending.store(pending, Ordering::Relaxed);
    }

    pub(crate) fn set_socket_reading(&self, reading: bool) {
        self.socket_reading.store(reading, Ordering::Relaxed);
    }

    pub fn socket_sent(&self) -> u64 {
        self.socket_sent.load(Ordering::Relaxed)
    }

    pub fn socket_received(&self) -> u64 {
        self.socket_received.load(Ordering::Relaxed)
    }

    pub fn channel_sent(&self) -> u64 {
        self.channel_sent.load(Ordering::Relaxed)
    }

    pub fn channel_received(&self) -> u64 {
        self.channel_received.load(Ordering::Relaxed)
    }

    pub fn socket_queue(&self) -> QueueSnapshot {
        QueueSnapshot {
            size: self.socket_pending.load(Ordering::Relaxed),
            handling: self.socket_reading.load(Ordering::Relaxed),
        }
    }
}

/// Channel side of a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub sent: u64,
    pub received: u64,
    pub buffered: usize,
    pub queue: QueueSnapshot,
}

/// Socket side of a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketSnapshot {
    pub sent: u64,
    pub received: u64,
    pub queue: QueueSnapshot,
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub channel: ChannelSnapshot,
    pub socket: SocketSnapshot,
}

/// Point-in-time view of every live session of a supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorSnapshot {
    pub sessions: Vec<SessionSnapshot>,
}

impl SupervisorSnapshot {
    /// Bytes sent to the peer across all listed sessions.
    pub fn channel_sent(&self) -> u64 {
        self.sessions.iter().map(|s| s.channel.sent).sum()
    }

    /// Bytes received from the peer across all listed sessions.
    pub fn channel_received(&self) -> u64 {
        self.sessions.iter().map(|s| s.channel.received).sum()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
