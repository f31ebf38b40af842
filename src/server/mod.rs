//! Exit-side proxy supervisor.
//!
//! Owns one transport connection and turns every channel the peer opens on
//! it into a [`Session`]:
//!
//! 1. **Isolation**: a failing session is logged and removed; the others and
//!    the supervisor carry on
//! 2. **Shared policy**: all sessions read the same [`ProxyConfig`]
//! 3. **Telemetry**: payload byte sinks aggregated across sessions, plus an
//!    on-demand [`SupervisorSnapshot`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Supervisor                            │
//! │  ┌───────────────────┐        ┌──────────────────────────┐  │
//! │  │ TransportConnection│──────▶│ accept loop              │  │
//! │  │ (exclusively owned)│ peer  │  label → Session map     │  │
//! │  └─────────┬─────────┘ chans  └────────────┬─────────────┘  │
//! │            │ disconnected                  │                │
//! │            ▼                               ▼                │
//! │  ┌───────────────────┐        ┌──────────────────────────┐  │
//! │  │ lifecycle task     │        │ Session: handshake,      │  │
//! │  │ stop → close       │        │ connect, relay, release  │  │
//! │  └───────────────────┘        └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
pub mod metrics;
pub mod session;

pub use config::{ProxyConfig, ProxyConfigFile};
pub use metrics::{SupervisorSnapshot, Telemetry, TrafficSink};
pub use session::{Session, SessionState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::proxy::TcpConnector;
use crate::sync::Signal;
use crate::transport::TransportConnection;

type SessionMap<C, N> = Arc<Mutex<HashMap<String, Arc<Session<C, N>>>>>;

/// Runs sessions for every channel the peer opens on one transport.
pub struct Supervisor<T: TransportConnection, N: TcpConnector> {
    config: Arc<ProxyConfig>,
    connector: Arc<N>,
    telemetry: Telemetry,
    sessions: SessionMap<T::Channel, N>,
    started: AtomicBool,
    stopping: Signal,
    stopped: Signal,
}

impl<T: TransportConnection, N: TcpConnector> Supervisor<T, N> {
    /// Create a supervisor. Nothing runs until [`start`](Self::start).
    pub fn new(config: ProxyConfig, connector: N) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            telemetry: Telemetry::default(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            started: AtomicBool::new(false),
            stopping: Signal::new(),
            stopped: Signal::new(),
        })
    }

    /// Take ownership of `transport` and start accepting channels.
    ///
    /// Resolves once the transport reports connected. Fails, and shuts the
    /// supervisor down, if it never connects or if the supervisor is
    /// stopped first.
    pub async fn start(self: &Arc<Self>, transport: T) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            if self.stopping.is_fired() {
                transport.close().await;
                return Err(Error::Stopped);
            }
            return Err(Error::AlreadyStarted);
        }

        let transport = Arc::new(transport);
        tokio::spawn(Arc::clone(self).lifecycle(Arc::clone(&transport)));

        let connected = tokio::select! {
            result = transport.connected() => result,
            _ = self.stopping.wait() => Err(Error::Stopped),
        };
        if let Err(e) = connected {
            self.stopping.fire();
            return Err(match e {
                Error::Stopped | Error::Transport(_) => e,
                other => Error::transport(other.to_string()),
            });
        }

        tokio::spawn(Arc::clone(self).accept_channels(transport));
        if let Some(interval) = self.config.snapshot_interval {
            tokio::spawn(Arc::clone(self).log_snapshots(interval));
        }
        tracing::info!("supervisor ready");
        Ok(())
    }

    /// Shut down: close the transport and wait until it is released.
    /// Idempotent and never fails.
    pub async fn stop(&self) {
        if self.stopping.fire() {
            tracing::info!("supervisor stopping");
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            self.stopped.fire();
        }
        self.stopped.wait().await;
    }

    /// Alias of [`stop`](Self::stop).
    pub async fn close(&self) {
        self.stop().await
    }

    /// Resolves once the transport has been released.
    pub async fn stopped(&self) {
        self.stopped.wait().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Payload bytes sent to the peer, across all sessions.
    pub fn bytes_sent_to_peer(&self) -> &Arc<TrafficSink> {
        &self.telemetry.sent_to_peer
    }

    /// Payload bytes received from the peer, across all sessions.
    pub fn bytes_received_from_peer(&self) -> &Arc<TrafficSink> {
        &self.telemetry.received_from_peer
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Point-in-time view of every live session, ordered by label.
    pub fn snapshot(&self) -> SupervisorSnapshot {
        let mut sessions: Vec<_> = self
            .sessions
            .lock()
            .values()
            .map(|session| session.snapshot())
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        SupervisorSnapshot { sessions }
    }

    async fn lifecycle(self: Arc<Self>, transport: Arc<T>) {
        tokio::select! {
            _ = transport.disconnected() => {
                tracing::info!("transport disconnected");
            }
            _ = self.stopping.wait() => {}
        }
        self.stopping.fire();
        transport.close().await;
        self.stopped.fire();
        tracing::info!("supervisor stopped");
    }

    async fn accept_channels(self: Arc<Self>, transport: Arc<T>) {
        loop {
            let channel = tokio::select! {
                channel = transport.next_peer_channel() => channel,
                _ = self.stopping.wait() => None,
            };
            match channel {
                Some(channel) => self.spawn_session(channel),
                None => break,
            }
        }
        tracing::debug!("no longer accepting channels");
    }

    fn spawn_session(&self, channel: Arc<T::Channel>) {
        let session = Session::new(
            channel,
            Arc::clone(&self.connector),
            Arc::clone(&self.config),
            self.telemetry.clone(),
        );
        let label = session.label().to_owned();
        tracing::debug!("session {}: channel opened by peer", label);

        if let Some(previous) = self
            .sessions
            .lock()
            .insert(label.clone(), Arc::clone(&session))
        {
            tracing::warn!("session {}: label reused while still live", previous.label());
        }

        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            if let Err(e) = session.start().await {
                tracing::warn!("session {} failed: {}", label, e);
            }
            session.stopped().await;

            let mut sessions = sessions.lock();
            if sessions
                .get(&label)
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                sessions.remove(&label);
            }
        });
    }

    async fn log_snapshots(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("snapshot: {}", self.snapshot().to_json());
                }
                _ = self.stopping.wait() => break,
            }
        }
    }
}
