//! One proxied connection.
//!
//! A session owns one peer-opened channel. The first message on the channel
//! names the target; the session checks it against the address policy,
//! connects, replies, then relays until either side closes or it is stopped.
//!
//! ```text
//! AwaitingEndpoint ──▶ Connecting ──▶ Connected ──▶ Stopping ──▶ Stopped
//!        │                  │                           ▲
//!        └──────────────────┴───── reply != SUCCEEDED ──┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, watch};

use crate::error::{Error, Result};
use crate::net::{ConnectionInfo, Endpoint};
use crate::proxy::relay::{channel_to_socket, socket_to_channel, ChannelEnd, SocketCloseKind};
use crate::proxy::{ConnectError, ConnectErrorKind, Reply, Request, Response, TcpConnector};
use crate::server::config::ProxyConfig;
use crate::server::metrics::{
    ChannelSnapshot, SessionCounters, SessionSnapshot, SocketSnapshot, Telemetry,
};
use crate::sync::Signal;
use crate::transport::DataChannel;

/// Session state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Waiting for the handshake message
    AwaitingEndpoint,
    /// Outbound connection in progress
    Connecting,
    /// Relaying
    Connected,
    /// Releasing the socket and channel
    Stopping,
    /// Everything released
    Stopped,
}

/// Map an outbound connection failure to the reply sent to the peer.
///
/// Refusals are only reported as such when non-unicast targets are
/// allowed. Otherwise they collapse into a generic failure.
pub fn reply_for_connect_error(kind: ConnectErrorKind, allow_non_unicast: bool) -> Reply {
    match kind {
        ConnectErrorKind::TimedOut => Reply::TtlExpired,
        ConnectErrorKind::NetworkChanged => Reply::NetworkUnreachable,
        ConnectErrorKind::ConnectionReset | ConnectErrorKind::ConnectionRefused
            if allow_non_unicast =>
        {
            Reply::ConnectionRefused
        }
        _ => Reply::Failure,
    }
}

enum RelayEnd {
    Socket(SocketCloseKind),
    Channel(ChannelEnd),
    Stopped,
}

/// A single proxied TCP connection bound to one data channel.
pub struct Session<C: DataChannel, N: TcpConnector> {
    channel: Arc<C>,
    connector: Arc<N>,
    config: Arc<ProxyConfig>,
    telemetry: Telemetry,
    counters: SessionCounters,
    state: watch::Sender<SessionState>,
    info: Mutex<Option<ConnectionInfo>>,
    started: AtomicBool,
    stopping: Signal,
    stopped: Signal,
}

impl<C: DataChannel, N: TcpConnector> Session<C, N> {
    pub fn new(
        channel: Arc<C>,
        connector: Arc<N>,
        config: Arc<ProxyConfig>,
        telemetry: Telemetry,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::AwaitingEndpoint);
        Arc::new(Self {
            channel,
            connector,
            config,
            telemetry,
            counters: SessionCounters::new(),
            state,
            info: Mutex::new(None),
            started: AtomicBool::new(false),
            stopping: Signal::new(),
            stopped: Signal::new(),
        })
    }

    /// Label of the underlying channel; unique within a supervisor.
    pub fn label(&self) -> &str {
        self.channel.label()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Addresses of the outbound connection, once connected.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.info.lock().clone()
    }

    /// Run the session in the background.
    ///
    /// Resolves once the handshake has been answered with `SUCCEEDED`, or
    /// with the error that ended the session before it got there. The
    /// session releases its resources on its own either way.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(if self.stopping.is_fired() {
                Error::Stopped
            } else {
                Error::AlreadyStarted
            });
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let session = Arc::clone(self);
        tokio::spawn(async move { session.drive(ready_tx).await });

        ready_rx.await.unwrap_or(Err(Error::Stopped))
    }

    /// Stop the session and wait until it has released everything.
    /// Idempotent.
    pub async fn stop(&self) {
        self.stopping.fire();
        if !self.started.swap(true, Ordering::SeqCst) {
            // Never started: nothing else will release the channel
            self.release().await;
        }
        self.stopped.wait().await;
    }

    /// Resolves once the session has reached `Stopped`.
    pub async fn stopped(&self) {
        self.stopped.wait().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }

    /// Point-in-time counters for diagnostics.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            name: self.label().to_owned(),
            channel: ChannelSnapshot {
                sent: self.counters.channel_sent(),
                received: self.counters.channel_received(),
                buffered: self.channel.buffered_amount(),
                queue: self.channel.queue(),
            },
            socket: SocketSnapshot {
                sent: self.counters.socket_sent(),
                received: self.counters.socket_received(),
                queue: self.counters.socket_queue(),
            },
        }
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    fn transition(&self, to: SessionState) {
        let moved = self.state.send_if_modified(|state| {
            if *state < to {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!("session {}: {:?}", self.label(), to);
        }
    }

    async fn drive(self: Arc<Self>, ready: oneshot::Sender<Result<()>>) {
        let negotiated = tokio::select! {
            result = self.negotiate() => result,
            _ = self.stopping.wait() => Err(Error::Stopped),
            _ = self.channel.closed() => Err(Error::ChannelClosed(self.label().to_owned())),
        };

        match negotiated {
            Ok(stream) => {
                self.transition(SessionState::Connected);
                let _ = ready.send(Ok(()));
                self.relay(stream).await;
            }
            Err(e) => {
                tracing::info!("session {}: not connected: {}", self.label(), e);
                let _ = ready.send(Err(e));
            }
        }

        self.release().await;
    }

    async fn negotiate(&self) -> Result<N::Stream> {
        let message = self
            .channel
            .recv()
            .await
            .ok_or_else(|| Error::ChannelClosed(self.label().to_owned()))?;
        let request = match Request::from_message(&message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("session {}: bad handshake: {}", self.label(), e);
                self.reply(Reply::UnsupportedCommand, None).await?;
                return Err(e);
            }
        };

        let endpoint = request.endpoint;
        tracing::info!("session {}: connecting to {}", self.label(), endpoint);
        self.transition(SessionState::Connecting);

        if endpoint.ip().is_some() && !self.config.is_allowed_address(&endpoint.address) {
            tracing::info!("session {}: {} is not allowed", self.label(), endpoint);
            self.reply(Reply::NotAllowed, None).await?;
            return Err(Error::NotAllowed(endpoint.to_string()));
        }

        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&endpoint),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ConnectError::new(
                ConnectErrorKind::TimedOut,
                format!("no connection after {:?}", self.config.connect_timeout),
            ))
        });

        let connected = match attempt {
            Ok(connected) => connected,
            Err(e) => {
                let reply = reply_for_connect_error(e.kind, self.config.allow_non_unicast);
                tracing::info!(
                    "session {}: connect to {} failed ({}), replying {:?}",
                    self.label(),
                    endpoint,
                    e,
                    reply
                );
                self.reply(reply, None).await?;
                return Err(e.into());
            }
        };

        let info = connected.info;
        if !self.config.is_allowed_address(&info.remote.address) {
            tracing::info!(
                "session {}: {} resolved to disallowed {}",
                self.label(),
                endpoint,
                info.remote
            );
            self.reply(Reply::Failure, None).await?;
            return Err(Error::NotAllowed(info.remote.to_string()));
        }

        self.reply(Reply::Succeeded, Some(info.bound.clone())).await?;
        tracing::info!(
            "session {}: connected {} -> {}",
            self.label(),
            info.bound,
            info.remote
        );
        *self.info.lock() = Some(info);
        Ok(connected.stream)
    }

    async fn reply(&self, reply: Reply, endpoint: Option<Endpoint>) -> Result<()> {
        let message = Response::new(reply, endpoint).to_message()?;
        self.channel.send(message).await
    }

    async fn relay(&self, stream: N::Stream) {
        let label = self.label();
        let (mut reader, mut writer) = tokio::io::split(stream);

        let end = tokio::select! {
            kind = socket_to_channel(
                label,
                &mut reader,
                self.channel.as_ref(),
                &self.counters,
                &self.telemetry.sent_to_peer,
            ) => RelayEnd::Socket(kind),
            end = channel_to_socket(
                label,
                self.channel.as_ref(),
                &mut writer,
                &self.counters,
                &self.telemetry.received_from_peer,
            ) => RelayEnd::Channel(end),
            _ = self.stopping.wait() => RelayEnd::Stopped,
        };

        match end {
            RelayEnd::Socket(SocketCloseKind::Errored(kind)) => {
                tracing::warn!("session {}: socket error: {:?}", label, kind);
            }
            RelayEnd::Socket(kind) => {
                tracing::info!("session {}: socket closed ({:?})", label, kind);
            }
            RelayEnd::Channel(ChannelEnd::Closed) => {
                tracing::info!("session {}: channel closed", label);
            }
            RelayEnd::Channel(ChannelEnd::UnexpectedText(text)) => {
                tracing::warn!("session {}: unexpected text after handshake: {:?}", label, text);
                if let Err(e) = self.reply(Reply::UnsupportedCommand, None).await {
                    tracing::debug!("session {}: could not reply: {}", label, e);
                }
            }
            RelayEnd::Stopped => {
                tracing::info!("session {}: stopped", label);
            }
        }

        if let Err(e) = writer.shutdown().await {
            tracing::debug!("session {}: socket shutdown: {}", label, e);
        }
    }

    async fn release(&self) {
        self.transition(SessionState::Stopping);
        if tokio::time::timeout(self.config.close_timeout, self.channel.close())
            .await
            .is_err()
        {
            tracing::warn!(
                "session {}: channel close not acknowledged after {:?}",
                self.label(),
                self.config.close_timeout
            );
        }
        self.transition(SessionState::Stopped);
        if self.stopped.fire() {
            tracing::debug!("session {}: released", self.label());
        }
    }
}
