//! Channels the peer opens.

use std::sync::Arc;

use super::channel::PoolChannel;
use crate::sync::Signal;
use crate::transport::{DataChannel, HandlerQueue, TransportConnection};

type Ready<C> = Arc<HandlerQueue<Arc<PoolChannel<C>>>>;

/// Republishes peer-opened channels each time the peer opens them.
///
/// Every transport channel the peer creates is wrapped once. Whenever the
/// peer runs the OPEN handshake on it, the channel is queued for
/// [`next_peer_channel`](Self::next_peer_channel); after it closes it is
/// reset and waits for the next OPEN. Each publication is a fresh handle,
/// so a consumer still holding an earlier one cannot affect the new one.
pub struct RemotePool<T: TransportConnection> {
    ready: Ready<T::Channel>,
    stopping: Signal,
}

impl<T: TransportConnection> RemotePool<T> {
    /// Start watching `transport` for peer channels.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<T>) -> Self {
        let ready: Ready<T::Channel> = Arc::new(HandlerQueue::new());
        let stopping = Signal::new();
        tokio::spawn(Self::accept(transport, Arc::clone(&ready), stopping.clone()));
        Self { ready, stopping }
    }

    /// Next channel the peer has opened; `None` once the pool is closed.
    pub async fn next_peer_channel(&self) -> Option<Arc<PoolChannel<T::Channel>>> {
        self.ready.recv().await
    }

    /// Stop republishing. Channels already handed out are unaffected.
    pub fn close(&self) {
        self.stopping.fire();
        self.ready.close();
    }

    /// Channels opened by the peer and not yet taken.
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    async fn accept(transport: Arc<T>, ready: Ready<T::Channel>, stopping: Signal) {
        loop {
            let raw = tokio::select! {
                raw = transport.next_peer_channel() => raw,
                _ = stopping.wait() => None,
            };
            let Some(raw) = raw else {
                break;
            };
            tokio::spawn(Self::cycle(raw, Arc::clone(&ready)));
        }
        ready.close();
    }

    async fn cycle(raw: Arc<T::Channel>, ready: Ready<T::Channel>) {
        tokio::select! {
            _ = raw.opened() => {}
            _ = raw.closed() => return,
        }
        let mut channel = PoolChannel::wrap(raw);

        loop {
            tokio::select! {
                _ = channel.opened() => {}
                _ = channel.retired() => break,
            }
            tracing::debug!("{}: opened by peer, publishing", channel.label());
            if ready.push(Arc::clone(&channel)).is_err() {
                break;
            }
            channel.closed().await;
            if channel.is_retired() {
                break;
            }
            channel = channel.reset();
        }
        tracing::debug!("{}: no longer republished", channel.label());
    }
}
