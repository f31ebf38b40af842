//! In-process transport.
//!
//! [`MemoryConnection::pair`] returns two connected peers whose channels
//! deliver messages directly into each other's inbound queues. Used by the
//! test suites and for wiring a local relay without a network in between.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DataChannel, HandlerQueue, Message, QueueSnapshot, TransportConnection};
use crate::error::{Error, Result};
use crate::sync::Signal;

/// One end of an in-process channel.
pub struct MemoryChannel {
    label: String,
    inbound: HandlerQueue<Message>,
    peer: Mutex<Weak<MemoryChannel>>,
    opened: Signal,
    // Shared by both ends: closing either side closes the channel.
    closed: Signal,
}

impl MemoryChannel {
    /// Create both ends of an open channel.
    pub fn pair(label: &str) -> (Arc<Self>, Arc<Self>) {
        let opened = Signal::new();
        let closed = Signal::new();
        opened.fire();

        let a = Arc::new(Self::end(label, opened.clone(), closed.clone()));
        let b = Arc::new(Self::end(label, opened, closed));
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn end(label: &str, opened: Signal, closed: Signal) -> Self {
        Self {
            label: label.to_owned(),
            inbound: HandlerQueue::new(),
            peer: Mutex::new(Weak::new()),
            opened,
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    fn shut(&self) {
        if self.closed.fire() {
            self.inbound.close();
            if let Some(peer) = self.peer.lock().upgrade() {
                peer.inbound.close();
            }
        }
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, message: Message) -> Result<()> {
        if self.closed.is_fired() {
            return Err(Error::ChannelClosed(self.label.clone()));
        }
        let peer = self.peer.lock().upgrade();
        let Some(peer) = peer else {
            return Err(Error::ChannelClosed(self.label.clone()));
        };
        peer.inbound
            .push(message)
            .map_err(|_| Error::ChannelClosed(self.label.clone()))
    }

    async fn recv(&self) -> Option<Message> {
        self.inbound.recv().await
    }

    async fn opened(&self) {
        self.opened.wait().await
    }

    async fn closed(&self) {
        self.closed.wait().await
    }

    async fn close(&self) {
        self.shut();
    }

    fn buffered_amount(&self) -> usize {
        0
    }

    fn queue(&self) -> QueueSnapshot {
        self.inbound.snapshot()
    }
}

struct Link {
    disconnected: Signal,
    channels: Mutex<Vec<Weak<MemoryChannel>>>,
}

impl Link {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            disconnected: Signal::new(),
            channels: Mutex::new(Vec::new()),
        })
    }
}

/// One peer of an in-process connection.
pub struct MemoryConnection {
    link: Arc<Link>,
    connect_error: Option<String>,
    // Channels the other side opened, waiting for us
    peer_opened: Arc<HandlerQueue<Arc<MemoryChannel>>>,
    // The other side's `peer_opened`
    remote_opened: Arc<HandlerQueue<Arc<MemoryChannel>>>,
    channels_opened: AtomicUsize,
}

impl MemoryConnection {
    /// Two connected peers.
    pub fn pair() -> (Self, Self) {
        let link = Link::new();
        let a_inbound = Arc::new(HandlerQueue::new());
        let b_inbound = Arc::new(HandlerQueue::new());

        let a = Self {
            link: Arc::clone(&link),
            connect_error: None,
            peer_opened: Arc::clone(&a_inbound),
            remote_opened: Arc::clone(&b_inbound),
            channels_opened: AtomicUsize::new(0),
        };
        let b = Self {
            link,
            connect_error: None,
            peer_opened: b_inbound,
            remote_opened: a_inbound,
            channels_opened: AtomicUsize::new(0),
        };
        (a, b)
    }

    /// A connection whose establishment fails with `reason`.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        let (mut conn, _) = Self::pair();
        conn.connect_error = Some(reason.into());
        conn.link.disconnected.fire();
        conn.peer_opened.close();
        conn
    }

    /// Number of channels this side has opened on the transport.
    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::Relaxed)
    }

    pub fn is_disconnected(&self) -> bool {
        self.link.disconnected.is_fired()
    }
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn connected(&self) -> Result<()> {
        match &self.connect_error {
            Some(reason) => Err(Error::transport(reason.clone())),
            None => Ok(()),
        }
    }

    async fn open_channel(&self, label: &str) -> Result<Arc<MemoryChannel>> {
        if self.link.disconnected.is_fired() {
            return Err(Error::transport("connection closed"));
        }
        let (local, remote) = MemoryChannel::pair(label);
        {
            let mut channels = self.link.channels.lock();
            channels.retain(|c| c.strong_count() > 0);
            channels.push(Arc::downgrade(&local));
            channels.push(Arc::downgrade(&remote));
        }
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
        self.remote_opened
            .push(remote)
            .map_err(|_| Error::transport("peer is gone"))?;
        Ok(local)
    }

    async fn next_peer_channel(&self) -> Option<Arc<MemoryChannel>> {
        self.peer_opened.recv().await
    }

    async fn disconnected(&self) {
        self.link.disconnected.wait().await
    }

    async fn close(&self) {
        if self.link.disconnected.fire() {
            let channels = std::mem::take(&mut *self.link.channels.lock());
            for channel in channels.iter().filter_map(Weak::upgrade) {
                channel.shut();
            }
            self.peer_opened.close();
            self.remote_opened.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (a, b) = MemoryChannel::pair("c0");
        a.send(Message::from("one")).await.unwrap();
        a.send(Message::Binary(Bytes::from_static(b"two"))).await.unwrap();

        assert_eq!(b.recv().await, Some(Message::from("one")));
        assert_eq!(
            b.recv().await,
            Some(Message::Binary(Bytes::from_static(b"two")))
        );
    }

    #[tokio::test]
    async fn test_close_reaches_both_ends() {
        let (a, b) = MemoryChannel::pair("c0");
        a.send(Message::from("last")).await.unwrap();
        b.close().await;

        a.closed().await;
        assert!(a.send(Message::from("late")).await.is_err());
        // Queued data survives the close
        assert_eq!(b.recv().await, Some(Message::from("last")));
        assert_eq!(b.recv().await, None);
        assert_eq!(a.recv().await, None);
    }

    #[tokio::test]
    async fn test_peer_sees_opened_channel() {
        let (a, b) = MemoryConnection::pair();
        a.connected().await.unwrap();

        let local = a.open_channel("p0").await.unwrap();
        let remote = b.next_peer_channel().await.unwrap();
        assert_eq!(remote.label(), "p0");
        assert_eq!(a.channels_opened(), 1);

        local.send(Message::from("hi")).await.unwrap();
        assert_eq!(remote.recv().await, Some(Message::from("hi")));
    }

    #[tokio::test]
    async fn test_close_tears_down_channels() {
        let (a, b) = MemoryConnection::pair();
        let local = a.open_channel("p0").await.unwrap();
        let _remote = b.next_peer_channel().await.unwrap();

        b.close().await;
        a.disconnected().await;
        local.closed().await;
        assert!(a.open_channel("p1").await.is_err());
        assert!(b.next_peer_channel().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let conn = MemoryConnection::unreachable("ice failed");
        assert!(matches!(conn.connected().await, Err(Error::Transport(_))));
        assert!(conn.is_disconnected());
    }
}
