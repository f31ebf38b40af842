//! Transport abstraction.
//!
//! The tunnel runs over a negotiated, possibly NAT-traversed peer connection
//! that carries many named message channels. This module defines the two
//! seams the data path consumes:
//!
//! 1. [`TransportConnection`]: connect, open named channels, observe channels
//!    the peer opened, disconnect
//! 2. [`DataChannel`]: one ordered message channel carrying text or binary
//!    messages
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │        Supervisor / Sessions / Pool            │
//! ├────────────────────────────────────────────────┤
//! │  TransportConnection ──▶ DataChannel (label)   │
//! │        ▲ peer-opened channel queue             │
//! ├────────────────────────────────────────────────┤
//! │  Negotiated transport (external provider)      │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! [`memory`] provides an in-process implementation pairing two peers.

pub mod memory;
mod queue;

pub use queue::{HandlerQueue, QueueSnapshot};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Largest binary chunk the relay hands to a channel in one message.
/// Kept under the 16 KiB interoperable message size of SCTP data channels.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// One message on a data channel.
#[derive(Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text (handshakes, control envelopes)
    Text(String),
    /// Opaque bytes (relayed payload)
    Binary(Bytes),
}

impl Message {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(s) => write!(f, "Text({:?})", s),
            Message::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_owned())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Message::Binary(b)
    }
}

/// One ordered message channel between the two peers.
#[async_trait]
pub trait DataChannel: Send + Sync + 'static {
    /// Label, unique for the lifetime of the owning connection.
    fn label(&self) -> &str;

    /// Send one message. Fails if the channel cannot carry it.
    async fn send(&self, message: Message) -> Result<()>;

    /// Pull the next inbound message; `None` once the channel has closed
    /// and its queue is drained. One consumer at a time.
    async fn recv(&self) -> Option<Message>;

    /// Resolves once the channel is open.
    async fn opened(&self);

    /// Resolves once the channel has closed.
    async fn closed(&self);

    /// Close the channel. Never fails.
    async fn close(&self);

    /// Bytes accepted by `send` but not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Depth and busy flag of the inbound queue.
    fn queue(&self) -> QueueSnapshot;
}

/// A negotiated connection to one peer.
#[async_trait]
pub trait TransportConnection: Send + Sync + 'static {
    type Channel: DataChannel;

    /// Resolves once connected; fails if the connection cannot be made.
    async fn connected(&self) -> Result<()>;

    /// Open a new channel with the given label.
    async fn open_channel(&self, label: &str) -> Result<Arc<Self::Channel>>;

    /// Next channel opened by the peer; `None` once the connection is gone.
    async fn next_peer_channel(&self) -> Option<Arc<Self::Channel>>;

    /// Resolves once the connection has terminated for any reason.
    async fn disconnected(&self);

    /// Tear the connection down. Never fails.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_len() {
        assert_eq!(Message::from("hello").len(), 5);
        assert_eq!(Message::from(Bytes::from_static(&[1, 2, 3])).len(), 3);
        assert!(Message::Binary(Bytes::new()).is_empty());
    }

    #[test]
    fn test_message_debug_hides_payload() {
        let msg = Message::Binary(Bytes::from(vec![0u8; 1200]));
        assert_eq!(format!("{:?}", msg), "Binary(1200 bytes)");
    }
}
