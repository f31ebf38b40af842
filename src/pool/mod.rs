//! Channel pooling over one negotiated connection.
//!
//! Creating a transport channel is expensive and some providers cannot
//! close one without disturbing the connection. The pool instead keeps
//! transport channels alive and runs a lightweight open/close handshake on
//! top of them, so one transport channel carries many logical channels one
//! after another.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                        Pool                           │
//! │  ┌─────────────────────┐   ┌──────────────────────┐  │
//! │  │ LocalPool           │   │ RemotePool           │  │
//! │  │ idle FIFO, p<N> ids │   │ republish on OPEN    │  │
//! │  └──────────┬──────────┘   └──────────┬───────────┘  │
//! │             └────────── PoolChannel ──┘              │
//! │               envelope codec, generations            │
//! ├──────────────────────────────────────────────────────┤
//! │              TransportConnection                      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! [`Pool`] is itself a [`TransportConnection`], so a
//! [`Supervisor`](crate::server::Supervisor) runs on top of it unchanged.

mod channel;
pub mod envelope;
mod local;
mod remote;

pub use channel::PoolChannel;
pub use envelope::ControlCommand;
pub use local::LocalPool;
pub use remote::RemotePool;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::TransportConnection;

/// Local and remote pools sharing one transport connection.
pub struct Pool<T: TransportConnection> {
    transport: Arc<T>,
    local: LocalPool<T>,
    remote: RemotePool<T>,
}

impl<T: TransportConnection> Pool<T> {
    /// Must be called from within a tokio runtime.
    pub fn new(transport: T) -> Self {
        let transport = Arc::new(transport);
        Self {
            local: LocalPool::new(Arc::clone(&transport)),
            remote: RemotePool::new(Arc::clone(&transport)),
            transport,
        }
    }

    /// Open a channel, reusing an idle one when possible.
    pub async fn open_data_channel(&self) -> Result<Arc<PoolChannel<T::Channel>>> {
        self.local.open_data_channel().await
    }

    /// Next channel the peer opened.
    pub async fn next_peer_channel(&self) -> Option<Arc<PoolChannel<T::Channel>>> {
        self.remote.next_peer_channel().await
    }

    pub fn local(&self) -> &LocalPool<T> {
        &self.local
    }

    pub fn remote(&self) -> &RemotePool<T> {
        &self.remote
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

#[async_trait]
impl<T: TransportConnection> TransportConnection for Pool<T> {
    type Channel = PoolChannel<T::Channel>;

    async fn connected(&self) -> Result<()> {
        self.transport.connected().await
    }

    /// Pooled channels are labelled by the pool; `label` is ignored.
    async fn open_channel(&self, _label: &str) -> Result<Arc<Self::Channel>> {
        self.open_data_channel().await
    }

    async fn next_peer_channel(&self) -> Option<Arc<Self::Channel>> {
        Pool::next_peer_channel(self).await
    }

    async fn disconnected(&self) {
        self.transport.disconnected().await
    }

    async fn close(&self) {
        self.remote.close();
        self.transport.close().await
    }
}
