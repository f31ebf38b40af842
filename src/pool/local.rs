//! Channels this side opens.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::channel::PoolChannel;
use crate::error::{Error, Result};
use crate::transport::{DataChannel, TransportConnection};

type Idle<C> = Arc<Mutex<VecDeque<Arc<PoolChannel<C>>>>>;

/// Hands out open channels, reusing closed ones before creating new ones.
pub struct LocalPool<T: TransportConnection> {
    transport: Arc<T>,
    next_id: AtomicU64,
    idle: Idle<T::Channel>,
}

impl<T: TransportConnection> LocalPool<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(0),
            idle: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Return an open channel: the oldest idle one if any, else a new
    /// transport channel labelled `p<N>`.
    ///
    /// Once the caller closes it, the channel is reset and goes back to the
    /// idle queue for as long as its transport channel lives.
    pub async fn open_data_channel(&self) -> Result<Arc<PoolChannel<T::Channel>>> {
        let channel = match self.take_idle() {
            Some(channel) => {
                tracing::debug!("{}: reusing idle channel", channel.label());
                channel
            }
            None => self.create().await?,
        };
        channel.open().await?;
        self.recycle_on_close(Arc::clone(&channel));
        Ok(channel)
    }

    /// Channels waiting to be reused.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    /// Transport channels created so far.
    pub fn allocated(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    fn take_idle(&self) -> Option<Arc<PoolChannel<T::Channel>>> {
        let mut idle = self.idle.lock();
        while let Some(channel) = idle.pop_front() {
            if !channel.is_retired() {
                return Some(channel);
            }
        }
        None
    }

    async fn create(&self) -> Result<Arc<PoolChannel<T::Channel>>> {
        let label = format!("p{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let raw = self.transport.open_channel(&label).await?;
        tokio::select! {
            _ = raw.opened() => {}
            _ = raw.closed() => return Err(Error::ChannelClosed(label)),
        }
        tracing::debug!("{}: created", label);
        Ok(PoolChannel::wrap(raw))
    }

    fn recycle_on_close(&self, channel: Arc<PoolChannel<T::Channel>>) {
        let idle = Arc::clone(&self.idle);
        tokio::spawn(async move {
            channel.closed().await;
            if channel.is_retired() {
                tracing::debug!("{}: retired", channel.label());
                return;
            }
            idle.lock().push_back(channel.reset());
        });
    }
}
