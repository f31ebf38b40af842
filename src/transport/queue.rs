//! Single-consumer inbound queue with depth tracking.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Depth and busy flag of a queue, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// Items waiting to be pulled
    pub size: usize,
    /// Whether a consumer is currently waiting on the queue
    pub handling: bool,
}

/// Unbounded FIFO with one consumer at a time.
///
/// Producers never block. The consumer pulls one item per [`recv`] call and
/// only asks for the next one once it has finished with the previous, so the
/// queue depth reflects items not yet handed over. [`drained`] resolves when
/// everything pushed so far has been handed over.
///
/// [`recv`]: HandlerQueue::recv
/// [`drained`]: HandlerQueue::drained
pub struct HandlerQueue<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<T>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>,
    depth: watch::Sender<usize>,
    handling: AtomicBool,
}

impl<T: Send> HandlerQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (depth, _) = watch::channel(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            depth,
            handling: AtomicBool::new(false),
        }
    }

    /// Append an item. Hands the item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(item);
        };
        self.depth.send_modify(|d| *d += 1);
        tx.send(item).map_err(|e| {
            self.depth.send_modify(|d| *d -= 1);
            e.0
        })
    }

    /// Pull the next item; `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let _busy = BusyGuard::set(&self.handling);
        let item = rx.recv().await;
        if item.is_some() {
            self.depth.send_modify(|d| *d = d.saturating_sub(1));
        }
        item
    }

    /// Stop accepting items. Queued items can still be pulled.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn len(&self) -> usize {
        *self.depth.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once every item pushed so far has been pulled.
    ///
    /// An item counts as handled when [`recv`](Self::recv) hands it out;
    /// consumers finish with one item before pulling the next.
    pub async fn drained(&self) {
        let mut depth = self.depth.subscribe();
        let _ = depth.wait_for(|d| *d == 0).await;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            size: self.len(),
            handling: self.handling.load(Ordering::Relaxed),
        }
    }
}

impl<T: Send> Default for HandlerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order_and_depth() {
        let queue = HandlerQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, Some(2));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = HandlerQueue::new();
        queue.push("a").unwrap();
        queue.close();

        assert_eq!(queue.push("b"), Err("b"));
        assert_eq!(queue.recv().await, Some("a"));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_drained_waits_for_consumer() {
        let queue = Arc::new(HandlerQueue::new());
        queue.push(7u32).unwrap();

        let drained = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());

        assert_eq!(queue.recv().await, Some(7));
        tokio::time::timeout(Duration::from_secs(1), drained)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_reports_waiting_consumer() {
        let queue: Arc<HandlerQueue<u8>> = Arc::new(HandlerQueue::new());
        assert_eq!(queue.snapshot(), QueueSnapshot::default());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.snapshot().handling);

        queue.push(1).unwrap();
        assert_eq!(consumer.await.unwrap(), Some(1));
        assert!(!queue.snapshot().handling);
    }
}
