//! A transport channel that can be opened and closed many times.
//!
//! Each open/close cycle is a *generation* with its own inbound queue and
//! open/closed signals. A [`PoolChannel`] is a handle to one generation;
//! [`PoolChannel::reset`] starts the next generation on the same transport
//! channel and returns its handle. A handle whose generation has passed
//! behaves like a closed channel, so a slow consumer of an old generation
//! can never touch a newer one.
//!
//! Close is a two-phase handshake so that nothing sent before CLOSE is lost:
//!
//! ```text
//!   closer                          receiver
//!     │ ── CLOSE ─────────────────▶   │ wait until queued data is pulled
//!     │ ◀──────────────── CLOSE_ACK ─ │ closed
//!   closed
//! ```
//!
//! "Pulled" means handed out by [`recv`](DataChannel::recv); the channel
//! cannot see what the consumer does with a message afterwards. If the
//! receiver closes the channel itself before pulling everything, both
//! handshakes complete and the unread messages are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::envelope::{self, ControlCommand, Inbound};
use crate::error::{Error, Result};
use crate::sync::Signal;
use crate::transport::{DataChannel, HandlerQueue, Message, QueueSnapshot};

#[derive(Clone)]
struct Generation {
    id: u64,
    inbound: Arc<HandlerQueue<Message>>,
    opened: Signal,
    closed: Signal,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            inbound: Arc::new(HandlerQueue::new()),
            opened: Signal::new(),
            closed: Signal::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    fn close(&self) {
        self.inbound.close();
        self.closed.fire();
    }
}

struct State {
    current: Generation,
    is_open: bool,
    is_closing: bool,
    // The peer reopened before we reset; replayed by the next generation
    carry_open: bool,
    carry: Vec<Message>,
}

struct Shared<C: DataChannel> {
    inner: Arc<C>,
    state: Mutex<State>,
    retired: Signal,
    control_sent: AtomicU64,
}

/// Handle to one generation of a pooled transport channel.
pub struct PoolChannel<C: DataChannel> {
    shared: Arc<Shared<C>>,
    generation: Generation,
}

impl<C: DataChannel> PoolChannel<C> {
    /// Wrap an open transport channel and start decoding its messages.
    /// Returns the handle to the first generation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wrap(inner: Arc<C>) -> Arc<Self> {
        let generation = Generation::new(0);
        let shared = Arc::new(Shared {
            inner: Arc::clone(&inner),
            state: Mutex::new(State {
                current: generation.clone(),
                is_open: false,
                is_closing: false,
                carry_open: false,
                carry: Vec::new(),
            }),
            retired: Signal::new(),
            control_sent: AtomicU64::new(0),
        });
        tokio::spawn(Shared::pump(Arc::downgrade(&shared), inner));
        Arc::new(Self { shared, generation })
    }

    /// The wrapped transport channel.
    pub fn inner(&self) -> &Arc<C> {
        &self.shared.inner
    }

    /// Whether both handles wrap the same transport channel.
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Generation number of this handle, counting from 0.
    pub fn generation(&self) -> u64 {
        self.generation.id
    }

    /// Whether this handle's generation is the latest one.
    pub fn is_current(&self) -> bool {
        self.shared.state.lock().current.id == self.generation.id
    }

    pub fn is_open(&self) -> bool {
        let state = self.shared.state.lock();
        state.current.id == self.generation.id && state.is_open
    }

    pub fn is_closing(&self) -> bool {
        let state = self.shared.state.lock();
        state.current.id == self.generation.id && state.is_closing
    }

    /// Whether the wrapped transport channel has gone away.
    pub fn is_retired(&self) -> bool {
        self.shared.retired.is_fired()
    }

    /// Resolves once the wrapped transport channel has gone away.
    pub async fn retired(&self) {
        self.shared.retired.wait().await
    }

    /// Control messages sent so far on the transport channel.
    pub fn control_sent(&self) -> u64 {
        self.shared.control_sent.load(Ordering::Relaxed)
    }

    /// Send OPEN and consider the channel open.
    pub async fn open(&self) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if state.is_open && state.current.id == self.generation.id {
                return Err(Error::ChannelAlreadyOpen(self.label().to_owned()));
            }
            if state.current.id != self.generation.id || self.generation.is_closed() {
                // Needs a reset first
                return Err(Error::ChannelClosed(self.label().to_owned()));
            }
        }
        self.shared.send_control(ControlCommand::Open).await?;

        let mut state = self.shared.state.lock();
        if state.current.id == self.generation.id {
            state.is_open = true;
            self.generation.opened.fire();
        }
        Ok(())
    }

    /// Start the next generation with a fresh queue, fresh signals and
    /// cleared flags, and return its handle.
    ///
    /// On a stale handle this returns the current generation instead of
    /// starting another one.
    pub fn reset(&self) -> Arc<Self> {
        let mut state = self.shared.state.lock();
        if state.current.id != self.generation.id {
            return Arc::new(Self {
                shared: Arc::clone(&self.shared),
                generation: state.current.clone(),
            });
        }
        if !state.current.is_closed() {
            state.current.close();
        }

        let next = Generation::new(state.current.id + 1);
        state.is_open = false;
        state.is_closing = false;
        if self.shared.retired.is_fired() {
            next.close();
        } else {
            if std::mem::take(&mut state.carry_open) {
                state.is_open = true;
                next.opened.fire();
            }
            for message in state.carry.drain(..) {
                let _ = next.inbound.push(message);
            }
        }
        tracing::debug!("{}: reset to generation {}", self.label(), next.id);
        state.current = next.clone();

        Arc::new(Self {
            shared: Arc::clone(&self.shared),
            generation: next,
        })
    }
}

impl<C: DataChannel> Shared<C> {
    fn label(&self) -> &str {
        self.inner.label()
    }

    async fn send_control(&self, command: ControlCommand) -> Result<()> {
        tracing::debug!("{}: sending {:?}", self.label(), command);
        self.inner.send(envelope::control(command)).await?;
        self.control_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn pump(shared: Weak<Self>, inner: Arc<C>) {
        while let Some(message) = inner.recv().await {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.handle(message).await;
        }
        if let Some(shared) = shared.upgrade() {
            shared.retire();
        }
    }

    async fn handle(self: &Arc<Self>, message: Message) {
        match envelope::decode(message) {
            Ok(Inbound::Data(message)) => self.deliver(message),
            Ok(Inbound::Control(ControlCommand::Open)) => self.on_open(),
            Ok(Inbound::Control(ControlCommand::Close)) => self.on_close().await,
            Ok(Inbound::Control(ControlCommand::CloseAck)) => self.on_close_ack(),
            Err(e) => tracing::warn!("{}: dropping message: {}", self.label(), e),
        }
    }

    fn deliver(&self, message: Message) {
        let mut state = self.state.lock();
        if let Err(message) = state.current.inbound.push(message) {
            state.carry.push(message);
        }
    }

    fn on_open(&self) {
        let mut state = self.state.lock();
        if state.current.is_closed() {
            state.carry_open = true;
        } else if state.is_open {
            tracing::warn!("{}: received OPEN while already open", self.label());
        } else {
            tracing::debug!("{}: opened by peer", self.label());
            state.is_open = true;
            state.current.opened.fire();
        }
    }

    async fn on_close(self: &Arc<Self>) {
        let (generation, is_open, is_closing) = {
            let mut state = self.state.lock();
            if state.current.is_closed() && std::mem::take(&mut state.carry_open) {
                // The peer opened and closed again before we reset
                let dropped = std::mem::take(&mut state.carry).len();
                if dropped > 0 {
                    tracing::warn!("{}: dropping {} carried messages", self.label(), dropped);
                }
            }
            (state.current.clone(), state.is_open, state.is_closing)
        };

        if generation.is_closed() || !is_open {
            tracing::warn!("{}: received CLOSE while not open", self.label());
            self.ack_close().await;
            return;
        }

        if is_closing {
            self.ack_close().await;
            self.finish(generation.id);
            return;
        }

        // The reader keeps running while the consumer drains the queue
        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = generation.inbound.drained() => {}
                // Finished by our own close handshake, or retired
                _ = generation.closed.wait() => return,
            }
            if let Some(shared) = shared.upgrade() {
                shared.ack_close().await;
                shared.finish(generation.id);
            }
        });
    }

    async fn ack_close(&self) {
        if let Err(e) = self.send_control(ControlCommand::CloseAck).await {
            tracing::debug!("{}: could not acknowledge CLOSE: {}", self.label(), e);
        }
    }

    fn on_close_ack(&self) {
        let id = {
            let state = self.state.lock();
            if !state.is_closing {
                tracing::warn!("{}: received CLOSE_ACK while not closing", self.label());
                return;
            }
            state.current.id
        };
        self.finish(id);
    }

    fn finish(&self, id: u64) {
        let mut state = self.state.lock();
        if state.current.id != id || state.current.is_closed() {
            return;
        }
        state.is_open = false;
        state.is_closing = false;
        state.current.close();
        tracing::debug!("{}: generation {} closed", self.label(), id);
    }

    fn retire(&self) {
        tracing::debug!("{}: transport channel closed, retiring", self.label());
        self.retired.fire();
        let id = self.state.lock().current.id;
        self.finish(id);
    }
}

#[async_trait]
impl<C: DataChannel> DataChannel for PoolChannel<C> {
    fn label(&self) -> &str {
        self.shared.label()
    }

    async fn send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelNotOpen(self.label().to_owned()));
        }
        self.shared.inner.send(envelope::encode(message)?).await
    }

    async fn recv(&self) -> Option<Message> {
        self.generation.inbound.recv().await
    }

    /// Resolves once this generation is open.
    async fn opened(&self) {
        self.generation.opened.wait().await
    }

    /// Resolves once this generation has closed.
    async fn closed(&self) {
        self.generation.closed.wait().await
    }

    /// Run the close handshake. No-op unless this generation is open.
    async fn close(&self) {
        let first = {
            let mut state = self.shared.state.lock();
            if !state.is_open || state.current.id != self.generation.id {
                return;
            }
            let first = !state.is_closing;
            state.is_closing = true;
            first
        };

        if first {
            if let Err(e) = self.shared.send_control(ControlCommand::Close).await {
                tracing::debug!("{}: could not send CLOSE: {}", self.label(), e);
            }
        }
        tokio::select! {
            _ = self.generation.closed.wait() => {}
            _ = self.shared.retired.wait() => {}
        }
    }

    fn buffered_amount(&self) -> usize {
        self.shared.inner.buffered_amount()
    }

    fn queue(&self) -> QueueSnapshot {
        self.generation.inbound.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::transport::memory::MemoryChannel;

    type Channel = PoolChannel<MemoryChannel>;

    fn pair() -> (Arc<Channel>, Arc<Channel>) {
        let (a, b) = MemoryChannel::pair("p0");
        (PoolChannel::wrap(a), PoolChannel::wrap(b))
    }

    async fn within<F: std::future::Future>(future: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), future)
            .await
            .expect("timed out")
    }

    async fn opened_pair() -> (Arc<Channel>, Arc<Channel>) {
        let (a, b) = pair();
        a.open().await.unwrap();
        within(b.opened()).await;
        (a, b)
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (a, _b) = pair();
        let err = a.send(Message::from("early")).await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotOpen(label) if label == "p0"));
    }

    #[tokio::test]
    async fn test_open_is_seen_by_peer() {
        let (a, b) = opened_pair().await;
        assert!(a.is_open());
        assert!(b.is_open());
        assert!(matches!(a.open().await, Err(Error::ChannelAlreadyOpen(_))));
        assert_eq!(a.generation(), 0);
        assert_eq!(a.control_sent(), 1);
    }

    #[tokio::test]
    async fn test_text_and_binary_roundtrip() {
        let (a, b) = opened_pair().await;

        a.send(Message::from("hello")).await.unwrap();
        a.send(Message::Binary(Bytes::from_static(b"\x00\x01")))
            .await
            .unwrap();
        assert_eq!(b.recv().await, Some(Message::from("hello")));
        assert_eq!(
            b.recv().await,
            Some(Message::Binary(Bytes::from_static(b"\x00\x01")))
        );

        b.send(Message::from("back")).await.unwrap();
        assert_eq!(a.recv().await, Some(Message::from("back")));
    }

    #[tokio::test]
    async fn test_close_delivers_queued_data_first() {
        let (a, b) = opened_pair().await;
        a.send(Message::from("one")).await.unwrap();
        a.send(Message::from("two")).await.unwrap();

        let closer = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // CLOSE_ACK waits for b's consumer
        assert!(!closer.is_finished());
        assert!(a.is_closing());

        assert_eq!(b.recv().await, Some(Message::from("one")));
        assert_eq!(b.recv().await, Some(Message::from("two")));
        within(closer).await.unwrap();

        assert!(!a.is_open());
        assert!(!a.is_closing());
        within(b.closed()).await;
        assert!(!b.is_open());
        assert_eq!(b.recv().await, None);
        assert!(matches!(
            a.send(Message::from("late")).await,
            Err(Error::ChannelNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_receiver_close_with_unread_data() {
        let (a, b) = opened_pair().await;
        a.send(Message::from("never read")).await.unwrap();

        let closer = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closer.is_finished());

        // b gives up on its queue; both handshakes still complete
        within(b.close()).await;
        within(closer).await.unwrap();
        assert!(!a.is_open());
        assert!(!b.is_open());

        let a2 = a.reset();
        let b2 = b.reset();
        a2.open().await.unwrap();
        within(b2.opened()).await;
        a2.send(Message::from("fresh")).await.unwrap();
        assert_eq!(b2.recv().await, Some(Message::from("fresh")));
    }

    #[tokio::test]
    async fn test_close_when_not_open_is_noop() {
        let (a, _b) = pair();
        within(a.close()).await;
        assert_eq!(a.control_sent(), 0);
    }

    #[tokio::test]
    async fn test_simultaneous_close() {
        let (a, b) = opened_pair().await;
        within(async { tokio::join!(a.close(), b.close()) }).await;
        assert!(!a.is_open());
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn test_reset_allows_reopen() {
        let (a, b) = opened_pair().await;
        within(a.close()).await;
        within(b.closed()).await;

        let a2 = a.reset();
        let b2 = b.reset();
        assert_eq!(a2.generation(), 1);
        assert!(a2.same_channel(&a));
        assert!(!a2.is_open());

        a2.open().await.unwrap();
        within(b2.opened()).await;
        a2.send(Message::from("again")).await.unwrap();
        assert_eq!(b2.recv().await, Some(Message::from("again")));
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_touch_new_generation() {
        let (a, b) = opened_pair().await;
        within(a.close()).await;
        within(b.closed()).await;

        let a2 = a.reset();
        let b2 = b.reset();
        a2.open().await.unwrap();
        within(b2.opened()).await;

        // The old handle on b still looks closed
        assert!(!b.is_current());
        assert!(!b.is_open());
        assert!(b.send(Message::from("stale")).await.is_err());
        within(b.close()).await;
        assert_eq!(b.recv().await, None);
        assert!(b2.is_open());
        assert!(a2.is_open());

        // A reset through a stale handle does not skip ahead
        assert_eq!(b.reset().generation(), 1);
    }

    #[tokio::test]
    async fn test_reopen_before_reset_is_carried() {
        let (a, b) = opened_pair().await;
        within(a.close()).await;
        within(b.closed()).await;

        // a moves on before b has reset
        let a2 = a.reset();
        a2.open().await.unwrap();
        a2.send(Message::from("early bird")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!b.is_open());

        let b2 = b.reset();
        assert!(b2.is_open());
        assert_eq!(b2.recv().await, Some(Message::from("early bird")));
    }

    #[tokio::test]
    async fn test_open_requires_reset_after_close() {
        let (a, _b) = opened_pair().await;
        within(a.close()).await;
        assert!(matches!(a.open().await, Err(Error::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_malformed_and_stray_control_tolerated() {
        let (raw_a, raw_b) = MemoryChannel::pair("p0");
        let b = PoolChannel::wrap(raw_b);

        raw_a.send(Message::from("not an envelope")).await.unwrap();
        raw_a
            .send(envelope::control(ControlCommand::CloseAck))
            .await
            .unwrap();
        raw_a.send(envelope::control(ControlCommand::Open)).await.unwrap();
        raw_a.send(envelope::control(ControlCommand::Open)).await.unwrap();
        raw_a
            .send(envelope::encode(Message::from("still fine")).unwrap())
            .await
            .unwrap();

        within(b.opened()).await;
        assert_eq!(b.recv().await, Some(Message::from("still fine")));
        assert!(b.is_open());
    }

    #[tokio::test]
    async fn test_transport_close_retires() {
        let (raw_a, raw_b) = MemoryChannel::pair("p0");
        let a = PoolChannel::wrap(raw_a);
        let b = PoolChannel::wrap(Arc::clone(&raw_b));
        a.open().await.unwrap();
        within(b.opened()).await;

        raw_b.close().await;
        within(a.retired()).await;
        within(a.closed()).await;
        assert!(a.is_retired());
        assert!(!a.is_open());

        within(a.reset().closed()).await;
    }
}
