use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use super::Source;
use crate::Result;

/// When a [`SharedStream`] lets go of its upstream after the last subscriber
/// leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Detach synchronously inside the last subscriber's drop
    Immediate,
    /// Detach after the delay, unless a subscriber arrived in the meantime.
    /// `Duration::ZERO` defers to the next runtime tick.
    Deferred(Duration),
    /// Never detach for lack of subscribers
    Never,
}

/// Conditional multicast over a restartable source.
///
/// - The first subscriber attaches the source; later subscribers share it.
/// - Every subscriber first receives the replay buffer (the last
///   `buffer_size` values since the source was attached, everything when
///   `buffer_size` is 0), then live values.
/// - When the last subscriber leaves, the source is detached according to the
///   [`Teardown`] policy and all state is reset; the next subscriber starts
///   from a fresh source and an empty buffer.
/// - A source error is delivered to every subscriber and resets the state, so
///   late subscribers re-attach instead of seeing a stale error. Completion
///   resets the same way.
///
/// Cloning the handle shares the same multicast; [`SharedStream::ptr_eq`]
/// tells handles of the same multicast apart from equal-looking ones.
pub struct SharedStream<T>
where
    T: Send + 'static,
{
    inner: Arc<Distributor<T>>,
}

impl<T> Clone for SharedStream<T>
where
    T: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SharedStream<T>
where
    T: Send + 'static,
{
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SharedStream")
            .field("subscribers", &state.subscribers.len())
            .field("buffered", &state.buffer.len())
            .field("attached", &state.upstream.is_some())
            .finish()
    }
}

struct Distributor<T>
where
    T: Send + 'static,
{
    source: Source<T>,
    buffer_size: usize,
    teardown: Teardown,
    next_id: AtomicU64,
    state: Mutex<DistributorState<T>>,
}

struct DistributorState<T> {
    buffer: VecDeque<T>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Result<T>>>,
    upstream: Option<Upstream>,
    generation: u64,
}

struct Upstream {
    generation: u64,
    task: JoinHandle<()>,
}

impl<T> SharedStream<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(
        source: Source<T>,
        buffer_size: usize,
        teardown: Teardown,
    ) -> Self {
        Self {
            inner: Arc::new(Distributor {
                source,
                buffer_size,
                teardown,
                next_id: AtomicU64::new(1),
                state: Mutex::new(DistributorState {
                    buffer: VecDeque::new(),
                    subscribers: HashMap::new(),
                    upstream: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Attach a new subscriber.
    ///
    /// Must be called from within a tokio runtime: attaching the source spawns
    /// the task that drives it.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.inner.state.lock();
        for value in &state.buffer {
            let _ = tx.send(Ok(value.clone()));
        }
        state.subscribers.insert(id, tx);
        if state.upstream.is_none() {
            self.inner.attach(&mut state);
        }
        drop(state);

        Subscription {
            id,
            receiver: rx,
            owner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedStream<T>
where
    T: Send + 'static,
{
    /// Whether both handles refer to the same multicast
    pub fn ptr_eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Whether the source is currently attached
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().upstream.is_some()
    }
}

impl<T> Distributor<T>
where
    T: Clone + Send + 'static,
{
    fn attach(
        self: &Arc<Self>,
        state: &mut DistributorState<T>,
    ) {
        state.generation += 1;
        let generation = state.generation;
        let source = Arc::clone(&self.source);
        let owner = Arc::downgrade(self);

        trace!(generation, "Attaching shared stream to its source");
        let task = tokio::spawn(async move {
            let mut upstream = source();
            while let Some(item) = upstream.next().await {
                let Some(distributor) = owner.upgrade() else {
                    return;
                };
                if !distributor.relay(generation, item) {
                    return;
                }
            }
            if let Some(distributor) = owner.upgrade() {
                distributor.finish(generation);
            }
        });

        state.upstream = Some(Upstream { generation, task });
    }

    /// Buffers and forwards one upstream item. Returns false once the
    /// upstream should stop being polled.
    fn relay(
        &self,
        generation: u64,
        item: Result<T>,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.is_current(generation) {
            return false;
        }

        match item {
            Ok(value) => {
                state.buffer.push_back(value.clone());
                if self.buffer_size > 0 {
                    while state.buffer.len() > self.buffer_size {
                        state.buffer.pop_front();
                    }
                }
                for tx in state.subscribers.values() {
                    let _ = tx.send(Ok(value.clone()));
                }
                true
            }
            Err(e) => {
                debug!(generation, error = %e, "Shared stream source failed; resetting");
                for tx in state.subscribers.values() {
                    let _ = tx.send(Err(e.clone()));
                }
                state.reset();
                false
            }
        }
    }

    fn finish(
        &self,
        generation: u64,
    ) {
        let mut state = self.state.lock();
        if state.is_current(generation) {
            trace!(generation, "Shared stream source completed; resetting");
            state.reset();
        }
    }
}

impl<T> Distributor<T>
where
    T: Send + 'static,
{
    fn detach(
        self: &Arc<Self>,
        id: u64,
    ) {
        let mut state = self.state.lock();
        if state.subscribers.remove(&id).is_none() || !state.subscribers.is_empty() {
            return;
        }

        match self.teardown {
            Teardown::Never => {}
            Teardown::Immediate => state.reset(),
            Teardown::Deferred(delay) => {
                drop(state);
                self.schedule_release(delay);
            }
        }
    }

    fn schedule_release(
        self: &Arc<Self>,
        delay: Duration,
    ) {
        let owner: Weak<Self> = Arc::downgrade(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    if let Some(distributor) = owner.upgrade() {
                        distributor.release_if_idle();
                    }
                });
            }
            // No runtime left to defer onto
            Err(_) => self.release_if_idle(),
        }
    }

    /// Re-reads the live subscriber count; a subscriber that arrived after the
    /// release was scheduled keeps the source attached.
    fn release_if_idle(&self) {
        let mut state = self.state.lock();
        if state.subscribers.is_empty() && state.upstream.is_some() {
            trace!(generation = state.generation, "Releasing idle shared stream source");
            state.reset();
        }
    }
}

impl<T> DistributorState<T> {
    fn is_current(
        &self,
        generation: u64,
    ) -> bool {
        self.upstream.as_ref().map(|u| u.generation) == Some(generation)
    }

    /// Detaches the source and forgets buffer and subscribers. Subscribers
    /// still holding a [`Subscription`] see their stream end.
    fn reset(&mut self) {
        if let Some(upstream) = self.upstream.take() {
            upstream.task.abort();
        }
        self.buffer.clear();
        self.subscribers.clear();
    }
}

/// One subscriber's view of a [`SharedStream`]. Dropping it detaches the
/// subscriber.
pub struct Subscription<T>
where
    T: Send + 'static,
{
    id: u64,
    receiver: mpsc::UnboundedReceiver<Result<T>>,
    owner: Arc<Distributor<T>>,
}

impl<T> Stream for Subscription<T>
where
    T: Send + 'static,
{
    type Item = Result<T>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        self.owner.detach(self.id);
    }
}

impl<T> fmt::Debug for Subscription<T>
where
    T: Send + 'static,
{
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
