//! Per-subscriber bounded queues and the registry that feeds them.
//!
//! Every broadcaster owns one `SubscriberRegistry` behind its own lock.
//! The registry holds the sending half of each subscriber's bounded
//! `mpsc` queue; the connection that subscribed holds the receiving half
//! inside a [`Subscription`]. Removing an entry drops the only sender, so
//! removal and queue closure are the same step and can happen at most
//! once per subscriber.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned locks are recovered, a panicking holder cannot wedge a stream

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Pending items a subscriber may hold before the overflow policy applies.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

/// Identity of one subscriber within one broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What happens when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Skip this item for that subscriber; keep the subscriber.
    DropNewest,
    /// Remove the subscriber and close its queue.
    Evict,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: usize,
}

/// Map of live subscriber queues. Not synchronized itself; owners wrap it
/// in their broadcaster lock.
pub struct SubscriberRegistry<T> {
    next_id: u64,
    queues: HashMap<SubscriberId, mpsc::Sender<T>>,
    closed: bool,
}

impl<T: Clone> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            queues: HashMap::new(),
            closed: false,
        }
    }

    /// Allocates a bounded queue and registers its sending half.
    ///
    /// After [`close_all`](Self::close_all) the returned queue is already
    /// closed.
    pub fn register(&mut self) -> (SubscriberId, mpsc::Receiver<T>) {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        if !self.closed {
            self.queues.insert(id, tx);
        }
        (id, rx)
    }

    /// Removes a subscriber, closing its queue. True only on the first call.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.queues.remove(&id).is_some()
    }

    /// Removes every subscriber and refuses new ones. Returns how many
    /// were closed.
    pub fn close_all(&mut self) -> usize {
        self.closed = true;
        let count = self.queues.len();
        self.queues.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Offers a copy of `item` to every subscriber without waiting.
    ///
    /// Subscribers whose receiver is gone are always removed.
    pub fn fan_out(&mut self, item: &T, policy: OverflowPolicy) -> FanOut {
        let mut report = FanOut::default();

        self.queues.retain(|id, tx| match tx.try_send(item.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => match policy {
                OverflowPolicy::DropNewest => {
                    trace!(subscriber = %id, "Queue full, dropping item");
                    report.dropped += 1;
                    true
                }
                OverflowPolicy::Evict => {
                    trace!(subscriber = %id, "Queue full, evicting subscriber");
                    report.evicted += 1;
                    false
                }
            },
            Err(TrySendError::Closed(_)) => false,
        });

        report
    }
}

impl<T: Clone> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can drop a subscriber from its registry.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: SubscriberId) -> bool;
}

impl<T: Clone + Send> Detach for Mutex<SubscriberRegistry<T>> {
    fn detach(&self, id: SubscriberId) -> bool {
        lock(self).remove(id)
    }
}

/// Locks a broadcaster mutex, recovering the data if a holder panicked.
pub(crate) fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of waiting on a subscription.
#[derive(Debug, PartialEq, Eq)]
pub enum Next<T> {
    Item(T),
    /// The caller's cancellation token fired.
    Cancelled,
    /// The queue was closed by eviction or broadcaster shutdown, and drained.
    Closed,
}

/// A consumer's end of a broadcaster queue.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    id: SubscriberId,
    rx: mpsc::Receiver<T>,
    owner: Arc<dyn Detach>,
    detached: bool,
}

impl<T> Subscription<T> {
    pub(crate) fn new(id: SubscriberId, rx: mpsc::Receiver<T>, owner: Arc<dyn Detach>) -> Self {
        Self {
            id,
            rx,
            owner,
            detached: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receives the next queued item; `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receives the next item unless `cancel` fires first.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Next<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Next::Cancelled,
            item = self.rx.recv() => match item {
                Some(item) => Next::Item(item),
                None => Next::Closed,
            },
        }
    }

    /// Returns a queued item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Removes this subscriber from its registry.
    ///
    /// Returns true if this call removed it; false if it was already gone
    /// (evicted, shut down, or unsubscribed earlier).
    pub fn unsubscribe(&mut self) -> bool {
        if self.detached {
            return false;
        }
        self.detached = true;
        self.rx.close();
        self.owner.detach(self.id)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}
