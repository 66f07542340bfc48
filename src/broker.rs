//! Deduplicating producer/consumer broker.

use crate::cancel::CancellationToken;

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use dashmap::DashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a blocking [`UniqueBroker::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// The oldest unique element still queued.
    Element(T),
    /// The wait was cancelled before an element became available.
    Cancelled,
}

/// Broker that hands unique elements from many producers to consumers.
///
/// - Every element ever [`put`](Self::put) is remembered in a sharded set;
///   only its first occurrence is queued.
/// - Queued elements are delivered FIFO, exactly once, through an unbounded
///   channel.
/// - `total_count` counts every put, `duplicate_count` counts rejected ones
///   since the last [`reset_duplicate_count`](Self::reset_duplicate_count).
///
/// The seen set is never pruned and never read back: it only answers
/// "was this inserted before?".
pub struct UniqueBroker<T> {
    seen: DashSet<T>,
    tx: Sender<T>,
    rx: Receiver<T>,
    total_count: AtomicU64,
    duplicate_count: AtomicU64,
}

impl<T> UniqueBroker<T>
where
    T: Eq + Hash + Clone,
{
    /// Creates an empty broker.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            seen: DashSet::new(),
            tx,
            rx,
            total_count: AtomicU64::new(0),
            duplicate_count: AtomicU64::new(0),
        }
    }

    /// Offers an element to the broker.
    ///
    /// Returns `true` if the element was new and has been queued, `false` if
    /// it was a duplicate. The set insertion is the single point deciding
    /// novelty, so two concurrent callers can never both observe "new".
    pub fn put(&self, element: T) -> bool {
        self.total_count.fetch_add(1, Ordering::SeqCst);

        if self.seen.insert(element.clone()) {
            // Both ends live in `self`, the channel cannot be disconnected.
            let _ = self.tx.send(element);
            true
        } else {
            self.duplicate_count.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    /// Blocks until a unique element is available or `cancel` fires.
    pub fn get(&self, cancel: &CancellationToken) -> Delivery<T> {
        if cancel.is_cancelled() {
            return Delivery::Cancelled;
        }

        select! {
            recv(self.rx) -> msg => match msg {
                Ok(element) => Delivery::Element(element),
                Err(_) => Delivery::Cancelled,
            },
            recv(cancel.receiver()) -> _ => Delivery::Cancelled,
        }
    }

    /// Removes the oldest queued element without blocking.
    pub fn try_get(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Number of unique elements waiting for a consumer.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Total number of `put` calls since creation.
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::SeqCst)
    }

    /// Number of duplicates seen since the last reset.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicate_count.load(Ordering::SeqCst)
    }

    /// Resets the duplicate counter to zero and returns the value it held.
    ///
    /// Read and reset are one atomic swap: an increment racing with the call
    /// is either included in the returned value or survives in the counter.
    pub fn reset_duplicate_count(&self) -> u64 {
        self.duplicate_count.swap(0, Ordering::SeqCst)
    }
}

impl<T> Default for UniqueBroker<T>
where
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for UniqueBroker<T>
where
    T: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueBroker")
            .field("seen", &self.seen.len())
            .field("pending", &self.rx.len())
            .field("total_count", &self.total_count)
            .field("duplicate_count", &self.duplicate_count)
            .finish()
    }
}
