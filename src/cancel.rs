//! Cancellation token observed by every blocking wait.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation signal shared by every blocking wait.
///
/// Cancelling drops the only [`Sender`] of an internal channel, so every
/// clone of [`receiver`](Self::receiver) becomes ready at once. That lets a
/// cancellation be multiplexed with `crossbeam_channel::select!` next to a
/// queue receive or a timer instead of relying on thread interruption.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                signal: rx,
            }),
        }
    }

    /// Cancels the token. Calling it again is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut trigger = match self.inner.trigger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        trigger.take();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Channel endpoint that is disconnected (and therefore ready) once the
    /// token is cancelled. Nothing is ever sent on it.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
