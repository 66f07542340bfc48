//! Named thread groups that can be awaited with a timeout.

use crate::cancel::CancellationToken;
use crate::errors::ServerError;
use crate::shutdown::Drainable;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A set of named threads that can be awaited with a timeout.
///
/// Each thread owns a clone of a liveness [`Sender`]. When the last clone is
/// dropped (the thread returned or panicked) the receiver disconnects, which
/// is what [`await_termination`](Self::await_termination) waits for.
#[derive(Debug)]
pub struct TaskGroup {
    name: String,
    alive_tx: Mutex<Option<Sender<()>>>,
    alive_rx: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    /// Creates an empty group.
    pub fn new(name: &str) -> Self {
        let (tx, rx) = bounded(0);
        Self {
            name: name.to_string(),
            alive_tx: Mutex::new(Some(tx)),
            alive_rx: rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Group name, used for thread names and log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns a thread belonging to this group.
    ///
    /// Fails once the group has been sealed.
    pub fn spawn<F>(&self, f: F) -> Result<(), ServerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let alive = lock(&self.alive_tx)
            .as_ref()
            .cloned()
            .ok_or_else(|| ServerError::InvalidState(format!("{} is shut down", self.name)))?;

        let index = lock(&self.handles).len();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.name, index))
            .spawn(move || {
                let _alive = alive;
                f();
            })
            .map_err(|e| ServerError::SpawnError {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        lock(&self.handles).push(handle);
        Ok(())
    }

    /// Prevents new threads from joining the group.
    pub fn seal(&self) {
        lock(&self.alive_tx).take();
    }

    /// Seals the group and waits up to `timeout` for every thread to return.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.seal();
        match self.alive_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {
                for handle in lock(&self.handles).drain(..) {
                    let _ = handle.join();
                }
                true
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// A long-running background thread with a soft and a hard stop signal.
///
/// `stop` asks the task to finish its current work and return; `kill`
/// asks it to return as soon as possible, abandoning outstanding work.
#[derive(Debug)]
pub struct BackgroundTask {
    tasks: TaskGroup,
    stop: CancellationToken,
    kill: CancellationToken,
}

impl BackgroundTask {
    /// Spawns `f` on a dedicated thread, handing it the stop and kill tokens.
    pub fn spawn<F>(name: &str, f: F) -> Result<Self, ServerError>
    where
        F: FnOnce(CancellationToken, CancellationToken) + Send + 'static,
    {
        let tasks = TaskGroup::new(name);
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();

        let (s, k) = (stop.clone(), kill.clone());
        tasks.spawn(move || f(s, k))?;
        tasks.seal();

        Ok(Self { tasks, stop, kill })
    }
}

impl Drainable for BackgroundTask {
    fn name(&self) -> &str {
        self.tasks.name()
    }

    fn shutdown(&self) {
        self.stop.cancel();
    }

    fn force_cancel(&self) {
        self.kill.cancel();
        self.stop.cancel();
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.tasks.await_termination(timeout)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned. Data might be in an inconsistent state.");
            poisoned.into_inner()
        }
    }
}
