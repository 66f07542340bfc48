//! Bounded pool running connection sessions.

use crate::cancel::CancellationToken;
use crate::errors::ServerError;
use crate::shutdown::Drainable;
use crate::tasks::{TaskGroup, lock};

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::time::Duration;

/// A unit of work run by the pool. It receives the pool's cancellation token
/// and is expected to return promptly once it fires.
pub type Job = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Fixed-size pool of threads sharing one unbounded job queue.
///
/// Jobs submitted while every thread is busy wait in the queue; nothing is
/// rejected until [`shutdown`](Drainable::shutdown) is called.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    jobs_tx: Mutex<Option<Sender<Job>>>,
    jobs_rx: Receiver<Job>,
    cancel: CancellationToken,
    tasks: TaskGroup,
}

impl WorkerPool {
    /// Spawns `size` worker threads.
    pub fn new(name: &str, size: usize) -> Result<Self, ServerError> {
        if size == 0 {
            return Err(ServerError::InvalidConfig(
                "worker pool needs at least one thread".into(),
            ));
        }

        let (tx, rx) = unbounded::<Job>();
        let cancel = CancellationToken::new();
        let tasks = TaskGroup::new(name);

        for _ in 0..size {
            let rx = rx.clone();
            let cancel = cancel.clone();
            tasks.spawn(move || worker_loop(rx, cancel))?;
        }
        tasks.seal();

        log::info!("Worker pool '{}' started with {} threads", name, size);

        Ok(Self {
            size,
            jobs_tx: Mutex::new(Some(tx)),
            jobs_rx: rx,
            cancel,
            tasks,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs waiting for a free thread.
    pub fn queued(&self) -> usize {
        self.jobs_rx.len()
    }

    /// Queues a job.
    pub fn execute<F>(&self, job: F) -> Result<(), ServerError>
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let guard = lock(&self.jobs_tx);
        let tx = guard.as_ref().ok_or(ServerError::PoolClosed)?;
        tx.send(Box::new(job)).map_err(|_| ServerError::PoolClosed)
    }
}

fn worker_loop(rx: Receiver<Job>, cancel: CancellationToken) {
    loop {
        select! {
            recv(rx) -> job => match job {
                Ok(job) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if catch_unwind(AssertUnwindSafe(|| job(&cancel))).is_err() {
                        log::error!("Worker job panicked");
                    }
                }
                // Intake closed and queue drained.
                Err(_) => break,
            },
            recv(cancel.receiver()) -> _ => break,
        }
    }
}

impl Drainable for WorkerPool {
    fn name(&self) -> &str {
        self.tasks.name()
    }

    fn shutdown(&self) {
        if lock(&self.jobs_tx).take().is_some() {
            log::debug!("Worker pool '{}' closed to new jobs", self.name());
        }
    }

    fn force_cancel(&self) {
        self.shutdown();
        self.cancel.cancel();

        let mut discarded = 0;
        while self.jobs_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            log::warn!(
                "Worker pool '{}' discarded {} queued jobs",
                self.name(),
                discarded
            );
        }
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.tasks.await_termination(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_runs_all_jobs_before_terminating() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let done = done.clone();
            pool.execute(move |_| {
                thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_rejects_jobs_after_shutdown() {
        let pool = WorkerPool::new("test", 1).unwrap();
        pool.shutdown();
        assert!(matches!(pool.execute(|_| {}), Err(ServerError::PoolClosed)));
        assert!(pool.await_termination(Duration::from_secs(2)));
    }

    #[test]
    fn test_excess_jobs_wait_for_free_slot() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let gate = CancellationToken::new();

        for _ in 0..3 {
            let started = started.clone();
            let gate = gate.clone();
            pool.execute(move |_| {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = gate.receiver().recv();
            })
            .unwrap();
        }

        thread::sleep(Duration::from_millis(50));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(pool.queued(), 2);

        gate.cancel();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(2)));
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_force_cancel_reaches_running_jobs() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(|cancel| {
            let _ = cancel.receiver().recv();
        })
        .unwrap();
        for _ in 0..3 {
            let ran = ran.clone();
            pool.execute(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert!(!pool.await_termination(Duration::from_millis(50)));

        pool.force_cancel();
        assert!(pool.await_termination(Duration::from_secs(2)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        pool.execute(|_| panic!("job failure")).unwrap();
        let d = done.clone();
        pool.execute(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(2)));
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(WorkerPool::new("test", 0).is_err());
    }
}
