//! Periodic stats reporting.

use crate::broker::UniqueBroker;
use crate::errors::ServerError;
use crate::tasks::BackgroundTask;

use crossbeam_channel::select;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Counters reported at the end of one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Numbers received since startup.
    pub total: u64,
    /// Duplicates received since the previous report.
    pub duplicates: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received {} numbers, {} duplicates",
            self.total, self.duplicates
        )
    }
}

/// Destination of periodic stats reports.
pub trait StatsSink: Send + Sync {
    /// Publishes one report.
    fn emit(&self, snapshot: StatsSnapshot);
}

/// Prints each report as one line on standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleStatsSink;

impl StatsSink for ConsoleStatsSink {
    fn emit(&self, snapshot: StatsSnapshot) {
        println!("{}", snapshot);
    }
}

/// Reads broker counters and forwards them to a sink.
pub struct StatsReporter<T> {
    broker: Arc<UniqueBroker<T>>,
    sink: Arc<dyn StatsSink>,
}

impl<T> StatsReporter<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a reporter for `broker`.
    pub fn new(broker: Arc<UniqueBroker<T>>, sink: Arc<dyn StatsSink>) -> Self {
        Self { broker, sink }
    }

    /// Emits one report and resets the duplicate counter.
    ///
    /// The total is read first; the duplicate count is then taken and reset
    /// in a single swap, so a duplicate arriving mid-report is counted in
    /// either this report or the next one.
    pub fn report(&self) -> StatsSnapshot {
        let snapshot = StatsSnapshot {
            total: self.broker.total_count(),
            duplicates: self.broker.reset_duplicate_count(),
        };
        self.sink.emit(snapshot);
        log::debug!("stats: {}", snapshot);
        snapshot
    }

    /// Starts a dedicated timer thread reporting every `interval`.
    ///
    /// The first report happens one interval after start. Reports are
    /// scheduled with a fixed delay, so two firings never overlap.
    pub fn spawn(self, interval: Duration) -> Result<BackgroundTask, ServerError> {
        log::info!("Reporting stats every {:?}", interval);
        BackgroundTask::spawn("stats", move |stop, _kill| {
            loop {
                select! {
                    recv(stop.receiver()) -> _ => break,
                    default(interval) => {
                        self.report();
                    }
                }
            }
            log::debug!("Stats timer stopped");
        })
    }
}
