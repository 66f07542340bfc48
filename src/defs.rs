//! Defaults and protocol constants.

/// Default TCP port the server accepts clients on.
pub const DEFAULT_PORT: u16 = 4000;

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default number of connection workers.
///
/// One more thread is always reserved for the log writer.
pub const DEFAULT_WORKER_THREADS: usize = 5;

/// Maximum allowed time (in seconds) without any byte from a client.
///
/// When it elapses the connection is closed silently.
pub const DEFAULT_IDLE_TIMEOUT_SEC: u64 = 30;

/// Period (in seconds) between two stats reports.
pub const DEFAULT_STATS_INTERVAL_SEC: u64 = 10;

/// Grace period (in seconds) granted to each shutdown phase.
pub const DEFAULT_GRACE_PERIOD_SEC: u64 = 3;

/// File the unique numbers are appended to.
pub const DEFAULT_LOG_PATH: &str = "numbers.log";

/// Polling interval (in milliseconds) used by blocking waits that have no
/// native wake-up: the accept loop and connection reads.
///
/// Bounds how long a cancellation takes to be observed.
pub const POLL_TICK_MSEC: u64 = 50;

/// Number of digits in a numeric report.
pub const NUMBER_DIGITS: usize = 9;

/// Longest line the protocol can accept: sign, digits and an optional `\r`.
///
/// Anything longer without a newline is treated as malformed.
pub const MAX_LINE_LEN: usize = NUMBER_DIGITS + 2;

/// Token that asks the server to stop when it is the first line of a session.
pub const TERMINATE_TOKEN: &str = "terminate";

/// Exit code used when the server has to abort.
pub const ABORT_EXIT_CODE: i32 = 1;
