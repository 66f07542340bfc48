//! # Number Server
//!
//! TCP server collecting 9-digit numbers from many clients.
//!
//! ## Features
//! - Deduplicates every number received since startup.
//! - Appends unique numbers to a log file, one per line.
//! - Prints `received <total> numbers, <duplicates> duplicates` every interval.
//! - Stops on a client's `terminate`, on Ctrl-C / SIGTERM, or after an optional run time.
//!
//! ## Command-line Options
//! - `--port` / `-p`: TCP listen port (default `4000`).
//! - `--host`: bind host (default `0.0.0.0`).
//! - `--workers` / `-w`: concurrent client connections (default `5`).
//! - `--idle-timeout-sec`, `--stats-interval-sec`, `--grace-period-sec`: timings.
//! - `--log-file` / `-f`: numbers log (default `numbers.log`).
//! - `--abrupt`: exit immediately on shutdown instead of draining.
//! - `--log-level` / `-l`: Log level (`error`, `warn`, `info`, `debug`, `trace`).
//! - `[MAX_RUN_MINUTES]`: stop the server after this many minutes.

use crossbeam_channel::{RecvTimeoutError, bounded};
use number_server::config::ServerConfig;
use number_server::errors::CliError;
use number_server::number_server::NumberServer;
use number_server::shutdown::ShutdownMethod;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

/// Command-line options for the Number Server
#[derive(Debug, StructOpt)]
#[structopt(
    name = "number_server",
    about = "TCP server deduplicating and logging 9-digit numbers"
)]
struct Opt {
    /// TCP listen port
    #[structopt(short, long, default_value = "4000")]
    port: u16,

    /// Bind host
    #[structopt(long, default_value = "0.0.0.0")]
    host: String,

    /// Number of concurrent client connections served
    #[structopt(short, long, default_value = "5")]
    workers: usize,

    /// Close a client connection after this many idle seconds
    #[structopt(long, default_value = "30")]
    idle_timeout_sec: u64,

    /// Seconds between two stats lines
    #[structopt(long, default_value = "10")]
    stats_interval_sec: u64,

    /// Seconds granted to each shutdown phase
    #[structopt(long, default_value = "3")]
    grace_period_sec: u64,

    /// File receiving unique numbers
    #[structopt(short = "f", long, default_value = "numbers.log", parse(from_os_str))]
    log_file: PathBuf,

    /// Exit immediately on shutdown instead of draining connections
    #[structopt(long)]
    abrupt: bool,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,

    /// Stop the server after this many minutes
    max_run_minutes: Option<u64>,
}

impl Opt {
    fn to_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_worker_threads(self.workers)
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_sec))
            .with_stats_interval(Duration::from_secs(self.stats_interval_sec))
            .with_grace_period(Duration::from_secs(self.grace_period_sec))
            .with_log_path(self.log_file.clone())
            .with_shutdown_method(if self.abrupt {
                ShutdownMethod::Abrupt
            } else {
                ShutdownMethod::Graceful
            })
    }
}

/// Initializes the logger using env_logger with the given level
fn init_logger(level: &str) -> Result<(), CliError> {
    let mut builder = env_logger::Builder::new();

    let log_level = match level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    builder.filter_level(log_level);
    builder.format_timestamp_micros();
    builder.format_module_path(false);
    builder.format_target(false);
    builder
        .try_init()
        .map_err(|e| CliError::GeneralError(e.to_string()))
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();
    init_logger(&opt.log_level)?;

    log::info!("Starting Number Server");
    log::debug!("Command line options: {:?}", opt);

    let server = Arc::new(NumberServer::new(opt.to_config()));

    // Covers Ctrl-C and SIGTERM. Both calls are idempotent.
    {
        let server = server.clone();
        ctrlc::set_handler(move || {
            log::info!("Termination signal received");
            server.stop();
            server.shutdown();
        })
        .map_err(|e| CliError::GeneralError(format!("Can't install signal handler: {}", e)))?;
    }

    let (done_tx, done_rx) = bounded(1);
    let runner = server.clone();
    let server_thread = thread::Builder::new()
        .name("accept".into())
        .spawn(move || {
            let res = runner.run();
            let _ = done_tx.send(());
            res
        })?;

    if let Some(minutes) = opt.max_run_minutes {
        let limit = Duration::from_secs(minutes * 60);
        log::info!("Server will stop after {} minute(s)", minutes);
        if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(limit) {
            log::info!("Maximum run time reached");
            server.stop();
            server.shutdown();
        }
    }

    let result = server_thread
        .join()
        .map_err(|_| CliError::GeneralError("server thread panicked".into()))?;
    result?;

    log::info!("Server shutdown complete");
    Ok(())
}
