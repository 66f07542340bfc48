//! Server configuration.

use crate::defs::{
    DEFAULT_GRACE_PERIOD_SEC, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SEC, DEFAULT_LOG_PATH,
    DEFAULT_PORT, DEFAULT_STATS_INTERVAL_SEC, DEFAULT_WORKER_THREADS,
};
use crate::errors::ServerError;
use crate::shutdown::ShutdownMethod;

use std::path::PathBuf;
use std::time::Duration;

/// Server settings. Fixed for the lifetime of a server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host the listener binds to.
    pub host: String,
    /// Listening port; `0` picks an ephemeral port.
    pub port: u16,
    /// Concurrent connection workers.
    pub worker_threads: usize,
    /// A connection silent for this long is closed.
    pub idle_timeout: Duration,
    /// Period between two stats reports.
    pub stats_interval: Duration,
    /// Wait granted to each shutdown phase.
    pub grace_period: Duration,
    /// File receiving unique numbers.
    pub log_path: PathBuf,
    /// Policy applied by `shutdown()`.
    pub shutdown_method: ShutdownMethod,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            worker_threads: DEFAULT_WORKER_THREADS,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SEC),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SEC),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SEC),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            shutdown_method: ShutdownMethod::Graceful,
        }
    }
}

impl ServerConfig {
    /// Overrides `host`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Overrides `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides `worker_threads`.
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Overrides `idle_timeout`.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Overrides `stats_interval`.
    pub fn with_stats_interval(mut self, stats_interval: Duration) -> Self {
        self.stats_interval = stats_interval;
        self
    }

    /// Overrides `grace_period`.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Overrides `log_path`.
    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    /// Overrides `shutdown_method`.
    pub fn with_shutdown_method(mut self, shutdown_method: ShutdownMethod) -> Self {
        self.shutdown_method = shutdown_method;
        self
    }

    /// Address string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.worker_threads == 0 {
            return Err(ServerError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "idle_timeout must be positive".into(),
            ));
        }
        if self.stats_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "stats_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}
