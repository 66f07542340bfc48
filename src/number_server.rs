//! Server lifecycle: start, accept loop, stop and shutdown.

use crate::broker::UniqueBroker;
use crate::config::ServerConfig;
use crate::connection::ConnectionWorker;
use crate::defs::POLL_TICK_MSEC;
use crate::errors::{LogWriterError, ServerError};
use crate::number_log::NumberLogWriter;
use crate::shutdown::{Drainable, ShutdownMethod, ShutdownPhase, abort_process, drain};
use crate::stats::{ConsoleStatsSink, StatsReporter, StatsSink};
use crate::tasks::{BackgroundTask, lock};
use crate::worker_pool::WorkerPool;

use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

/// Lifecycle state of a [`NumberServer`].
///
/// Transitions are `Stopped -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not started, or fully shut down.
    Stopped,
    /// Accepting connections.
    Running,
    /// Listener closed, background work draining.
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Background components owned by a running server.
struct Runtime {
    pool: WorkerPool,
    writer: BackgroundTask,
    stats: BackgroundTask,
}

/// TCP server accepting 9-digit numbers from many clients.
///
/// Owns the deduplication broker, the connection worker pool, the log writer
/// thread and the stats timer, and drives the lifecycle state machine.
///
/// [`stop`](Self::stop) and [`shutdown`](Self::shutdown) may be called from
/// any thread, any number of times.
pub struct NumberServer {
    config: ServerConfig,
    broker: Arc<UniqueBroker<i32>>,
    stats_sink: Arc<dyn StatsSink>,

    /// Single source of truth for the lifecycle.
    state: Mutex<ServerState>,
    /// `None` once closed; dropping it is what releases the port.
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    runtime: Mutex<Option<Runtime>>,
    /// Serialises concurrent `shutdown()` calls.
    shutdown_lock: Mutex<()>,
}

impl NumberServer {
    /// Creates a server printing stats to the console.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_stats_sink(config, Arc::new(ConsoleStatsSink))
    }

    /// Creates a server reporting stats to `stats_sink`.
    pub fn with_stats_sink(config: ServerConfig, stats_sink: Arc<dyn StatsSink>) -> Self {
        Self {
            config,
            broker: Arc::new(UniqueBroker::new()),
            stats_sink,
            state: Mutex::new(ServerState::Stopped),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            runtime: Mutex::new(None),
            shutdown_lock: Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// The shared deduplication broker.
    pub fn broker(&self) -> &Arc<UniqueBroker<i32>> {
        &self.broker
    }

    /// Configuration this server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts the server, serves clients until stopped, then shuts down.
    pub fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        self.start()?;
        self.accept_loop();
        self.shutdown();
        Ok(())
    }

    /// Binds the listener and launches the log writer, the stats timer and
    /// the worker pool.
    ///
    /// On error nothing keeps running and the state stays `Stopped`.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut state = lock(&self.state);
        if *state != ServerState::Stopped {
            return Err(ServerError::InvalidState(format!(
                "start() called while {}",
                *state
            )));
        }
        self.config.validate()?;

        let addr = self.config.bind_addr();
        log::info!("Starting server on {}", addr);

        let listener = TcpListener::bind(&addr).map_err(|e| ServerError::BindError {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        // Non-blocking so the accept loop can notice the listener being closed.
        listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().ok();

        let writer = self.spawn_log_writer()?;
        let stats = match StatsReporter::new(self.broker.clone(), self.stats_sink.clone())
            .spawn(self.config.stats_interval)
        {
            Ok(stats) => stats,
            Err(e) => {
                stop_now(&writer);
                return Err(e);
            }
        };
        let pool = match WorkerPool::new("conn", self.config.worker_threads) {
            Ok(pool) => pool,
            Err(e) => {
                stop_now(&writer);
                stop_now(&stats);
                return Err(e);
            }
        };

        *lock(&self.listener) = Some(listener);
        *lock(&self.local_addr) = local_addr;
        *lock(&self.runtime) = Some(Runtime {
            pool,
            writer,
            stats,
        });
        *state = ServerState::Running;

        log::info!("Running on {}", local_addr.map_or(addr, |a| a.to_string()));
        Ok(())
    }

    fn spawn_log_writer(&self) -> Result<BackgroundTask, ServerError> {
        let mut writer = NumberLogWriter::create(&self.config.log_path, self.broker.clone())?;

        BackgroundTask::spawn("log-writer", move |stop, kill| {
            if let Err(e) = writer.run(&stop, &kill) {
                fatal_log_error(e);
            }
        })
    }

    /// Accepts clients and dispatches them to the worker pool until the state
    /// leaves `Running`.
    pub fn accept_loop(self: &Arc<Self>) {
        log::info!("Accept loop started");
        let tick = Duration::from_millis(POLL_TICK_MSEC);

        while self.state() == ServerState::Running {
            let accepted = match lock(&self.listener).as_ref() {
                Some(listener) => listener.accept(),
                None => break,
            };

            match accepted {
                Ok((stream, addr)) => self.dispatch(stream, addr),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(tick),
                Err(e) => {
                    // An error caused by stop() closing the listener is expected.
                    if self.state() == ServerState::Running {
                        log::error!("{}", ServerError::AcceptError(e.to_string()));
                    } else {
                        log::debug!("Accept interrupted by stop: {}", e);
                    }
                }
            }
        }
        log::info!("Accept loop finished");
    }

    fn dispatch(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        log::debug!("New TCP connection from: {}", addr);

        if let Err(e) = stream.set_nonblocking(false) {
            log::warn!("Dropping connection {}: {}", addr, e);
            return;
        }

        let broker = self.broker.clone();
        let idle_timeout = self.config.idle_timeout;
        let server: Weak<Self> = Arc::downgrade(self);

        let runtime = lock(&self.runtime);
        let Some(runtime) = runtime.as_ref() else {
            log::debug!("Server shutting down, dropping connection {}", addr);
            return;
        };

        let submitted = runtime.pool.execute(move |cancel| {
            let on_terminate = Arc::new(move || {
                if let Some(server) = server.upgrade() {
                    server.stop();
                }
            });
            let worker = ConnectionWorker::new(broker, on_terminate, idle_timeout, cancel.clone());
            let _ = worker.run(stream, addr);
        });

        if let Err(e) = submitted {
            log::debug!("Dropping connection {}: {}", addr, e);
        }
    }

    /// Moves `Running` to `Stopping` and closes the listener.
    ///
    /// Closing the listener is what makes the accept loop exit. Calls in any
    /// other state are no-ops.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if *state != ServerState::Running {
            log::debug!("stop() ignored while {}", *state);
            return;
        }
        *state = ServerState::Stopping;
        drop(lock(&self.listener).take());
        log::info!("Server stopping, listener closed");
    }

    /// Shuts the server down using the configured [`ShutdownMethod`].
    pub fn shutdown(&self) {
        match self.config.shutdown_method {
            ShutdownMethod::Graceful => self.graceful_shutdown(),
            ShutdownMethod::Abrupt => abort_process("abrupt shutdown requested"),
        }
    }

    /// Drains the worker pool, then the log writer, then the stats timer,
    /// each through the two-phase sequence. A component that survives both
    /// phases terminates the process.
    fn graceful_shutdown(&self) {
        let _serial = lock(&self.shutdown_lock);

        if self.state() == ServerState::Stopped {
            return;
        }
        // Always pass through Stopping, even when called while Running.
        self.stop();
        log::info!("Shutting down");

        let runtime = lock(&self.runtime).take();
        if let Some(runtime) = runtime {
            let grace = self.config.grace_period;
            let components: [&dyn Drainable; 3] =
                [&runtime.pool, &runtime.writer, &runtime.stats];

            for component in components {
                if drain(component, grace) == ShutdownPhase::Abrupt {
                    abort_process(&format!("{} did not stop", component.name()));
                }
            }
        }

        *lock(&self.local_addr) = None;
        *lock(&self.state) = ServerState::Stopped;
        log::info!("Server stopped");
    }
}

impl fmt::Debug for NumberServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberServer")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("broker", &self.broker)
            .finish()
    }
}

/// Stops a component that never served any traffic.
fn stop_now(component: &dyn Drainable) {
    component.force_cancel();
    component.await_termination(Duration::from_secs(1));
}

/// Losing values silently is not an option: a failed write ends the process.
fn fatal_log_error(e: LogWriterError) -> ! {
    abort_process(&e.to_string())
}
