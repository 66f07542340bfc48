//! Two-phase shutdown of the server's background components.
//!
//! Each component goes through
//! `Running -> Draining -> ForceCancel -> Terminated`, waiting up to one grace
//! period after the first two transitions. A component still alive after the
//! second wait escalates to [`ShutdownPhase::Abrupt`] and the process exits.

use crate::defs::ABORT_EXIT_CODE;

use std::fmt;
use std::time::Duration;

/// How the server shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMethod {
    /// Let in-flight work finish, then force-cancel, then exit the process.
    #[default]
    Graceful,
    /// Exit the process immediately.
    Abrupt,
}

/// Shutdown progress of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Still accepting work.
    Running,
    /// Intake closed, in-flight work allowed to finish.
    Draining,
    /// Outstanding work cancelled.
    ForceCancel,
    /// Every thread of the component returned.
    Terminated,
    /// The component did not stop in time; the process must exit.
    Abrupt,
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownPhase::Running => "running",
            ShutdownPhase::Draining => "draining",
            ShutdownPhase::ForceCancel => "force-cancel",
            ShutdownPhase::Terminated => "terminated",
            ShutdownPhase::Abrupt => "abrupt",
        };
        f.write_str(name)
    }
}

/// A component that can be stopped in two steps.
pub trait Drainable {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Stops accepting new work; work in progress continues.
    fn shutdown(&self);

    /// Cancels work in progress and discards queued work.
    fn force_cancel(&self);

    /// Waits up to `timeout` for the component to stop. Returns `true` if it
    /// did.
    fn await_termination(&self, timeout: Duration) -> bool;
}

/// Runs the two-phase sequence on one component.
///
/// Returns [`ShutdownPhase::Terminated`] or [`ShutdownPhase::Abrupt`].
pub fn drain(component: &dyn Drainable, grace: Duration) -> ShutdownPhase {
    let mut phase = ShutdownPhase::Running;

    loop {
        phase = match phase {
            ShutdownPhase::Running => {
                component.shutdown();
                ShutdownPhase::Draining
            }
            ShutdownPhase::Draining => {
                if component.await_termination(grace) {
                    ShutdownPhase::Terminated
                } else {
                    log::warn!(
                        "{} did not stop within {:?}, cancelling outstanding work",
                        component.name(),
                        grace
                    );
                    component.force_cancel();
                    ShutdownPhase::ForceCancel
                }
            }
            ShutdownPhase::ForceCancel => {
                if component.await_termination(grace) {
                    ShutdownPhase::Terminated
                } else {
                    log::error!("Can't shutdown: {}", component.name());
                    ShutdownPhase::Abrupt
                }
            }
            done @ (ShutdownPhase::Terminated | ShutdownPhase::Abrupt) => {
                log::debug!("{} shutdown finished: {}", component.name(), done);
                return done;
            }
        };
        log::trace!("{} -> {}", component.name(), phase);
    }
}

/// Terminates the process immediately, bypassing any further cleanup.
pub fn abort_process(reason: &str) -> ! {
    log::error!("Aborting: {}", reason);
    log::logger().flush();
    std::process::exit(ABORT_EXIT_CODE)
}
