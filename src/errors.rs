//! Error types.

use thiserror::Error;

/// Reasons a received line is rejected by the line protocol.
///
/// Every variant closes the connection silently; the client never sees them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line is neither a 9-digit number nor `terminate`.
    #[error("Malformed line: {0:?}")]
    Malformed(String),

    /// `terminate` arrived after the first line of the session.
    #[error("terminate is only accepted as the first line")]
    LateTerminate,

    /// The line grew past the longest valid token without a newline.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The line is not valid UTF-8.
    #[error("Line is not valid UTF-8")]
    InvalidEncoding,
}

/// Errors ending a single client connection.
///
/// These never affect the broker or the server state.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// I/O error while talking to the client.
    #[error("Client IO error: {0}")]
    ClientIoError(#[from] std::io::Error),

    /// The client broke the line protocol.
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors produced by the numbers log writer.
///
/// Any of them is fatal: values cannot be dropped silently.
#[derive(Error, Debug)]
pub enum LogWriterError {
    /// The log file could not be created.
    #[error("Can't open log {path}: {source}")]
    OpenError {
        /// Path of the log file.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Appending or flushing a value failed.
    #[error("Can't write to log {path}: {source}")]
    WriteError {
        /// Path of the log file.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}

/// Errors produced by the server lifecycle.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The TCP listener failed to bind to the configured address/port.
    #[error("Can't start server on {addr}: {reason}")]
    BindError {
        /// Address the bind was attempted on.
        addr: String,
        /// Why it failed.
        reason: String,
    },

    /// Error while accepting an incoming TCP client connection.
    #[error("Failed to accept TCP connection: {0}")]
    AcceptError(String),

    /// A configuration value is out of range.
    #[error("Invalid server config: {0}")]
    InvalidConfig(String),

    /// A lifecycle operation was requested from the wrong state.
    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    /// A background thread could not be spawned.
    #[error("Failed to spawn thread {name}: {reason}")]
    SpawnError {
        /// Thread name.
        name: String,
        /// Why it failed.
        reason: String,
    },

    /// Work was submitted to a pool that no longer accepts it.
    #[error("Worker pool is shut down")]
    PoolClosed,

    /// The numbers log could not be prepared.
    #[error("Log writer error: {0}")]
    LogWriter(#[from] LogWriterError),
}

/// High-level errors returned by the server and client binaries.
#[derive(Error, Debug)]
pub enum CliError {
    /// General wrapper around any textual failure.
    #[error("Cli failed with error: {0}")]
    GeneralError(String),
}

impl From<ServerError> for CliError {
    fn from(err: ServerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::GeneralError(err.to_string())
    }
}
