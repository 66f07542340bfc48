//! # Number Server
//!
//! This crate implements a concurrent TCP server that ingests 9-digit numbers
//! from many simultaneous clients, deduplicates them against every value seen
//! since startup, persists unique values to a log file and periodically
//! reports throughput and duplicate statistics.
//!
//! ## Features
//!
//! - Line-based TCP protocol, no response is ever sent to clients.
//! - Sharded deduplication broker shared by every connection.
//! - Bounded connection worker pool; extra connections wait for a free worker.
//! - Dedicated writer thread appending unique numbers to `numbers.log`.
//! - Stats line every interval: `received <total> numbers, <duplicates> duplicates`.
//! - Two-phase (graceful, then forced) shutdown with a final abrupt fallback.
//!
//! ## Architecture Overview
//!
//! - [`broker`](crate::broker) — Deduplicates values and hands them to consumers.
//! - [`protocol`](crate::protocol) — Parses protocol lines.
//! - [`connection`](crate::connection) — Serves one client session.
//! - [`number_log`](crate::number_log) — Persists unique values.
//! - [`stats`](crate::stats) — Periodic counters report.
//! - [`worker_pool`](crate::worker_pool) — Fixed-size pool running sessions.
//! - [`number_server`](crate::number_server) — Lifecycle: start, accept loop, stop, shutdown.
//! - [`shutdown`](crate::shutdown) — Draining / force-cancel escalation.
//! - [`tasks`](crate::tasks) — Awaitable thread groups.
//! - [`cancel`](crate::cancel) — Cooperative cancellation token.
//! - [`config`](crate::config) and [`defs`](crate::defs) — Settings and defaults.
//! - [`errors`](crate::errors) — Error types used across modules.
//!
//! ## TCP Protocol
//!
//! Each line must end with a newline (`\n`):
//!
//! - `terminate`
//!   Only as the first line of a connection: the server stops.
//!
//! - `[-]DDDDDDDDD`
//!   Exactly nine digits (leading zeros kept), optional minus sign.
//!
//! Any other input, or `terminate` after the first line, closes the
//! connection without a reply.
//!
//! ## Example: Running the Server
//!
//! ```no_run
//! use std::sync::Arc;
//! use number_server::config::ServerConfig;
//! use number_server::number_server::NumberServer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(NumberServer::new(ServerConfig::default().with_port(4000)));
//!
//!     // Blocks until a client sends `terminate` or `stop()` is called.
//!     server.run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unreachable_pub)]

pub mod broker;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod defs;
pub mod errors;
pub mod number_log;
pub mod number_server;
pub mod protocol;
pub mod shutdown;
pub mod stats;
pub mod tasks;
pub mod worker_pool;
