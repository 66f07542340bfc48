//! Load-generating client for the Number Server.
//!
//! Opens several concurrent connections and sends random 9-digit numbers on
//! each, or a single `terminate` line with `--terminate`.

use rand::Rng;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Instant;
use structopt::StructOpt;

/// Exclusive upper bound of the generated magnitudes.
const MAX_VALUE: i32 = 1_000_000_000;

/// Command-line options for the client
#[derive(Debug, StructOpt)]
#[structopt(name = "number_client", about = "Load generator for the number server")]
struct Opt {
    /// TCP server address, e.g., 127.0.0.1:4000
    #[structopt(short, long, default_value = "127.0.0.1:4000")]
    server_addr: String,

    /// Number of concurrent connections
    #[structopt(short, long, default_value = "5")]
    connections: usize,

    /// Numbers sent on each connection
    #[structopt(short, long, default_value = "100")]
    numbers: usize,

    /// Send `terminate` instead of numbers
    #[structopt(short, long)]
    terminate: bool,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

/// Formats a value the way the server expects it: sign plus nine digits.
fn format_number(value: i32) -> String {
    if value < 0 {
        format!("-{:09}", value.unsigned_abs())
    } else {
        format!("{:09}", value)
    }
}

/// Sends `count` random numbers over one connection.
fn send_numbers(addr: &str, count: usize) -> io::Result<()> {
    let stream = TcpStream::connect(addr)?;
    let mut out = BufWriter::new(stream);
    let mut rng = rand::thread_rng();

    for _ in 0..count {
        let magnitude = rng.gen_range(0..MAX_VALUE);
        let value = if rng.gen_bool(0.5) { -magnitude } else { magnitude };
        writeln!(out, "{}", format_number(value))?;
    }
    out.flush()
}

/// Asks the server to stop.
fn send_terminate(addr: &str) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(b"terminate\n")?;
    stream.flush()
}

fn main() -> io::Result<()> {
    let opt = Opt::from_args();
    env_logger::Builder::new()
        .parse_filters(&opt.log_level)
        .format_timestamp_micros()
        .init();

    if opt.terminate {
        log::info!("Sending terminate to {}", opt.server_addr);
        return send_terminate(&opt.server_addr);
    }

    log::info!(
        "Starting {} connections x {} numbers against {}",
        opt.connections,
        opt.numbers,
        opt.server_addr
    );
    let started = Instant::now();

    let handles: Vec<_> = (0..opt.connections)
        .map(|i| {
            let addr = opt.server_addr.clone();
            let count = opt.numbers;
            thread::spawn(move || {
                if let Err(e) = send_numbers(&addr, count) {
                    log::error!("Connection {} failed: {}", i, e);
                }
            })
        })
        .collect();

    for h in handles {
        let _ = h.join();
    }

    let elapsed = started.elapsed();
    let sent = opt.connections * opt.numbers;
    let rate = sent as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("elapsed: {:?} num/sec: {:.0}", elapsed, rate);
    Ok(())
}
