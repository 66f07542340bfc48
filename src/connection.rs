//! Per-client session: reads lines, feeds the broker.
//!
//! A session ends on peer close, idle timeout, cancellation, a protocol
//! violation or a first-line `terminate`. The client never gets a reply.

use crate::broker::UniqueBroker;
use crate::cancel::CancellationToken;
use crate::defs::{MAX_LINE_LEN, POLL_TICK_MSEC};
use crate::errors::{ConnectionError, ProtocolError};
use crate::protocol::{Command, SessionState, advance, strip_terminator};

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback used by a session to ask the whole server to stop.
///
/// Several sessions may call it concurrently; it must be idempotent.
pub type TerminateFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// How a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side of the stream.
    PeerClosed,
    /// `terminate` was received as the first line.
    Terminated,
    /// No byte arrived within the idle timeout.
    IdleTimeout,
    /// The server cancelled the session during shutdown.
    Cancelled,
}

/// Serves one client connection.
///
/// Reads newline-terminated lines and feeds valid numbers into the broker.
/// The socket is closed on every exit path and nothing is ever written back.
pub struct ConnectionWorker {
    broker: Arc<UniqueBroker<i32>>,
    on_terminate: TerminateFn,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl ConnectionWorker {
    /// Creates a worker bound to a broker and a stop callback.
    pub fn new(
        broker: Arc<UniqueBroker<i32>>,
        on_terminate: TerminateFn,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            broker,
            on_terminate,
            idle_timeout,
            cancel,
        }
    }

    /// Runs the session to completion and closes the socket.
    pub fn run(&self, stream: TcpStream, addr: SocketAddr) -> Result<SessionEnd, ConnectionError> {
        log::debug!("[conn] session started: {}", addr);

        let result = self.serve(&stream, addr);
        let _ = stream.shutdown(Shutdown::Both);

        match &result {
            Ok(end) => log::debug!("[conn] session {} ended: {:?}", addr, end),
            Err(ConnectionError::Protocol(e)) => {
                log::debug!("[conn] closing {} after protocol violation: {}", addr, e)
            }
            Err(e) => log::warn!("[conn] session {} failed: {}", addr, e),
        }
        result
    }

    fn serve(&self, stream: &TcpStream, addr: SocketAddr) -> Result<SessionEnd, ConnectionError> {
        // Short read timeout so idle time and cancellation are checked
        // between reads.
        stream.set_read_timeout(Some(Duration::from_millis(POLL_TICK_MSEC)))?;

        let mut reader = BufReader::new(stream);
        let mut state = SessionState::AwaitingFirstLine;
        let mut line = Vec::with_capacity(MAX_LINE_LEN + 1);
        let mut last_activity = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }

            let before = line.len();
            let budget = (MAX_LINE_LEN + 1 - before) as u64;
            let res = reader.by_ref().take(budget).read_until(b'\n', &mut line);
            if line.len() > before {
                last_activity = Instant::now();
            }

            match res {
                Ok(0) => {
                    // Peer closed. A trailing fragment is still a line.
                    if !line.is_empty() && self.handle_line(&mut state, &line, addr)? {
                        return Ok(SessionEnd::Terminated);
                    }
                    log::debug!("[conn] {} closed connection", addr);
                    return Ok(SessionEnd::PeerClosed);
                }
                Ok(_) if line.last() == Some(&b'\n') => {
                    if self.handle_line(&mut state, &line, addr)? {
                        return Ok(SessionEnd::Terminated);
                    }
                    line.clear();
                }
                Ok(_) => {
                    if line.len() > MAX_LINE_LEN {
                        return Err(ProtocolError::LineTooLong(MAX_LINE_LEN).into());
                    }
                    // Partial line, the rest comes with the next read.
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if last_activity.elapsed() >= self.idle_timeout {
                        log::warn!(
                            "[conn] {} idle for {:?}, disconnecting",
                            addr,
                            self.idle_timeout
                        );
                        return Ok(SessionEnd::IdleTimeout);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Applies one raw line. Returns `true` when the session must end because
    /// of a `terminate` request.
    fn handle_line(
        &self,
        state: &mut SessionState,
        raw: &[u8],
        addr: SocketAddr,
    ) -> Result<bool, ConnectionError> {
        let text = std::str::from_utf8(strip_terminator(raw))
            .map_err(|_| ProtocolError::InvalidEncoding)?;

        let (command, next) = advance(*state, text)?;
        *state = next;

        match command {
            Command::Number(value) => {
                log::trace!("[conn] {} -> {}", addr, value);
                self.broker.put(value);
                Ok(false)
            }
            Command::Terminate => {
                log::info!("[conn] terminate requested by {}", addr);
                (self.on_terminate)();
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::{self, JoinHandle};

    struct Harness {
        broker: Arc<UniqueBroker<i32>>,
        terminations: Arc<AtomicUsize>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                broker: Arc::new(UniqueBroker::new()),
                terminations: Arc::new(AtomicUsize::new(0)),
                cancel: CancellationToken::new(),
            }
        }

        /// Starts a worker on one side of a loopback connection and returns
        /// the client side.
        fn spawn(
            &self,
            idle_timeout: Duration,
        ) -> (TcpStream, JoinHandle<Result<SessionEnd, ConnectionError>>) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            let (server_side, addr) = listener.accept().unwrap();

            let terminations = self.terminations.clone();
            let worker = ConnectionWorker::new(
                self.broker.clone(),
                Arc::new(move || {
                    terminations.fetch_add(1, Ordering::SeqCst);
                }),
                idle_timeout,
                self.cancel.clone(),
            );

            let handle = thread::spawn(move || worker.run(server_side, addr));
            (client, handle)
        }

        fn delivered(&self) -> Vec<i32> {
            let mut out = Vec::new();
            while let Some(v) = self.broker.try_get() {
                out.push(v);
            }
            out
        }
    }

    fn assert_closed(mut client: TcpStream) {
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 16];
        // Closed with no response: either EOF or a reset.
        match client.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0, "server must never reply"),
            Err(e) => assert_ne!(e.kind(), ErrorKind::WouldBlock),
        }
    }

    #[test]
    fn test_numbers_reach_broker() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client
            .write_all(b"000000001\n123456789\n-000000042\n000000001\n")
            .unwrap();
        drop(client);

        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::PeerClosed);
        assert_eq!(h.delivered(), vec![1, 123456789, -42]);
        assert_eq!(h.broker.total_count(), 4);
        assert_eq!(h.broker.duplicate_count(), 1);
    }

    #[test]
    fn test_terminate_first_line() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"terminate\n000000001\n").unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::Terminated);
        assert_eq!(h.terminations.load(Ordering::SeqCst), 1);
        assert_eq!(h.broker.total_count(), 0);
        assert_closed(client);
    }

    #[test]
    fn test_terminate_after_first_line_closes_only_connection() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"000000001\nterminate\n000000002\n").unwrap();

        let res = handle.join().unwrap();
        assert!(matches!(
            res,
            Err(ConnectionError::Protocol(ProtocolError::LateTerminate))
        ));
        assert_eq!(h.terminations.load(Ordering::SeqCst), 0);
        assert_eq!(h.delivered(), vec![1]);
        assert_closed(client);
    }

    #[test]
    fn test_malformed_first_line_puts_nothing() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"abc\n000000001\n").unwrap();

        let res = handle.join().unwrap();
        assert!(matches!(
            res,
            Err(ConnectionError::Protocol(ProtocolError::Malformed(_)))
        ));
        assert_eq!(h.broker.total_count(), 0);
        assert_closed(client);
    }

    #[test]
    fn test_short_number_rejected() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"000000001\n1\n000000002\n").unwrap();

        assert!(handle.join().unwrap().is_err());
        assert_eq!(h.delivered(), vec![1]);
    }

    #[test]
    fn test_crlf_and_split_writes() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"1234").unwrap();
        thread::sleep(Duration::from_millis(150));
        client.write_all(b"56789\r\n-00000").unwrap();
        thread::sleep(Duration::from_millis(150));
        client.write_all(b"0007\n").unwrap();
        drop(client);

        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::PeerClosed);
        assert_eq!(h.delivered(), vec![123456789, -7]);
    }

    #[test]
    fn test_unterminated_last_line_is_processed() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"000000003\n000000004").unwrap();
        drop(client);

        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::PeerClosed);
        assert_eq!(h.delivered(), vec![3, 4]);
    }

    #[test]
    fn test_overlong_line_rejected() {
        let h = Harness::new();
        let (mut client, handle) = h.spawn(Duration::from_secs(5));

        client.write_all(b"00000000000000000000000000000001\n").unwrap();

        assert!(matches!(
            handle.join().unwrap(),
            Err(ConnectionError::Protocol(ProtocolError::LineTooLong(_)))
        ));
        assert_eq!(h.broker.total_count(), 0);
    }

    #[test]
    fn test_idle_timeout_closes_connection() {
        let h = Harness::new();
        let (client, handle) = h.spawn(Duration::from_millis(200));

        let started = Instant::now();
        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::IdleTimeout);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_closed(client);
    }

    #[test]
    fn test_cancel_stops_blocked_read() {
        let h = Harness::new();
        let (_client, handle) = h.spawn(Duration::from_secs(30));

        thread::sleep(Duration::from_millis(100));
        h.cancel.cancel();

        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::Cancelled);
    }
}
