//! Writer persisting unique numbers to the numbers log.

use crate::broker::{Delivery, UniqueBroker};
use crate::cancel::CancellationToken;
use crate::errors::LogWriterError;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Single consumer persisting unique numbers, one decimal value per line.
///
/// The destination is opened (and truncated) once, when the writer is
/// created, and kept for the writer's whole lifetime.
pub struct NumberLogWriter<W: Write = BufWriter<File>> {
    out: W,
    label: String,
    broker: Arc<UniqueBroker<i32>>,
    written: u64,
}

impl NumberLogWriter {
    /// Creates (or truncates) the log file at `path`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        broker: Arc<UniqueBroker<i32>>,
    ) -> Result<Self, LogWriterError> {
        let label = path.as_ref().display().to_string();
        let file = File::create(&path).map_err(|source| LogWriterError::OpenError {
            path: label.clone(),
            source,
        })?;
        log::info!("Logging unique numbers to {}", label);
        Ok(Self::with_writer(BufWriter::new(file), label, broker))
    }
}

impl<W: Write> NumberLogWriter<W> {
    /// Wraps an arbitrary writer; `label` names it in errors and logs.
    pub fn with_writer(out: W, label: String, broker: Arc<UniqueBroker<i32>>) -> Self {
        Self {
            out,
            label,
            broker,
            written: 0,
        }
    }

    /// Number of values appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Consumes the broker until `stop` fires.
    ///
    /// After `stop`, values still queued are persisted unless `kill` has
    /// fired too. Returns the number of values written. Any I/O error ends
    /// the loop; the caller must treat it as fatal.
    pub fn run(
        &mut self,
        stop: &CancellationToken,
        kill: &CancellationToken,
    ) -> Result<u64, LogWriterError> {
        log::info!("Number log writer started");

        while let Delivery::Element(value) = self.broker.get(stop) {
            self.append(value)?;
        }

        while !kill.is_cancelled() {
            match self.broker.try_get() {
                Some(value) => self.append(value)?,
                None => break,
            }
        }

        self.flush()?;
        log::info!(
            "Number log writer stopped after {} values ({} left unwritten)",
            self.written,
            self.broker.pending()
        );
        Ok(self.written)
    }

    fn append(&mut self, value: i32) -> Result<(), LogWriterError> {
        writeln!(self.out, "{}", value).map_err(|source| self.write_error(source))?;
        self.written += 1;

        // Flush whenever the queue runs dry so idle periods leave nothing
        // buffered in memory.
        if self.broker.pending() == 0 {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LogWriterError> {
        self.out.flush().map_err(|source| self.write_error(source))
    }

    fn write_error(&self, source: std::io::Error) -> LogWriterError {
        LogWriterError::WriteError {
            path: self.label.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::thread;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_persists_unique_values_in_order() {
        let file = NamedTempFile::new().unwrap();
        let broker = Arc::new(UniqueBroker::new());
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();

        let mut writer = NumberLogWriter::create(file.path(), broker.clone()).unwrap();
        let handle = {
            let (stop, kill) = (stop.clone(), kill.clone());
            thread::spawn(move || writer.run(&stop, &kill))
        };

        for v in [5, -3, 5, 123456789, -3] {
            broker.put(v);
        }
        thread::sleep(Duration::from_millis(50));
        stop.cancel();

        assert_eq!(handle.join().unwrap().unwrap(), 3);
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "5\n-3\n123456789\n");
    }

    #[test]
    fn test_stop_drains_queue() {
        let broker = Arc::new(UniqueBroker::new());
        for v in 0..100 {
            broker.put(v);
        }

        let stop = CancellationToken::new();
        stop.cancel();
        let kill = CancellationToken::new();

        let mut writer = NumberLogWriter::with_writer(Vec::new(), "mem".into(), broker.clone());
        assert_eq!(writer.run(&stop, &kill).unwrap(), 100);
        assert_eq!(broker.pending(), 0);

        let text = String::from_utf8(writer.out).unwrap();
        assert_eq!(text.lines().count(), 100);
        assert_eq!(text.lines().last(), Some("99"));
    }

    #[test]
    fn test_kill_abandons_queue() {
        let broker = Arc::new(UniqueBroker::new());
        for v in 0..10 {
            broker.put(v);
        }

        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        stop.cancel();
        kill.cancel();

        let mut writer = NumberLogWriter::with_writer(Vec::new(), "mem".into(), broker.clone());
        assert_eq!(writer.run(&stop, &kill).unwrap(), 0);
        assert_eq!(broker.pending(), 10);
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "old content\n").unwrap();

        let broker = Arc::new(UniqueBroker::new());
        let _writer = NumberLogWriter::create(file.path(), broker).unwrap();

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "");
    }

    #[test]
    fn test_create_fails_for_missing_directory() {
        let broker = Arc::new(UniqueBroker::new());
        let res = NumberLogWriter::create("/nonexistent-dir/numbers.log", broker);
        assert!(matches!(res, Err(LogWriterError::OpenError { .. })));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let broker = Arc::new(UniqueBroker::new());
        broker.put(1);

        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let mut writer = NumberLogWriter::with_writer(FailingWriter, "broken".into(), broker);

        let res = writer.run(&stop, &kill);
        assert!(matches!(res, Err(LogWriterError::WriteError { .. })));
        assert_eq!(writer.written(), 0);
    }
}
