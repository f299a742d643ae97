//! Capturing log output in tests.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Log output recorded by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    output: String,
}

impl CapturedLogs {
    /// Returns the raw formatted output.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.output
    }

    /// Returns the formatted lines.
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.output.lines().collect()
    }

    /// Returns the lines emitted at warning level.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.output
            .lines()
            .filter(|line| line.trim_start().starts_with("WARN"))
            .collect()
    }

    /// Returns how many lines contain `needle`.
    #[must_use]
    pub fn count(&self, needle: &str) -> usize {
        self.output.lines().filter(|line| line.contains(needle)).count()
    }

    /// Returns true if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }
}

/// Runs `f` with a subscriber that records events up to `level`.
///
/// Only events emitted on the current thread are captured.
pub fn capture_logs<R>(level: Level, f: impl FnOnce() -> R) -> (R, CapturedLogs) {
    let buffer = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
    (result, CapturedLogs { output })
}
