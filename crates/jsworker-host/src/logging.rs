//! Print sinks for script `$print` output.
//!
//! Output from `$print` goes to stdout unless the worker is given a sink.
//! [`PrintLog`] is a capturing sink: lines are stored for later retrieval
//! and also emitted through `tracing`.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

/// One line printed by script code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintEntry {
    /// The printed text, arguments joined by single spaces.
    pub message: String,
    /// When the line was received.
    pub timestamp: Instant,
}

/// Capturing `$print` sink.
///
/// Clones share the same buffer, so one clone can be handed to a worker
/// while another is inspected.
#[derive(Debug, Clone)]
pub struct PrintLog {
    source: Arc<str>,
    entries: Arc<Mutex<Vec<PrintEntry>>>,
}

impl PrintLog {
    /// Create an empty log. `source` labels the emitted `tracing` events.
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Store a line and emit it via `tracing`.
    pub fn record(&self, message: &str) {
        self.entries.lock().push(PrintEntry {
            message: message.to_owned(),
            timestamp: Instant::now(),
        });
        info!(source = %self.source, guest_log = true, "{}", message);
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<PrintEntry> {
        self.entries.lock().clone()
    }

    /// Recorded messages without timestamps.
    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all recorded lines.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// A sink closure feeding this log.
    pub fn sink(&self) -> impl Fn(&str) + Send + Sync + 'static {
        let log = self.clone();
        move |line| log.record(line)
    }
}

impl Default for PrintLog {
    fn default() -> Self {
        Self::new("script")
    }
}

/// A sink writing each line to stdout.
pub fn stdout_sink() -> impl Fn(&str) + Send + Sync + 'static {
    |line| {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stores_lines_in_order() {
        let log = PrintLog::new("test");

        log.record("Hello");
        log.record("World");

        assert_eq!(log.len(), 2);
        assert_eq!(log.messages(), vec!["Hello".to_string(), "World".to_string()]);
        let entries = log.entries();
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn test_sink_shares_buffer() {
        let log = PrintLog::default();
        let sink = log.sink();

        sink("from sink");

        assert_eq!(log.messages(), vec!["from sink".to_string()]);
    }

    #[test]
    fn test_clear() {
        let log = PrintLog::default();
        log.record("x");
        log.clear();

        assert!(log.is_empty());
    }
}
