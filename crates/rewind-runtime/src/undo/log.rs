#![forbid(unsafe_code)]

//! Logging sink for suppressed rollback failures.
//!
//! Composite units undo their already-executed children when a sibling
//! fails. Errors raised during that rollback are never escalated; they are
//! handed to a [`LogSink`] instead. The default sink forwards to `tracing`
//! under the `rewind.undo` target.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::unit::UnitError;

/// Tracing target used by the engine.
pub const LOG_TARGET: &str = "rewind.undo";

/// Destination for messages the engine reports but does not raise.
pub trait LogSink: Send + Sync {
    /// Record a message plus an optional error.
    fn log(&self, message: &str, error: Option<&UnitError>);
}

impl fmt::Debug for dyn LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink")
    }
}

/// Sink that emits `tracing` events.
///
/// Messages with an error are logged at `WARN`, plain messages at `INFO`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, message: &str, error: Option<&UnitError>) {
        match error {
            Some(error) => tracing::warn!(
                target: LOG_TARGET,
                error = %error,
                "{message}"
            ),
            None => tracing::info!(target: LOG_TARGET, "{message}"),
        }
    }
}

/// Shared default sink.
#[must_use]
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingLogSink)
}

/// A message captured by [`MemoryLogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// The logged message.
    pub message: String,
    /// The error attached to the message, if any.
    pub error: Option<UnitError>,
}

/// Sink that keeps every record in memory.
///
/// Cloned sinks share the same buffer, so a host can hand one clone to a
/// composite and read records through another.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    /// Number of captured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every captured record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, message: &str, error: Option<&UnitError>) {
        self.lock().push(LogRecord {
            message: message.to_string(),
            error: error.cloned(),
        });
    }
}
