//! Output channel: the client's logging sink.
//!
//! Every line is mirrored to `tracing` under the `lintel::server` target and
//! kept in a bounded buffer so a host can show recent server output on demand.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lintel_types::Severity;

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct OutputChannel {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl OutputChannel {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    /// Record a line at info level.
    pub fn info(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "lintel::server", "{line}");
        self.push(line);
    }

    /// Record a line at error level.
    pub fn error(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::error!(target: "lintel::server", "{line}");
        self.push(line);
    }

    /// Record a line tagged with a server-reported severity.
    pub fn status(&self, severity: Severity, line: &str) {
        let line = format!("[{severity}] {line}");
        match severity {
            Severity::Ok => tracing::info!(target: "lintel::server", "{line}"),
            Severity::Warn => tracing::warn!(target: "lintel::server", "{line}"),
            Severity::Error => tracing::error!(target: "lintel::server", "{line}"),
        }
        self.push(line);
    }

    /// Record a server trace verbatim.
    pub fn trace(&self, message: &str, verbose: Option<&str>) {
        let line = match verbose {
            Some(detail) => format!("{message}\n{detail}"),
            None => message.to_string(),
        };
        tracing::debug!(target: "lintel::server", "{line}");
        self.push(line);
    }

    /// Buffered lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn push(&self, line: String) {
        let mut lines = self.lock();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
