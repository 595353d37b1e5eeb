//! Status aggregator: reduces server status traffic to one current state.
//!
//! The latest report wins; there is no merging with earlier severities.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use lintel_types::{ConnectionState, Severity};

use crate::output::OutputChannel;

/// Fixed set of language ids the client lints. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LanguageSet(Arc<HashSet<String>>);

impl LanguageSet {
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Arc::new(languages.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn contains(&self, language_id: &str) -> bool {
        self.0.contains(language_id)
    }
}

/// Point-in-time view for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub severity: Severity,
    pub message: Option<String>,
    pub busy: bool,
    pub running: bool,
}

impl StatusSnapshot {
    /// Compact label like `lint`, `lint: warn`, or `lint (stopped)`.
    #[must_use]
    pub fn label(&self) -> String {
        let mut label = String::from("lint");
        if !self.running {
            label.push_str(" (stopped)");
            return label;
        }
        if self.severity != Severity::Ok {
            label.push_str(": ");
            label.push_str(self.severity.label());
        }
        if self.busy {
            label.push_str(" (busy)");
        }
        label
    }
}

pub struct StatusAggregator {
    severity: Severity,
    message: Option<String>,
    busy: bool,
    languages: LanguageSet,
    connection: watch::Receiver<ConnectionState>,
    output: OutputChannel,
}

impl StatusAggregator {
    #[must_use]
    pub fn new(
        languages: LanguageSet,
        connection: watch::Receiver<ConnectionState>,
        output: OutputChannel,
    ) -> Self {
        Self {
            severity: Severity::Ok,
            message: None,
            busy: false,
            languages,
            connection,
            output,
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.connection.borrow().is_running()
    }

    #[must_use]
    pub fn is_enabled_for(&self, language_id: &str) -> bool {
        self.languages.contains(language_id)
    }

    /// Overwrite the current severity. Message and cause, if any, go to the
    /// output channel tagged with the severity.
    pub fn set_status(
        &mut self,
        severity: Severity,
        message: Option<String>,
        cause: Option<&serde_json::Value>,
    ) {
        match (&message, cause) {
            (Some(msg), Some(cause)) => self.output.status(severity, &format!("{msg}\n{cause}")),
            (Some(msg), None) => self.output.status(severity, msg),
            (None, Some(cause)) => self.output.status(severity, &cause.to_string()),
            (None, None) => {}
        }
        self.severity = severity;
        self.message = message;
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            severity: self.severity,
            message: self.message.clone(),
            busy: self.busy,
            running: self.is_running(),
        }
    }
}
