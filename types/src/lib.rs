//! Core domain types for lintel.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the client.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod edit;
mod settings;

pub use edit::{EditError, FixResult, Position, Range, TextEdit, apply_edits};
pub use settings::{
    ClientSettings, DEFAULT_LANGUAGES, RunTrigger, ServerCommand, SettingsError, TraceLevel,
};

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Severity
// ============================================================================

/// Health of the linting service as reported by the server.
///
/// Ordered so that `Ok < Warn < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    Ok,
    Warn,
    /// Also the fallback for any value the server sends that we do not know.
    #[default]
    Error,
}

impl Severity {
    /// Convert from the numeric wire value (1=ok, 2=warn, 3=error).
    ///
    /// Unknown values map to [`Severity::Error`] so that a confused server is
    /// always visible to the user.
    #[must_use]
    pub fn from_wire(value: u64) -> Self {
        match value {
            1 => Self::Ok,
            2 => Self::Warn,
            _ => Self::Error,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Lifecycle state of the connection to the linting server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl ConnectionState {
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

// ============================================================================
// Status events
// ============================================================================

/// A status report pushed by the server. Consumed immediately, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub severity: Severity,
    pub message: Option<String>,
    pub cause: Option<serde_json::Value>,
}

// ============================================================================
// Documents
// ============================================================================

/// A document identity plus the version its owner assigned at some instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub uri: String,
    pub version: i32,
}

impl DocumentRef {
    #[must_use]
    pub fn new(uri: impl Into<String>, version: i32) -> Self {
        Self {
            uri: uri.into(),
            version,
        }
    }

    /// Last path segment of the URI, for user-facing messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        display_name(&self.uri)
    }
}

/// Last path segment of a document URI (`file:///x/a.md` -> `a.md`).
#[must_use]
pub fn display_name(uri: &str) -> &str {
    uri.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(uri)
}

/// Why the editor is saving a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveReason {
    /// Explicit user save.
    Manual,
    /// Autosave timer.
    AfterDelay,
    /// Autosave on focus change.
    FocusOut,
}

impl SaveReason {
    /// Autosave-on-timer saves never trigger fixing; fixing would dirty the
    /// document and re-arm the timer.
    #[must_use]
    pub fn triggers_auto_fix(self) -> bool {
        self != Self::AfterDelay
    }
}
