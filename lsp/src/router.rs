//! Notification router: one typed message per server notification kind and a
//! single dispatch table.
//!
//! Unknown methods parse to `None` and are dropped; a newer server must not be
//! able to crash an older client.

use lintel_types::{Severity, StatusEvent};

use crate::lifecycle::ConnectionManager;
use crate::output::OutputChannel;
use crate::protocol::{LogTraceParams, StatusParams};
use crate::status::StatusAggregator;

pub(crate) const STATUS: &str = "lint/status";
pub(crate) const NO_CONFIG: &str = "lint/noConfig";
pub(crate) const NO_LIBRARY: &str = "lint/noLibrary";
pub(crate) const START_PROGRESS: &str = "lint/startProgress";
pub(crate) const STOP_PROGRESS: &str = "lint/stopProgress";
pub(crate) const EXIT: &str = "lint/exit";
pub(crate) const LOG_TRACE: &str = "$/logTrace";

const NO_CONFIG_MESSAGE: &str = "No lint configuration found for this workspace. \
     Run the 'Create lint configuration' command to add one.";

const NO_LIBRARY_MESSAGE: &str = "Failed to load the lint library. \
     Install it in the workspace or globally, or point `node_path` at it.";

/// Server-to-client notifications the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    Status(StatusEvent),
    NoConfig,
    NoLibrary,
    StartProgress,
    StopProgress,
    Exit,
    Trace {
        message: String,
        verbose: Option<String>,
    },
}

impl ServerNotification {
    /// Whether `method` names a notification this client routes.
    #[must_use]
    pub fn is_known(method: &str) -> bool {
        matches!(
            method,
            STATUS | NO_CONFIG | NO_LIBRARY | START_PROGRESS | STOP_PROGRESS | EXIT | LOG_TRACE
        )
    }

    /// Parse a wire notification. `None` for unknown methods or unreadable trace params;
    /// a status whose state cannot be read is an error status.
    #[must_use]
    pub fn parse(method: &str, params: Option<serde_json::Value>) -> Option<Self> {
        let notification = match method {
            STATUS => {
                let p: StatusParams = parse_params(method, params).unwrap_or_default();
                let severity = p
                    .state
                    .as_ref()
                    .and_then(serde_json::Value::as_u64)
                    .map_or(Severity::Error, Severity::from_wire);
                Self::Status(StatusEvent {
                    severity,
                    message: p.message,
                    cause: p.cause,
                })
            }
            NO_CONFIG => Self::NoConfig,
            NO_LIBRARY => Self::NoLibrary,
            START_PROGRESS => Self::StartProgress,
            STOP_PROGRESS => Self::StopProgress,
            EXIT => Self::Exit,
            LOG_TRACE => {
                let p: LogTraceParams = parse_params(method, params)?;
                Self::Trace {
                    message: p.message,
                    verbose: p.verbose,
                }
            }
            _ => {
                tracing::trace!(method, "Ignoring unknown server notification");
                return None;
            }
        };
        Some(notification)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Option<T> {
    let params = params.unwrap_or(serde_json::Value::Null);
    match serde_json::from_value(params) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::debug!(method, error = %e, "Dropping notification with unparsable params");
            None
        }
    }
}

/// Everything a notification can touch.
pub struct RouteTargets<'a> {
    pub status: &'a mut StatusAggregator,
    pub lifecycle: &'a mut ConnectionManager,
    pub output: &'a OutputChannel,
}

/// Dispatches notifications while subscribed (i.e. while the connection runs).
#[derive(Debug, Default)]
pub struct NotificationRouter {
    subscribed: bool,
}

impl NotificationRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) {
        self.subscribed = true;
    }

    pub fn unsubscribe(&mut self) {
        self.subscribed = false;
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Parse and dispatch one wire notification. Returns whether it was dispatched.
    pub fn route(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        targets: &mut RouteTargets<'_>,
    ) -> bool {
        if !self.subscribed {
            tracing::debug!(method, "Dropping notification: router not subscribed");
            return false;
        }
        match ServerNotification::parse(method, params) {
            Some(notification) => {
                dispatch(notification, targets);
                true
            }
            None => false,
        }
    }
}

/// The dispatch table.
pub fn dispatch(notification: ServerNotification, targets: &mut RouteTargets<'_>) {
    match notification {
        ServerNotification::Status(event) => {
            targets
                .status
                .set_status(event.severity, event.message, event.cause.as_ref());
        }
        ServerNotification::NoConfig => {
            targets
                .status
                .set_status(Severity::Warn, Some(NO_CONFIG_MESSAGE.to_string()), None);
        }
        ServerNotification::NoLibrary => {
            targets
                .status
                .set_status(Severity::Error, Some(NO_LIBRARY_MESSAGE.to_string()), None);
        }
        ServerNotification::StartProgress => targets.status.set_busy(true),
        ServerNotification::StopProgress => targets.status.set_busy(false),
        ServerNotification::Exit => targets.lifecycle.mark_deliberate_exit(),
        ServerNotification::Trace { message, verbose } => {
            targets.output.trace(&message, verbose.as_deref());
        }
    }
}
