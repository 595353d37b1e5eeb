//! Connection lifecycle: the one owner of [`ConnectionState`].
//!
//! ```text
//! Stopped --begin_start--> Starting --mark_ready--> Running
//!    ^                        |                        |
//!    +------ mark_stopped / handle_closed -------------+
//! ```
//!
//! The restart decision on closure lives here too. A server that announced a
//! deliberate exit is never restarted; anything else is handed to the
//! [`ErrorHandler`], which bounds retries.

use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};

use lintel_types::ConnectionState;

use crate::error::StartError;

/// Errors tolerated before the default handler gives up on a connection.
const MAX_PROTOCOL_ERRORS: u32 = 3;

/// Restarts allowed inside [`RESTART_WINDOW`] before the default handler stops restarting.
const MAX_RESTARTS: usize = 4;

const RESTART_WINDOW: Duration = Duration::from_secs(3 * 60);

/// What to do after a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Shutdown,
}

/// What to do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    Restart,
    DoNotRestart,
}

/// Restart/give-up policy for a connection.
pub trait ErrorHandler: Send {
    /// `count` is the number of protocol errors seen on this connection so far.
    fn error(&mut self, error: &str, message: Option<&serde_json::Value>, count: u32)
    -> ErrorAction;

    fn closed(&mut self) -> CloseAction;
}

/// Bounded-retry policy: tolerate a few protocol errors, and restart a closed
/// server unless it keeps dying.
#[derive(Debug, Default)]
pub struct DefaultErrorHandler {
    restarts: Vec<Instant>,
}

impl DefaultErrorHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn closed_at(&mut self, now: Instant) -> CloseAction {
        self.restarts.push(now);
        if self.restarts.len() <= MAX_RESTARTS {
            return CloseAction::Restart;
        }
        let oldest = self.restarts.remove(0);
        if now.duration_since(oldest) <= RESTART_WINDOW {
            tracing::warn!(
                restarts = MAX_RESTARTS,
                window_secs = RESTART_WINDOW.as_secs(),
                "Lint server crashed too often; not restarting"
            );
            CloseAction::DoNotRestart
        } else {
            CloseAction::Restart
        }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn error(
        &mut self,
        _error: &str,
        _message: Option<&serde_json::Value>,
        count: u32,
    ) -> ErrorAction {
        if count <= MAX_PROTOCOL_ERRORS {
            ErrorAction::Continue
        } else {
            ErrorAction::Shutdown
        }
    }

    fn closed(&mut self) -> CloseAction {
        self.closed_at(Instant::now())
    }
}

/// Resolves once the connection reaches `Running`, or fails if it stops first.
///
/// `wait` consumes the handle, so readiness is awaited at most once.
#[derive(Debug)]
pub struct ReadyHandle {
    rx: oneshot::Receiver<Result<(), StartError>>,
}

impl ReadyHandle {
    pub async fn wait(self) -> Result<(), StartError> {
        self.rx.await.unwrap_or(Err(StartError::Abandoned))
    }
}

type StateObserver = Box<dyn FnMut(ConnectionState, ConnectionState) + Send>;

pub struct ConnectionManager {
    state_tx: watch::Sender<ConnectionState>,
    observers: Vec<StateObserver>,
    ready_tx: Option<oneshot::Sender<Result<(), StartError>>>,
    /// Set when the server announces a deliberate exit; never cleared.
    server_called_exit: bool,
    error_handler: Box<dyn ErrorHandler>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(error_handler: Box<dyn ErrorHandler>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Stopped);
        Self {
            state_tx,
            observers: Vec::new(),
            ready_tx: None,
            server_called_exit: false,
            error_handler,
        }
    }

    /// Replace the restart policy. Counters of the old policy are discarded.
    pub fn set_error_handler(&mut self, error_handler: Box<dyn ErrorHandler>) {
        self.error_handler = error_handler;
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Read-only view of the state for other components.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Register `handler(old, new)` for every transition.
    pub fn on_state_change(
        &mut self,
        handler: impl FnMut(ConnectionState, ConnectionState) + Send + 'static,
    ) {
        self.observers.push(Box::new(handler));
    }

    #[must_use]
    pub fn server_called_exit(&self) -> bool {
        self.server_called_exit
    }

    pub fn mark_deliberate_exit(&mut self) {
        if !self.server_called_exit {
            tracing::info!("Lint server announced a deliberate exit");
        }
        self.server_called_exit = true;
    }

    /// `Stopped -> Starting`.
    pub fn begin_start(&mut self) -> Result<ReadyHandle, StartError> {
        match self.state() {
            ConnectionState::Stopped => {}
            ConnectionState::Starting => return Err(StartError::AlreadyStarted("starting")),
            ConnectionState::Running => return Err(StartError::AlreadyStarted("running")),
        }
        let (tx, rx) = oneshot::channel();
        self.ready_tx = Some(tx);
        self.transition(ConnectionState::Starting);
        Ok(ReadyHandle { rx })
    }

    /// `Starting -> Running`. Ignored in any other state.
    pub fn mark_ready(&mut self) {
        if self.state() != ConnectionState::Starting {
            tracing::debug!(state = ?self.state(), "Ignoring ready signal");
            return;
        }
        self.transition(ConnectionState::Running);
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Any state -> `Stopped`. A pending [`ReadyHandle`] fails with `reason`.
    pub fn mark_stopped(&mut self, reason: &str) {
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(Err(StartError::Stopped(reason.to_string())));
        }
        self.transition(ConnectionState::Stopped);
    }

    /// The transport closed. Stops, then decides whether to restart.
    pub fn handle_closed(&mut self) -> CloseAction {
        self.mark_stopped("connection closed");
        if self.server_called_exit {
            tracing::info!("Not restarting: lint server exited deliberately");
            return CloseAction::DoNotRestart;
        }
        self.error_handler.closed()
    }

    /// A protocol error occurred; the handler decides whether to keep going.
    pub fn handle_error(
        &mut self,
        error: &str,
        message: Option<&serde_json::Value>,
        count: u32,
    ) -> ErrorAction {
        let action = self.error_handler.error(error, message, count);
        tracing::warn!(error, count, ?action, "Lint server protocol error");
        action
    }

    fn transition(&mut self, new: ConnectionState) {
        let old = self.state_tx.send_replace(new);
        if old == new {
            return;
        }
        tracing::debug!(?old, ?new, "Connection state changed");
        for observer in &mut self.observers {
            observer(old, new);
        }
    }
}
