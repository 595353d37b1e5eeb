//! LintClient facade: the one type a host talks to.
//!
//! The client owns the lifecycle, router, status, and auto-fix policy, and is
//! the single consumer of the transport event channel. Hosts drive it with
//! [`LintClient::poll_events`] from a UI tick, or [`LintClient::next_event`]
//! from an async loop; either way handlers run one at a time in arrival order.
//!
//! Every connection gets a fresh generation number. Events still in flight
//! from a connection that has been replaced are dropped on arrival.

use std::collections::HashSet;
use std::path::{self, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use lintel_types::{ClientSettings, ConnectionState, DocumentRef};

use crate::autofix::{AutoFixOnSave, SaveFixHook};
use crate::commands::CommandRunner;
use crate::error::{RequestError, StartError};
use crate::fixes::{FixCompletion, FixWorkflow};
use crate::host::{DocumentSurface, SaveInterceptor};
use crate::lifecycle::{
    CloseAction, ConnectionManager, DefaultErrorHandler, ErrorAction, ErrorHandler, ReadyHandle,
};
use crate::output::OutputChannel;
use crate::protocol::{self, PathToUriError};
use crate::router::{NotificationRouter, RouteTargets};
use crate::status::{LanguageSet, StatusAggregator, StatusSnapshot};
use crate::transport::{
    self, ServerLauncher, SharedTransport, TransportEvent, TransportHandle, TransportMessage,
};

/// Channel capacity for the event channel between transport tasks and the client.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Editor services the client consumes.
#[derive(Clone)]
pub struct Host {
    pub documents: Arc<dyn DocumentSurface>,
    pub saves: Arc<dyn SaveInterceptor>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Start(#[from] StartError),
    #[error("failed to launch lint server: {0:#}")]
    Launch(anyhow::Error),
    #[error(transparent)]
    WorkspaceUri(#[from] PathToUriError),
}

/// The live connection. Dropping it kills the server process.
struct Connection {
    generation: u64,
    process: Option<Child>,
}

pub struct LintClient {
    settings: ClientSettings,
    workspace_root: PathBuf,
    lifecycle: ConnectionManager,
    router: NotificationRouter,
    status: StatusAggregator,
    output: OutputChannel,
    workflow: Arc<FixWorkflow>,
    auto_fix: AutoFixOnSave,
    host: Host,
    launcher: Box<dyn ServerLauncher>,
    transport: SharedTransport,
    connection: Option<Connection>,
    generation: u64,
    open_documents: HashSet<String>,
    event_rx: mpsc::Receiver<TransportMessage>,
    event_tx: mpsc::Sender<TransportMessage>,
}

impl LintClient {
    /// Build a stopped client. Auto-fix-on-save is registered right away if
    /// the settings ask for it; the language set is fixed from here on.
    pub fn new(
        settings: ClientSettings,
        workspace_root: PathBuf,
        launcher: Box<dyn ServerLauncher>,
        host: Host,
    ) -> Self {
        let output = OutputChannel::default();
        let lifecycle = ConnectionManager::new(Box::new(DefaultErrorHandler::new()));
        let languages = LanguageSet::new(settings.languages().iter().cloned());
        let status =
            StatusAggregator::new(languages.clone(), lifecycle.subscribe(), output.clone());
        let workflow = Arc::new(FixWorkflow::new(output.clone()));
        let transport = SharedTransport::new();

        let hook = SaveFixHook::new(
            Arc::clone(&workflow),
            Arc::new(transport.clone()),
            Arc::clone(&host.documents),
            languages,
        );
        let mut auto_fix = AutoFixOnSave::new(hook);
        auto_fix.configure(settings.auto_fix_on_save(), host.saves.as_ref());

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            settings,
            workspace_root,
            lifecycle,
            router: NotificationRouter::new(),
            status,
            output,
            workflow,
            auto_fix,
            host,
            launcher,
            transport,
            connection: None,
            generation: 0,
            open_documents: HashSet::new(),
            event_rx,
            event_tx,
        }
    }

    /// Swap the restart policy (defaults to [`DefaultErrorHandler`]).
    #[must_use]
    pub fn with_error_handler(mut self, handler: Box<dyn ErrorHandler>) -> Self {
        self.lifecycle.set_error_handler(handler);
        self
    }

    /// Launch the server. The returned handle resolves once the handshake
    /// completes, which requires events to be drained meanwhile; see
    /// [`LintClient::start_and_wait`].
    pub fn start(&mut self) -> Result<ReadyHandle, ClientError> {
        let ready = self.lifecycle.begin_start()?;
        if let Err(e) = self.connect() {
            self.output.error(format!("Failed to start lint server: {e}"));
            self.lifecycle.mark_stopped(&e.to_string());
            return Err(e);
        }
        Ok(ready)
    }

    /// Launch the server and drain events until it is ready (or stops).
    pub async fn start_and_wait(&mut self) -> Result<(), ClientError> {
        let ready = self.start()?;
        let mut ready = pin!(ready.wait());
        loop {
            tokio::select! {
                result = &mut ready => return result.map_err(ClientError::from),
                Some(message) = self.event_rx.recv() => self.handle_message(message),
            }
        }
    }

    fn connect(&mut self) -> Result<(), ClientError> {
        let root = path::absolute(&self.workspace_root)
            .unwrap_or_else(|_| self.workspace_root.clone());
        let root_uri = protocol::path_to_file_uri(&root)?.to_string();
        let io = self
            .launcher
            .launch(&self.settings)
            .map_err(ClientError::Launch)?;

        self.generation += 1;
        let handle =
            TransportHandle::connect(io.reader, io.writer, self.generation, self.event_tx.clone());
        self.transport.replace(handle.clone());
        self.connection = Some(Connection {
            generation: self.generation,
            process: io.process,
        });
        self.open_documents.clear();
        tracing::info!(generation = self.generation, "Lint server launched");

        tokio::spawn(transport::run_initialize(
            handle,
            root_uri,
            self.settings.clone(),
            self.event_tx.clone(),
        ));
        Ok(())
    }

    /// Drain pending events, up to `budget`. Never blocks.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.event_rx.try_recv() {
                Ok(message) => {
                    self.handle_message(message);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        count
    }

    /// Wait for the next event and handle it.
    pub async fn next_event(&mut self) {
        if let Some(message) = self.event_rx.recv().await {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: TransportMessage) {
        let live = self.connection.as_ref().map(|c| c.generation);
        if live != Some(message.generation) {
            tracing::trace!(
                generation = message.generation,
                ?live,
                "Dropping event from a previous connection"
            );
            return;
        }

        match message.event {
            TransportEvent::Ready => {
                self.lifecycle.mark_ready();
                self.router.subscribe();
                self.output.info("Lint server is ready");
            }
            TransportEvent::InitFailed(reason) => {
                self.output
                    .error(format!("Lint server failed to initialize: {reason}"));
                self.disconnect();
                self.lifecycle.mark_stopped(&reason);
            }
            TransportEvent::Notification { method, params } => {
                let mut targets = RouteTargets {
                    status: &mut self.status,
                    lifecycle: &mut self.lifecycle,
                    output: &self.output,
                };
                self.router.route(&method, params, &mut targets);
            }
            TransportEvent::ProtocolError {
                error,
                message: frame,
                count,
            } => {
                if self.lifecycle.handle_error(&error, frame.as_ref(), count)
                    == ErrorAction::Shutdown
                {
                    self.output.error(format!(
                        "Shutting down lint server after {count} protocol errors"
                    ));
                    self.disconnect();
                    self.lifecycle.mark_stopped("too many protocol errors");
                }
            }
            TransportEvent::Closed => {
                self.router.unsubscribe();
                self.reap();
                match self.lifecycle.handle_closed() {
                    CloseAction::Restart => {
                        self.output.info("Lint server connection closed; restarting");
                        self.restart();
                    }
                    CloseAction::DoNotRestart => {
                        self.output.info("Lint server stopped");
                    }
                }
            }
        }
    }

    fn restart(&mut self) {
        if let Err(e) = self.lifecycle.begin_start() {
            tracing::warn!("Cannot restart lint server: {e}");
            return;
        }
        if let Err(e) = self.connect() {
            self.output.error(format!("Failed to restart lint server: {e}"));
            self.lifecycle.mark_stopped(&e.to_string());
        }
    }

    /// Tear down a connection that is still up, in the background.
    fn disconnect(&mut self) {
        self.router.unsubscribe();
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Ok(handle) = self.transport.current() {
            tokio::spawn(handle.shutdown(connection.process));
        }
        self.transport.clear();
    }

    /// Forget a connection whose server already went away.
    fn reap(&mut self) {
        self.transport.clear();
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Some(mut child) = connection.process {
            let _ = child.start_kill();
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
    }

    /// Graceful stop requested by the host. No restart follows.
    pub async fn stop(&mut self) {
        self.router.unsubscribe();
        if let Some(connection) = self.connection.take() {
            if let Ok(handle) = self.transport.current() {
                handle.shutdown(connection.process).await;
            }
            self.transport.clear();
        }
        self.lifecycle.mark_stopped("stopped by client");
    }

    /// Apply changed settings: auto-fix registration, then a push to the server.
    pub async fn configuration_changed(&mut self, settings: ClientSettings) {
        self.auto_fix
            .configure(settings.auto_fix_on_save(), self.host.saves.as_ref());
        self.settings = settings;

        if !self.lifecycle.state().is_running() {
            return;
        }
        if let Ok(handle) = self.transport.current()
            && let Err(e) = handle.push_settings(&self.settings).await
        {
            tracing::warn!("Failed to push settings to lint server: {e}");
        }
    }

    /// Start syncing a document. Languages outside the set are ignored.
    pub async fn document_opened(
        &mut self,
        doc: &DocumentRef,
        language_id: &str,
        text: &str,
    ) -> Result<(), RequestError> {
        if !self.status.is_enabled_for(language_id) {
            return Ok(());
        }
        self.transport
            .current()?
            .did_open(doc, language_id, text)
            .await?;
        self.open_documents.insert(doc.uri.clone());
        Ok(())
    }

    pub async fn document_changed(
        &self,
        doc: &DocumentRef,
        text: &str,
    ) -> Result<(), RequestError> {
        if !self.open_documents.contains(&doc.uri) {
            return Ok(());
        }
        self.transport.current()?.did_change(doc, text).await
    }

    pub async fn document_saved(&self, uri: &str) -> Result<(), RequestError> {
        if !self.open_documents.contains(uri) {
            return Ok(());
        }
        self.transport.current()?.did_save(uri).await
    }

    pub async fn document_closed(&mut self, uri: &str) -> Result<(), RequestError> {
        if !self.open_documents.remove(uri) {
            return Ok(());
        }
        self.transport.current()?.did_close(uri).await
    }

    /// Cloneable command runner; commands can run alongside [`Self::next_event`].
    #[must_use]
    pub fn commands(&self) -> CommandRunner {
        CommandRunner::new(
            Arc::clone(&self.workflow),
            Arc::new(self.transport.clone()),
            Arc::clone(&self.host.documents),
            self.output.clone(),
            self.workspace_root.clone(),
        )
    }

    pub fn on_state_change(
        &mut self,
        handler: impl FnMut(ConnectionState, ConnectionState) + Send + 'static,
    ) {
        self.lifecycle.on_state_change(handler);
    }

    pub fn on_fix_complete(
        &self,
        observer: impl Fn(&FixCompletion) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.workflow.on_complete(observer);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn server_called_exit(&self) -> bool {
        self.lifecycle.server_called_exit()
    }

    #[must_use]
    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    #[must_use]
    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    #[must_use]
    pub fn auto_fix_enabled(&self) -> bool {
        self.auto_fix.is_enabled()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
