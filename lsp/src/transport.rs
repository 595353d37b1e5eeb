//! Transport: owns the framed byte streams to one server instance.
//!
//! A reader task and a writer task run per connection. Responses are matched
//! to requests by id through the pending map; everything else becomes a
//! [`TransportEvent`] on the client's single event channel, tagged with the
//! connection generation so events from a replaced connection can be ignored.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;

use lintel_types::{ClientSettings, DocumentRef, FixResult, ServerCommand};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::RequestError;
use crate::fixes::{FixRequester, RequestFut};
use crate::protocol::{self, FixRequest, IncomingFrame, Notification, Request};
use crate::router::ServerNotification;

const REQUEST_TIMEOUT_SECS: u64 = 30;

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

/// The in-flight `initialize` request. The reader finishes the handshake
/// itself, so `Ready` is queued ahead of anything the server sends next.
struct Handshake {
    id: u64,
    trace: serde_json::Value,
    done: oneshot::Sender<Result<(), RequestError>>,
}

type HandshakeSlot = Arc<Mutex<Option<Handshake>>>;

pub(crate) enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Something the connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The initialize handshake completed.
    Ready,
    /// The initialize handshake failed; the connection is unusable.
    InitFailed(String),
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// A malformed frame. `count` is the running total for this connection.
    ProtocolError {
        error: String,
        message: Option<serde_json::Value>,
        count: u32,
    },
    /// The server's output stream ended.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Byte streams to a server, plus the process behind them if there is one.
pub struct ServerIo {
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
    pub process: Option<Child>,
}

/// Produces a fresh server connection on every (re)start.
pub trait ServerLauncher: Send {
    fn launch(&mut self, settings: &ClientSettings) -> Result<ServerIo>;
}

/// Launches the server as a child process speaking over stdio.
pub struct ProcessLauncher {
    command: ServerCommand,
    workspace_root: PathBuf,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(command: ServerCommand, workspace_root: PathBuf) -> Self {
        Self {
            command,
            workspace_root,
        }
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(&mut self, settings: &ClientSettings) -> Result<ServerIo> {
        let resolved = which::which(self.command.command())
            .with_context(|| format!("{} not found in PATH", self.command.command()))?;
        let mut cmd = Command::new(&resolved);
        cmd.args(self.command.args())
            .current_dir(&self.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = settings.node_path() {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.command.command()))?;

        let stdout = child.stdout.take().context("no stdout from lint server")?;
        let stdin = child.stdin.take().context("no stdin from lint server")?;
        if let Some(stderr) = child.stderr.take() {
            let name = self.command.command().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %name, "stderr: {line}");
                }
            });
        }

        Ok(ServerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}

/// Cloneable handle for sending requests and notifications on one connection.
#[derive(Clone)]
pub struct TransportHandle {
    generation: u64,
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    handshake: HandshakeSlot,
    /// Set by the reader when the server's output ends.
    closed: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl TransportHandle {
    /// Spawn the reader and writer tasks for one connection.
    pub fn connect<R, W>(
        reader: R,
        writer: W,
        generation: u64,
        events: mpsc::Sender<TransportMessage>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let handshake: HandshakeSlot = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(generation, "Lint server write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        tokio::spawn(read_loop(
            reader,
            generation,
            Arc::clone(&pending),
            Arc::clone(&handshake),
            Arc::clone(&closed),
            events,
            writer_tx.clone(),
        ));

        Self {
            generation,
            writer_tx,
            pending,
            handshake,
            closed,
            next_id: Arc::new(AtomicU64::new(1)),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send a request and return the raw response frame.
    async fn request_raw(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.closed.load(Ordering::Acquire) {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::ChannelClosed);
        }

        let frame = serde_json::to_value(Request::new(id, method, params)).map_err(|e| {
            RequestError::Decode {
                method,
                reason: e.to_string(),
            }
        })?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::ChannelClosed);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(RequestError::ChannelClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RequestError::TimedOut { method })
            }
        }
    }

    /// Send a request and decode its non-null `result`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<T, RequestError> {
        let response = self.request_raw(method, params).await?;
        check_error(&response)?;
        match response.get("result") {
            None | Some(serde_json::Value::Null) => Err(RequestError::EmptyResult { method }),
            Some(result) => {
                serde_json::from_value(result.clone()).map_err(|e| RequestError::Decode {
                    method,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        send_notification(&self.writer_tx, method, params).await
    }

    /// Send `initialize`. The reader answers a successful response with
    /// `initialized` and the trace level and reports `Ready`; this resolves
    /// once that has happened or the handshake failed.
    pub async fn initialize(
        &self,
        root_uri: &str,
        settings: &ClientSettings,
    ) -> Result<(), RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = protocol::initialize_params(root_uri, settings);
        let frame = serde_json::to_value(Request::new(id, protocol::INITIALIZE, Some(params)))
            .map_err(|e| RequestError::Decode {
                method: protocol::INITIALIZE,
                reason: e.to_string(),
            })?;

        let (done, mut finished) = oneshot::channel();
        *self.handshake.lock().await = Some(Handshake {
            id,
            trace: protocol::set_trace_params(settings.trace()),
            done,
        });
        if self.closed.load(Ordering::Acquire)
            || self
                .writer_tx
                .send(WriterCommand::Send(frame))
                .await
                .is_err()
        {
            self.handshake.lock().await.take();
            return Err(RequestError::ChannelClosed);
        }

        match timeout(self.request_timeout, &mut finished).await {
            Ok(outcome) => outcome.unwrap_or(Err(RequestError::ChannelClosed)),
            Err(_) => {
                if self.handshake.lock().await.take().is_some() {
                    return Err(RequestError::TimedOut {
                        method: protocol::INITIALIZE,
                    });
                }
                // The reader picked up the response as the timer fired.
                finished.await.unwrap_or(Err(RequestError::ChannelClosed))
            }
        }
    }

    pub async fn did_open(
        &self,
        doc: &DocumentRef,
        language_id: &str,
        text: &str,
    ) -> Result<(), RequestError> {
        let params = protocol::did_open_params(doc, language_id, text);
        self.notify(protocol::DID_OPEN, Some(params)).await
    }

    pub async fn did_change(&self, doc: &DocumentRef, text: &str) -> Result<(), RequestError> {
        let params = protocol::did_change_params(doc, text);
        self.notify(protocol::DID_CHANGE, Some(params)).await
    }

    pub async fn did_save(&self, uri: &str) -> Result<(), RequestError> {
        self.notify(protocol::DID_SAVE, Some(protocol::text_document_params(uri)))
            .await
    }

    pub async fn did_close(&self, uri: &str) -> Result<(), RequestError> {
        self.notify(protocol::DID_CLOSE, Some(protocol::text_document_params(uri)))
            .await
    }

    /// Push changed settings (and the trace level) to the server.
    pub async fn push_settings(&self, settings: &ClientSettings) -> Result<(), RequestError> {
        self.notify(
            protocol::DID_CHANGE_CONFIGURATION,
            Some(protocol::did_change_configuration_params(settings)),
        )
        .await?;
        self.notify(
            protocol::SET_TRACE,
            Some(protocol::set_trace_params(settings.trace())),
        )
        .await
    }

    async fn all_fixes(self, request: FixRequest) -> Result<FixResult, RequestError> {
        let params = serde_json::to_value(&request).map_err(|e| RequestError::Decode {
            method: protocol::ALL_FIXES,
            reason: e.to_string(),
        })?;
        self.request(protocol::ALL_FIXES, Some(params)).await
    }

    /// Graceful shutdown: `shutdown` request, `exit`, then kill if needed.
    pub async fn shutdown(self, process: Option<Child>) {
        let grace = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        let acknowledged = timeout(grace, self.request_raw(protocol::SHUTDOWN, None)).await;
        if let Ok(Ok(response)) = acknowledged
            && response.get("error").is_none()
        {
            let _ = self.notify(protocol::EXIT, None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        let Some(mut child) = process else { return };
        let waited = timeout(grace, child.wait()).await;
        if waited.is_err() {
            tracing::debug!("Lint server didn't exit in time, killing");
            let _ = child.kill().await;
        }
    }
}

impl FixRequester for TransportHandle {
    fn compute_all_fixes(&self, request: FixRequest) -> RequestFut<'_, FixResult> {
        Box::pin(self.clone().all_fixes(request))
    }
}

async fn send_notification(
    writer_tx: &mpsc::Sender<WriterCommand>,
    method: &'static str,
    params: Option<serde_json::Value>,
) -> Result<(), RequestError> {
    let frame = serde_json::to_value(Notification::new(method, params)).map_err(|e| {
        RequestError::Decode {
            method,
            reason: e.to_string(),
        }
    })?;
    writer_tx
        .send(WriterCommand::Send(frame))
        .await
        .map_err(|_| RequestError::ChannelClosed)
}

fn check_error(response: &serde_json::Value) -> Result<(), RequestError> {
    match response.get("error") {
        Some(error) => Err(RequestError::Server {
            code: error["code"].as_i64().unwrap_or_default(),
            message: error["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        }),
        None => Ok(()),
    }
}

/// What the reader did with one frame.
enum Dispatched {
    Handled,
    Initialize {
        handshake: Handshake,
        response: serde_json::Value,
    },
    Notify {
        method: String,
        params: Option<serde_json::Value>,
    },
    Malformed,
}

async fn dispatch_frame(
    frame: &serde_json::Value,
    pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
    handshake: &Mutex<Option<Handshake>>,
    writer_tx: &mpsc::Sender<WriterCommand>,
) -> Dispatched {
    let Some(incoming) = IncomingFrame::parse(frame) else {
        return Dispatched::Malformed;
    };

    match incoming {
        IncomingFrame::Response { id, body } => {
            if let Some(handshake) = handshake.lock().await.take_if(|h| h.id == id) {
                return Dispatched::Initialize {
                    handshake,
                    response: body,
                };
            }
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(body);
            } else {
                tracing::trace!(id, "Response for unknown request id");
            }
            Dispatched::Handled
        }
        IncomingFrame::ServerRequest { id, method, params } => {
            // Some servers send status kinds as requests and block on the reply.
            if ServerNotification::is_known(&method) {
                let reply = protocol::response(&id, serde_json::Value::Null);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
                return Dispatched::Notify { method, params };
            }
            tracing::debug!(method, "Lint server sent unsupported request");
            let reply = protocol::error_response(
                &id,
                protocol::METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            );
            let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            Dispatched::Handled
        }
        IncomingFrame::Notification { method, params } => Dispatched::Notify { method, params },
    }
}

/// Answer a successful `initialize` response with `initialized` and the trace level.
async fn finish_handshake(
    trace: serde_json::Value,
    response: &serde_json::Value,
    writer_tx: &mpsc::Sender<WriterCommand>,
) -> Result<(), RequestError> {
    check_error(response)?;
    send_notification(writer_tx, protocol::INITIALIZED, Some(serde_json::json!({}))).await?;
    if let Err(e) = send_notification(writer_tx, protocol::SET_TRACE, Some(trace)).await {
        tracing::debug!("Could not send trace level: {e}");
    }
    Ok(())
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: R,
    generation: u64,
    pending: PendingMap,
    handshake: HandshakeSlot,
    closed: Arc<AtomicBool>,
    events: mpsc::Sender<TransportMessage>,
    writer_tx: mpsc::Sender<WriterCommand>,
) {
    let emit = |event| {
        events.send(TransportMessage { generation, event })
    };
    let mut frames = FrameReader::new(reader);
    let mut errors = 0u32;

    loop {
        match frames.read_frame().await {
            Ok(Some(frame)) => match dispatch_frame(&frame, &pending, &handshake, &writer_tx)
                .await
            {
                Dispatched::Handled => {}
                Dispatched::Initialize {
                    handshake,
                    response,
                } => {
                    let outcome = finish_handshake(handshake.trace, &response, &writer_tx).await;
                    if outcome.is_ok() {
                        let _ = emit(TransportEvent::Ready).await;
                    }
                    let _ = handshake.done.send(outcome);
                }
                Dispatched::Notify { method, params } => {
                    let _ = emit(TransportEvent::Notification { method, params }).await;
                }
                Dispatched::Malformed => {
                    errors += 1;
                    let _ = emit(TransportEvent::ProtocolError {
                        error: "frame is not a JSON-RPC message".to_string(),
                        message: Some(frame),
                        count: errors,
                    })
                    .await;
                }
            },
            Ok(None) => {
                tracing::info!(generation, "Lint server closed its output");
                break;
            }
            Err(e) => {
                errors += 1;
                let fatal = !e.is_recoverable();
                let _ = emit(TransportEvent::ProtocolError {
                    error: e.to_string(),
                    message: None,
                    count: errors,
                })
                .await;
                if fatal {
                    break;
                }
            }
        }
    }

    // Dropping the senders fails every outstanding request with ChannelClosed;
    // the flag fails the ones issued from here on.
    closed.store(true, Ordering::Release);
    pending.lock().await.clear();
    handshake.lock().await.take();
    let _ = emit(TransportEvent::Closed).await;
}

/// Handshake task: reports `InitFailed` on the event channel. Success is
/// reported by the reader as `Ready`.
pub(crate) async fn run_initialize(
    handle: TransportHandle,
    root_uri: String,
    settings: ClientSettings,
    events: mpsc::Sender<TransportMessage>,
) {
    if let Err(e) = handle.initialize(&root_uri, &settings).await {
        let _ = events
            .send(TransportMessage {
                generation: handle.generation(),
                event: TransportEvent::InitFailed(e.to_string()),
            })
            .await;
    }
}

/// The current connection, shared with components that outlive any one of them.
#[derive(Debug, Clone, Default)]
pub struct SharedTransport(Arc<RwLock<Option<TransportHandle>>>);

impl SharedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Result<TransportHandle, RequestError> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RequestError::NotConnected)
    }

    pub(crate) fn replace(&self, handle: TransportHandle) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl FixRequester for SharedTransport {
    fn compute_all_fixes(&self, request: FixRequest) -> RequestFut<'_, FixResult> {
        let current = self.current();
        Box::pin(async move { current?.all_fixes(request).await })
    }
}
