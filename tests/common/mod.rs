//! Shared test utilities and fixtures
//!
//! A scripted lint server speaking framed JSON-RPC over in-memory pipes, plus
//! in-memory stand-ins for the editor's documents and save pipeline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, duplex};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use lintel_lsp::codec::{FrameReader, FrameWriter};
use lintel_lsp::{
    Disposable, DocumentSurface, EditFut, Host, LintClient, SaveInterceptor, SaveTarget,
    ServerIo, ServerLauncher, WillSaveHook,
};
use lintel_types::{ClientSettings, Position, Range, SaveReason, TextEdit, apply_edits};

const PIPE_CAPACITY: usize = 64 * 1024;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn edit(line: u32, start: u32, end: u32, text: &str) -> TextEdit {
    TextEdit::new(
        Range::new(Position::new(line, start), Position::new(line, end)),
        text,
    )
}

pub fn settings(languages: &[&str]) -> ClientSettings {
    serde_json::from_value(json!({ "languages": languages })).unwrap()
}

/// What the scripted server answers and what it has seen.
#[derive(Default)]
pub struct Script {
    /// `textDocument/lint/allFixes` reply: `(documentVersion, edits)`, or null.
    fix_reply: Mutex<Option<(i32, Vec<TextEdit>)>>,
    /// When set, fix requests get this error instead.
    fix_error: Mutex<Option<(i64, String)>>,
    /// Notifications sent as soon as `initialized` arrives.
    after_initialized: Mutex<Vec<(String, Value)>>,
    received: Mutex<Vec<Value>>,
}

impl Script {
    pub fn reply_with(&self, version: i32, edits: Vec<TextEdit>) {
        *self.fix_reply.lock().unwrap() = Some((version, edits));
    }

    pub fn fail_with(&self, code: i64, message: &str) {
        *self.fix_error.lock().unwrap() = Some((code, message.to_string()));
    }

    pub fn notify_after_initialized(&self, method: &str, params: Value) {
        self.after_initialized
            .lock()
            .unwrap()
            .push((method.to_string(), params));
    }

    /// Methods received so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| frame["method"].as_str().map(String::from))
            .collect()
    }

    /// Params of every frame received with `method`.
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame["method"] == method)
            .map(|frame| frame["params"].clone())
            .collect()
    }

    fn answer(&self, method: &str) -> Value {
        match method {
            "initialize" => json!({ "result": { "capabilities": {} } }),
            "textDocument/lint/allFixes" => {
                if let Some((code, message)) = self.fix_error.lock().unwrap().clone() {
                    return json!({ "error": { "code": code, "message": message } });
                }
                match self.fix_reply.lock().unwrap().clone() {
                    Some((version, edits)) => {
                        json!({ "result": { "documentVersion": version, "edits": edits } })
                    }
                    None => json!({ "result": null }),
                }
            }
            _ => json!({ "result": null }),
        }
    }
}

enum Outgoing {
    Frame(Value),
    Close,
}

/// Handle on one running server instance.
#[derive(Clone)]
pub struct ServerControl {
    out: mpsc::UnboundedSender<Outgoing>,
}

impl ServerControl {
    pub fn notify(&self, method: &str, params: Value) {
        let _ = self.out.send(Outgoing::Frame(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        })));
    }

    pub fn send_raw(&self, frame: Value) {
        let _ = self.out.send(Outgoing::Frame(frame));
    }

    /// Close the server's output, as if the process died.
    pub fn close(&self) {
        let _ = self.out.send(Outgoing::Close);
    }
}

async fn write_loop(writer: DuplexStream, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    let mut writer = FrameWriter::new(writer);
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Frame(frame) => {
                if writer.write_frame(&frame).await.is_err() {
                    return;
                }
            }
            Outgoing::Close => return,
        }
    }
}

async fn read_loop(
    reader: DuplexStream,
    script: Arc<Script>,
    out: mpsc::UnboundedSender<Outgoing>,
) {
    let mut reader = FrameReader::new(reader);
    while let Ok(Some(frame)) = reader.read_frame().await {
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        script.received.lock().unwrap().push(frame.clone());

        if let Some(id) = frame.get("id").filter(|_| !method.is_empty()) {
            let mut response = script.answer(&method);
            response["jsonrpc"] = json!("2.0");
            response["id"] = id.clone();
            let _ = out.send(Outgoing::Frame(response));
        }
        if method == "initialized" {
            for (method, params) in script.after_initialized.lock().unwrap().clone() {
                let _ = out.send(Outgoing::Frame(json!({
                    "jsonrpc": "2.0",
                    "method": method,
                    "params": params,
                })));
            }
        }
        if method == "exit" {
            let _ = out.send(Outgoing::Close);
            return;
        }
    }
}

/// Launches scripted servers; every launch gets a fresh pair of pipes.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    pub script: Arc<Script>,
    servers: Arc<Mutex<Vec<ServerControl>>>,
    launches: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Control of the most recently launched server.
    pub fn server(&self) -> ServerControl {
        self.servers.lock().unwrap().last().cloned().unwrap()
    }
}

impl ServerLauncher for ScriptedLauncher {
    fn launch(&mut self, _settings: &ClientSettings) -> anyhow::Result<ServerIo> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (client_read, server_write) = duplex(PIPE_CAPACITY);
        let (server_read, client_write) = duplex(PIPE_CAPACITY);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(server_write, out_rx));
        tokio::spawn(read_loop(server_read, Arc::clone(&self.script), out_tx.clone()));
        self.servers
            .lock()
            .unwrap()
            .push(ServerControl { out: out_tx });

        Ok(ServerIo {
            reader: Box::new(client_read),
            writer: Box::new(client_write),
            process: None,
        })
    }
}

struct MemoryDocument {
    text: String,
    version: i32,
}

/// In-memory editor documents.
#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<HashMap<String, MemoryDocument>>,
    active: Mutex<Option<String>>,
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub apply_calls: AtomicUsize,
}

impl MemoryDocuments {
    pub fn open(&self, uri: &str, version: i32, text: &str) {
        self.docs.lock().unwrap().insert(
            uri.to_string(),
            MemoryDocument {
                text: text.to_string(),
                version,
            },
        );
        *self.active.lock().unwrap() = Some(uri.to_string());
    }

    pub fn focus(&self, uri: Option<&str>) {
        *self.active.lock().unwrap() = uri.map(String::from);
    }

    /// The user typed: bump the version without touching the text.
    pub fn type_into(&self, uri: &str) {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(uri) {
            doc.version += 1;
        }
    }

    pub fn text(&self, uri: &str) -> String {
        self.docs.lock().unwrap()[uri].text.clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }
}

impl DocumentSurface for MemoryDocuments {
    fn current_version(&self, uri: &str) -> Option<i32> {
        self.docs.lock().unwrap().get(uri).map(|doc| doc.version)
    }

    fn active_document(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }

    fn apply_edits<'a>(&'a self, uri: &'a str, edits: &'a [TextEdit]) -> EditFut<'a> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let applied = match self.docs.lock().unwrap().get_mut(uri) {
            Some(doc) => match apply_edits(&doc.text, edits) {
                Ok(text) => {
                    doc.text = text;
                    doc.version += 1;
                    true
                }
                Err(_) => false,
            },
            None => false,
        };
        Box::pin(async move { applied })
    }

    fn show_information(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

type Hooks = Arc<Mutex<Vec<(usize, Arc<dyn WillSaveHook>)>>>;

/// Save pipeline that runs every registered hook in order.
#[derive(Default)]
pub struct MemorySaves {
    hooks: Hooks,
    next: AtomicUsize,
}

struct Registration {
    id: usize,
    hooks: Hooks,
}

impl Disposable for Registration {
    fn dispose(&mut self) {
        self.hooks.lock().unwrap().retain(|(id, _)| *id != self.id);
    }
}

impl SaveInterceptor for MemorySaves {
    fn register(&self, hook: Arc<dyn WillSaveHook>) -> Box<dyn Disposable> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.hooks.lock().unwrap().push((id, hook));
        Box::new(Registration {
            id,
            hooks: Arc::clone(&self.hooks),
        })
    }
}

impl MemorySaves {
    pub fn installed(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }

    pub async fn save(&self, target: SaveTarget, reason: SaveReason) -> Vec<TextEdit> {
        let hooks: Vec<_> = self
            .hooks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        let mut edits = Vec::new();
        for hook in hooks {
            edits.extend(hook.will_save(target.clone(), reason).await);
        }
        edits
    }
}

/// A client wired to a scripted server and in-memory editor services.
pub struct Harness {
    pub client: LintClient,
    pub launcher: ScriptedLauncher,
    pub documents: Arc<MemoryDocuments>,
    pub saves: Arc<MemorySaves>,
}

impl Harness {
    pub fn new(settings: ClientSettings) -> Self {
        let launcher = ScriptedLauncher::default();
        let documents = Arc::new(MemoryDocuments::default());
        let saves = Arc::new(MemorySaves::default());
        let client = LintClient::new(
            settings,
            PathBuf::from("/work"),
            Box::new(launcher.clone()),
            Host {
                documents: documents.clone(),
                saves: saves.clone(),
            },
        );
        Self {
            client,
            launcher,
            documents,
            saves,
        }
    }

    pub async fn started(settings: ClientSettings) -> Self {
        let mut harness = Self::new(settings);
        timeout(WAIT, harness.client.start_and_wait())
            .await
            .expect("server became ready in time")
            .unwrap();
        harness
    }

    /// Handle events until `done` holds.
    pub async fn pump_until(&mut self, done: impl Fn(&LintClient) -> bool) {
        let client = &mut self.client;
        let waited = timeout(WAIT, async {
            while !done(&*client) {
                client.next_event().await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not reached in time");
    }

    /// Await `work` while events keep flowing.
    pub async fn drive<F: Future>(&mut self, work: F) -> F::Output {
        let client = &mut self.client;
        let mut work = pin!(work);
        timeout(WAIT, async {
            loop {
                tokio::select! {
                    out = &mut work => return out,
                    () = client.next_event() => {}
                }
            }
        })
        .await
        .expect("work finished in time")
    }
}

/// Poll `check` until it holds.
pub async fn eventually(check: impl Fn() -> bool) {
    let waited = timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
