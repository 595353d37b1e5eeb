//! Wire messages exchanged with the linting server.

use std::path::{Path, PathBuf};
use std::process;

use serde::{Deserialize, Serialize};
use url::Url;

use lintel_types::{ClientSettings, DocumentRef, TraceLevel};

pub(crate) const INITIALIZE: &str = "initialize";
pub(crate) const INITIALIZED: &str = "initialized";
pub(crate) const SHUTDOWN: &str = "shutdown";
pub(crate) const EXIT: &str = "exit";
pub(crate) const SET_TRACE: &str = "$/setTrace";
pub(crate) const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";
pub(crate) const DID_OPEN: &str = "textDocument/didOpen";
pub(crate) const DID_CHANGE: &str = "textDocument/didChange";
pub(crate) const DID_SAVE: &str = "textDocument/didSave";
pub(crate) const DID_CLOSE: &str = "textDocument/didClose";
pub(crate) const ALL_FIXES: &str = "textDocument/lint/allFixes";

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Reply to a request the server sent us.
pub(crate) fn response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn error_response(
    id: &serde_json::Value,
    code: i64,
    message: &str,
) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// A frame received from the server, classified by JSON-RPC shape.
#[derive(Debug)]
pub(crate) enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

impl IncomingFrame {
    /// Classify a frame; `None` for anything that is not valid JSON-RPC.
    pub fn parse(frame: &serde_json::Value) -> Option<Self> {
        let id = frame.get("id");
        let method = frame
            .get("method")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        let params = frame.get("params").cloned();
        let is_response = frame.get("result").is_some() || frame.get("error").is_some();

        match (id, method) {
            (Some(id), None) if is_response => Some(Self::Response {
                id: id.as_u64()?,
                body: frame.clone(),
            }),
            (Some(id), Some(method)) => Some(Self::ServerRequest {
                id: id.clone(),
                method,
                params,
            }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            _ => None,
        }
    }
}

pub(crate) fn initialize_params(root_uri: &str, settings: &ClientSettings) -> serde_json::Value {
    serde_json::json!({
        "processId": process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": true
                }
            },
            "workspace": {
                "didChangeConfiguration": { "dynamicRegistration": false }
            }
        },
        "initializationOptions": settings.to_wire(),
        "trace": settings.trace().wire_value(),
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn set_trace_params(level: TraceLevel) -> serde_json::Value {
    serde_json::json!({ "value": level.wire_value() })
}

pub(crate) fn did_change_configuration_params(settings: &ClientSettings) -> serde_json::Value {
    serde_json::json!({ "settings": { "lint": settings.to_wire() } })
}

pub(crate) fn did_open_params(
    doc: &DocumentRef,
    language_id: &str,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": doc.uri,
            "languageId": language_id,
            "version": doc.version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(doc: &DocumentRef, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": doc.uri,
            "version": doc.version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn text_document_params(uri: &str) -> serde_json::Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

/// Parameters of the fix-all request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    pub text_document: TextDocumentIdentifier,
    /// Lets the server skip fixes it only offers interactively.
    pub is_on_save: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

impl FixRequest {
    #[must_use]
    pub fn new(uri: impl Into<String>, is_on_save: bool) -> Self {
        Self {
            text_document: TextDocumentIdentifier { uri: uri.into() },
            is_on_save,
        }
    }
}

/// Params of `lint/status`. `state` stays raw so unrecognized values still map.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatusParams {
    #[serde(default)]
    pub state: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub cause: Option<serde_json::Value>,
}

/// Params of `$/logTrace`.
#[derive(Debug, Deserialize)]
pub(crate) struct LogTraceParams {
    pub message: String,
    #[serde(default)]
    pub verbose: Option<String>,
}

pub fn path_to_file_uri(path: &Path) -> Result<Url, PathToUriError> {
    Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
