//! User-invocable commands.
//!
//! [`CommandRunner`] is cloneable and does not borrow the client, so a command
//! can await the server while the client keeps draining notifications.

use std::path::PathBuf;
use std::sync::Arc;

use lintel_config::{ConfigError, CreatedConfig};
use lintel_types::{DocumentRef, TextEdit};

use crate::error::RequestError;
use crate::fixes::{FixCompletion, FixRequester, FixWorkflow};
use crate::host::DocumentSurface;
use crate::output::OutputChannel;

pub const CREATE_CONFIG: &str = "lintel.createConfig";
pub const APPLY_TEXT_EDITS: &str = "lintel.applyTextEdits";
pub const EXECUTE_AUTOFIX: &str = "lintel.executeAutofix";
pub const SHOW_OUTPUT_CHANNEL: &str = "lintel.showOutputChannel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write the default lint configuration into the workspace if absent.
    CreateConfig,
    /// Apply edits computed for `version` of `uri`.
    ApplyTextEdits {
        uri: String,
        version: i32,
        edits: Vec<TextEdit>,
    },
    /// Fix the active document.
    ExecuteAutofix,
    ShowOutputChannel,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0}")]
    Unknown(String),
    #[error("bad arguments for {command}: {reason}")]
    BadArguments {
        command: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Command {
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Command::CreateConfig => CREATE_CONFIG,
            Command::ApplyTextEdits { .. } => APPLY_TEXT_EDITS,
            Command::ExecuteAutofix => EXECUTE_AUTOFIX,
            Command::ShowOutputChannel => SHOW_OUTPUT_CHANNEL,
        }
    }

    /// Decode a command invocation. `applyTextEdits` takes `[uri, version, edits]`.
    pub fn from_invocation(id: &str, args: &[serde_json::Value]) -> Result<Self, CommandError> {
        match id {
            CREATE_CONFIG => Ok(Command::CreateConfig),
            EXECUTE_AUTOFIX => Ok(Command::ExecuteAutofix),
            SHOW_OUTPUT_CHANNEL => Ok(Command::ShowOutputChannel),
            APPLY_TEXT_EDITS => {
                let bad = |reason: &str| CommandError::BadArguments {
                    command: APPLY_TEXT_EDITS,
                    reason: reason.to_string(),
                };
                let [uri, version, edits] = args else {
                    return Err(bad("expected [uri, version, edits]"));
                };
                let uri = uri.as_str().ok_or_else(|| bad("uri must be a string"))?;
                let version = version
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| bad("version must be a 32-bit integer"))?;
                let edits: Vec<TextEdit> = serde_json::from_value(edits.clone())
                    .map_err(|e| bad(&format!("edits: {e}")))?;
                Ok(Command::ApplyTextEdits {
                    uri: uri.to_string(),
                    version,
                    edits,
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    ConfigCreated(CreatedConfig),
    Fixed(FixCompletion),
    /// No focused document to fix.
    NoActiveDocument,
    Output(Vec<String>),
}

#[derive(Clone)]
pub struct CommandRunner {
    workflow: Arc<FixWorkflow>,
    requester: Arc<dyn FixRequester>,
    documents: Arc<dyn DocumentSurface>,
    output: OutputChannel,
    workspace_root: PathBuf,
}

impl CommandRunner {
    pub fn new(
        workflow: Arc<FixWorkflow>,
        requester: Arc<dyn FixRequester>,
        documents: Arc<dyn DocumentSurface>,
        output: OutputChannel,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            workflow,
            requester,
            documents,
            output,
            workspace_root,
        }
    }

    /// Same runner, creating configuration under `root` instead.
    #[must_use]
    pub fn with_workspace_root(mut self, root: PathBuf) -> Self {
        self.workspace_root = root;
        self
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutcome, CommandError> {
        tracing::debug!(command = command.id(), "Executing command");
        match command {
            Command::CreateConfig => {
                let created = lintel_config::create_default_lint_config(&self.workspace_root)?;
                if let CreatedConfig::AlreadyExists(path) = &created {
                    self.documents.show_information(&format!(
                        "A lint configuration already exists at {}.",
                        path.display()
                    ));
                }
                Ok(CommandOutcome::ConfigCreated(created))
            }
            Command::ApplyTextEdits {
                uri,
                version,
                edits,
            } => {
                let completion = self
                    .workflow
                    .apply_versioned(self.documents.as_ref(), &uri, version, edits)
                    .await;
                Ok(CommandOutcome::Fixed(completion))
            }
            Command::ExecuteAutofix => {
                let Some(uri) = self.documents.active_document() else {
                    return Ok(CommandOutcome::NoActiveDocument);
                };
                let Some(version) = self.documents.current_version(&uri) else {
                    return Ok(CommandOutcome::NoActiveDocument);
                };
                let completion = self
                    .workflow
                    .fix_document(
                        self.requester.as_ref(),
                        self.documents.as_ref(),
                        DocumentRef::new(uri, version),
                    )
                    .await?;
                Ok(CommandOutcome::Fixed(completion))
            }
            Command::ShowOutputChannel => Ok(CommandOutcome::Output(self.output.lines())),
        }
    }
}
