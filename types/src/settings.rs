//! Resolved configuration types shared across crates.
//!
//! Raw deserialization structs stay private here; they are resolved into
//! these types at the parse boundary via `#[serde(try_from)]`, so holding a
//! [`ClientSettings`] or [`ServerCommand`] is proof that it was validated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Languages the client lints when the settings don't name any.
pub const DEFAULT_LANGUAGES: &[&str] = &[
    "typescript",
    "typescriptreact",
    "javascript",
    "javascriptreact",
];

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must not be an empty path")]
    EmptyPath { field: &'static str },
    #[error("language id must not be empty")]
    EmptyLanguageId,
    #[error("server command must not be empty")]
    EmptyCommand,
}

/// When the server lints: on every keystroke or only on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunTrigger {
    OnSave,
    #[default]
    OnType,
}

/// How much protocol traffic the server should report back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceLevel {
    #[default]
    Off,
    Messages,
    Verbose,
}

impl TraceLevel {
    /// Value for the `$/setTrace` notification.
    #[must_use]
    pub fn wire_value(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Messages => "messages",
            Self::Verbose => "verbose",
        }
    }
}

#[derive(Deserialize)]
struct RawClientSettings {
    #[serde(default)]
    config_path: Option<PathBuf>,
    #[serde(default)]
    node_path: Option<PathBuf>,
    #[serde(default)]
    run: RunTrigger,
    #[serde(default)]
    auto_fix_on_save: bool,
    #[serde(default)]
    trace: TraceLevel,
    #[serde(default)]
    languages: Option<Vec<String>>,
}

/// Validated client settings.
///
/// Invariant: paths, when present, are non-empty; the language list is
/// non-empty and contains no empty ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawClientSettings")]
pub struct ClientSettings {
    config_path: Option<PathBuf>,
    node_path: Option<PathBuf>,
    run: RunTrigger,
    auto_fix_on_save: bool,
    trace: TraceLevel,
    languages: Vec<String>,
}

fn non_empty_path(
    path: Option<PathBuf>,
    field: &'static str,
) -> Result<Option<PathBuf>, SettingsError> {
    match path {
        Some(p) if p.as_os_str().is_empty() => Err(SettingsError::EmptyPath { field }),
        other => Ok(other),
    }
}

impl TryFrom<RawClientSettings> for ClientSettings {
    type Error = SettingsError;

    fn try_from(raw: RawClientSettings) -> Result<Self, Self::Error> {
        let languages = match raw.languages {
            Some(list) if !list.is_empty() => {
                if list.iter().any(|l| l.trim().is_empty()) {
                    return Err(SettingsError::EmptyLanguageId);
                }
                list
            }
            _ => DEFAULT_LANGUAGES.iter().map(|l| (*l).to_string()).collect(),
        };
        Ok(Self {
            config_path: non_empty_path(raw.config_path, "config_path")?,
            node_path: non_empty_path(raw.node_path, "node_path")?,
            run: raw.run,
            auto_fix_on_save: raw.auto_fix_on_save,
            trace: raw.trace,
            languages,
        })
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            node_path: None,
            run: RunTrigger::default(),
            auto_fix_on_save: false,
            trace: TraceLevel::default(),
            languages: DEFAULT_LANGUAGES.iter().map(|l| (*l).to_string()).collect(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    #[must_use]
    pub fn node_path(&self) -> Option<&Path> {
        self.node_path.as_deref()
    }

    #[must_use]
    pub fn run(&self) -> RunTrigger {
        self.run
    }

    #[must_use]
    pub fn auto_fix_on_save(&self) -> bool {
        self.auto_fix_on_save
    }

    #[must_use]
    pub fn trace(&self) -> TraceLevel {
        self.trace
    }

    #[must_use]
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    #[must_use]
    pub fn with_auto_fix_on_save(mut self, enabled: bool) -> Self {
        self.auto_fix_on_save = enabled;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceLevel) -> Self {
        self.trace = trace;
        self
    }

    /// Settings as the server expects them (camelCase keys).
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "configPath": self.config_path.as_ref().map(|p| p.display().to_string()),
            "nodePath": self.node_path.as_ref().map(|p| p.display().to_string()),
            "run": self.run,
            "autoFixOnSave": self.auto_fix_on_save,
            "trace": self.trace,
        })
    }
}

#[derive(Deserialize)]
struct RawServerCommand {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

/// How to launch the linting server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawServerCommand")]
pub struct ServerCommand {
    command: String,
    args: Vec<String>,
}

impl TryFrom<RawServerCommand> for ServerCommand {
    type Error = SettingsError;

    fn try_from(raw: RawServerCommand) -> Result<Self, Self::Error> {
        Self::new(raw.command, raw.args)
    }
}

impl ServerCommand {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Result<Self, SettingsError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(SettingsError::EmptyCommand);
        }
        Ok(Self { command, args })
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}
