//! Configuration loading, parsing, and persistence for lintel.
//!
//! Settings live in `~/.lintel/config.toml`:
//!
//! ```toml
//! [client]
//! auto_fix_on_save = true
//! trace = "messages"
//! languages = ["typescript", "markdown"]
//!
//! [server]
//! command = "lint-server"
//! args = ["--stdio"]
//! ```

mod atomic;

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::Deserialize;
use toml_edit::{DocumentMut, Item, Table, TomlError, value};

use lintel_types::{ClientSettings, ServerCommand, SettingsError};

pub use atomic::{atomic_write, atomic_write_new};

/// Server launched when the config file names none.
pub const DEFAULT_SERVER_COMMAND: &str = "lint-server";

/// Name of the per-workspace lint configuration file.
pub const LINT_CONFIG_FILE: &str = "lint.json";

const DEFAULT_LINT_CONFIG: &str = r#"{
  "extends": "recommended",
  "rules": {}
}
"#;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to edit {}: {source}", path.display())]
    Edit {
        path: PathBuf,
        #[source]
        source: TomlError,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::NoHome => None,
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Edit { path, .. }
            | ConfigError::Write { path, .. } => Some(path),
        }
    }
}

/// Contents of `config.toml`. Missing tables fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct LintelConfig {
    #[serde(default)]
    pub client: Option<ClientSettings>,
    #[serde(default)]
    pub server: Option<ServerCommand>,
}

impl LintelConfig {
    /// Load from the default path. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(&path)
    }

    /// Load from `path`. `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Client settings, defaulted when the `[client]` table is absent.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        self.client.clone().unwrap_or_default()
    }

    /// Server command with `${VAR}` references expanded.
    pub fn server_command(&self) -> Result<ServerCommand, SettingsError> {
        match &self.server {
            Some(server) => ServerCommand::new(
                expand_env_vars(server.command()),
                server.args().iter().map(|a| expand_env_vars(a)).collect(),
            ),
            None => ServerCommand::new(DEFAULT_SERVER_COMMAND, vec!["--stdio".to_string()]),
        }
    }

    /// Persist `client.auto_fix_on_save` to `path`, keeping comments and layout.
    pub fn persist_auto_fix_on_save(path: &Path, enabled: bool) -> Result<(), ConfigError> {
        let content = if path.exists() {
            fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            String::new()
        };

        let mut doc = content
            .parse::<DocumentMut>()
            .map_err(|source| ConfigError::Edit {
                path: path.to_path_buf(),
                source,
            })?;

        if !doc.contains_key("client") {
            doc["client"] = Item::Table(Table::new());
        }
        doc["client"]["auto_fix_on_save"] = value(enabled);

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        atomic_write(path, doc.to_string().as_bytes()).map_err(write_err)
    }
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
#[must_use]
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + len];
        if var.is_empty() {
            out.push_str("${}");
        } else {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lintel").join("config.toml"))
}

/// Result of [`create_default_lint_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedConfig {
    Created(PathBuf),
    AlreadyExists(PathBuf),
}

impl CreatedConfig {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            CreatedConfig::Created(path) | CreatedConfig::AlreadyExists(path) => path,
        }
    }
}

/// Write the default `lint.json` into `workspace_root` unless one exists.
pub fn create_default_lint_config(workspace_root: &Path) -> Result<CreatedConfig, ConfigError> {
    let path = workspace_root.join(LINT_CONFIG_FILE);
    if path.exists() {
        return Ok(CreatedConfig::AlreadyExists(path));
    }
    match atomic_write_new(&path, DEFAULT_LINT_CONFIG.as_bytes()) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Created lint configuration");
            Ok(CreatedConfig::Created(path))
        }
        // Lost a race with another writer; theirs stands.
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Ok(CreatedConfig::AlreadyExists(path))
        }
        Err(source) => Err(ConfigError::Write { path, source }),
    }
}
