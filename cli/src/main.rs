//! Lintel CLI - runs the lint-server client against files on disk.
//!
//! ```text
//! lintel fix <file>    LintClient::start_and_wait() -> didOpen -> executeAutofix
//! lintel save <file>   same, but through the auto-fix-on-save hook
//! lintel init [dir]    createConfig
//! ```
//!
//! While a command awaits the server the client keeps draining transport
//! events, so status notifications and restarts are handled as they arrive.

mod cli;
mod workspace;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lintel_config::LintelConfig;
use lintel_lsp::{Command, CommandOutcome, FixOutcome, Host, LintClient, ProcessLauncher};
use lintel_types::SaveReason;

use crate::cli::{Cli, Command as CliCommand};
use crate::workspace::{FileDocuments, SavePipeline};

/// Editor language id for a file, from its extension.
fn language_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    match ext {
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "md" | "markdown" => "markdown",
        other => other,
    }
    .to_string()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_lintel_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, keep stderr for user-facing messages only.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_lintel_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in lintel_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn lintel_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.lintel/logs/lintel.log
    if let Some(config_path) = LintelConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("lintel.log"));
    }

    // Fallback: ./.lintel/logs/lintel.log
    candidates.push(PathBuf::from(".lintel").join("logs").join("lintel.log"));

    candidates
}

/// Await `work` while the client keeps handling server events.
async fn drive<F: Future>(client: &mut LintClient, work: F) -> F::Output {
    let mut work = pin!(work);
    loop {
        tokio::select! {
            out = &mut work => return out,
            () = client.next_event() => {}
        }
    }
}

struct Session {
    client: LintClient,
    documents: Arc<FileDocuments>,
    saves: Arc<SavePipeline>,
}

fn build_session(auto_fix_on_save: bool) -> Result<Session> {
    let config = LintelConfig::load()?.unwrap_or_default();
    let mut settings = config.client_settings();
    if auto_fix_on_save {
        settings = settings.with_auto_fix_on_save(true);
    }
    let server = config.server_command()?;
    let workspace_root = env::current_dir().context("reading current directory")?;

    let documents = Arc::new(FileDocuments::default());
    let saves = Arc::new(SavePipeline::default());
    let launcher = ProcessLauncher::new(server, workspace_root.clone());
    let client = LintClient::new(
        settings,
        workspace_root,
        Box::new(launcher),
        Host {
            documents: documents.clone(),
            saves: saves.clone(),
        },
    );
    Ok(Session {
        client,
        documents,
        saves,
    })
}

async fn run_fix(path: &Path, language: Option<String>) -> Result<ExitCode> {
    let Session {
        mut client,
        documents,
        ..
    } = build_session(false)?;
    let language = language.unwrap_or_else(|| language_for_path(path));

    client
        .start_and_wait()
        .await
        .context("lint server did not start")?;
    let (doc, text) = documents.open(path)?;
    client.document_opened(&doc, &language, &text).await?;

    let commands = client.commands();
    let outcome = drive(&mut client, commands.execute(Command::ExecuteAutofix)).await;
    let code = match outcome {
        Ok(CommandOutcome::Fixed(completion)) => {
            println!(
                "{}: {} edit(s), {:?}",
                doc.display_name(),
                completion.edits.len(),
                completion.outcome
            );
            if completion.outcome == FixOutcome::Applied {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Ok(other) => {
            tracing::debug!(?other, "Unexpected command outcome");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    };

    println!("{}", client.snapshot().label());
    client.stop().await;
    Ok(code)
}

async fn run_save(path: &Path, language: Option<String>, reason: SaveReason) -> Result<ExitCode> {
    let Session {
        mut client,
        documents,
        saves,
    } = build_session(true)?;
    let language = language.unwrap_or_else(|| language_for_path(path));

    client
        .start_and_wait()
        .await
        .context("lint server did not start")?;
    let (doc, text) = documents.open(path)?;
    client.document_opened(&doc, &language, &text).await?;

    let written = drive(
        &mut client,
        saves.save(&documents, &doc.uri, &language, reason),
    )
    .await?;
    client.document_saved(&doc.uri).await?;
    println!("{}: {written} edit(s) on save", doc.display_name());

    client.stop().await;
    Ok(ExitCode::SUCCESS)
}

async fn run_init(dir: PathBuf) -> Result<ExitCode> {
    let Session { client, .. } = build_session(false)?;
    let commands = client.commands().with_workspace_root(dir);
    match commands.execute(Command::CreateConfig).await? {
        CommandOutcome::ConfigCreated(created) => {
            println!("{}", created.path().display());
            Ok(ExitCode::SUCCESS)
        }
        other => bail!("unexpected outcome {other:?}"),
    }
}

fn run_auto_fix_on_save(enabled: bool) -> Result<ExitCode> {
    let path = LintelConfig::path().context("could not determine home directory")?;
    LintelConfig::persist_auto_fix_on_save(&path, enabled)?;
    println!(
        "auto-fix on save {} in {}",
        if enabled { "enabled" } else { "disabled" },
        path.display()
    );
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing();

    let result = match cli.command {
        CliCommand::Fix { file, language } => run_fix(&file, language).await,
        CliCommand::Save {
            file,
            language,
            reason,
        } => run_save(&file, language, reason.into()).await,
        CliCommand::Init { dir } => run_init(dir).await,
        CliCommand::AutoFixOnSave { state } => run_auto_fix_on_save(state.enabled()),
    };

    result.unwrap_or_else(|err| {
        tracing::error!("{err:#}");
        eprintln!("Error: {err:#}");
        ExitCode::FAILURE
    })
}
