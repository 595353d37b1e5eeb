//! File-backed host services for the command line.
//!
//! Documents are files on disk, held in memory once opened. Applying edits
//! rewrites the file atomically and bumps the version, the same way an editor
//! bumps a buffer's version on every change.

use std::collections::HashMap;
use std::fs;
use std::path::{self, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};

use lintel_lsp::{
    Disposable, DocumentSurface, EditFut, SaveInterceptor, SaveTarget, WillSaveHook,
    path_to_file_uri,
};
use lintel_types::{DocumentRef, SaveReason, TextEdit, apply_edits};

struct OpenFile {
    path: PathBuf,
    text: String,
    version: i32,
}

#[derive(Default)]
pub struct FileDocuments {
    files: Mutex<HashMap<String, OpenFile>>,
    active: Mutex<Option<String>>,
}

impl FileDocuments {
    /// Read `path` into memory at version 1 and focus it.
    pub fn open(&self, path: &Path) -> Result<(DocumentRef, String)> {
        let path = path::absolute(path)?;
        let path = path.as_path();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let uri = path_to_file_uri(path)?.to_string();
        let doc = DocumentRef::new(uri.clone(), 1);

        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                uri.clone(),
                OpenFile {
                    path: path.to_path_buf(),
                    text: text.clone(),
                    version: doc.version,
                },
            );
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(uri);
        Ok((doc, text))
    }

    #[must_use]
    pub fn text(&self, uri: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .map(|file| file.text.clone())
    }

    /// Apply `edits` to the in-memory text and write the result back.
    pub fn write_edits(&self, uri: &str, edits: &[TextEdit]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let file = files
            .get_mut(uri)
            .ok_or_else(|| anyhow!("{uri} is not open"))?;
        if edits.is_empty() {
            return Ok(());
        }

        let text = apply_edits(&file.text, edits)?;
        lintel_config::atomic_write(&file.path, text.as_bytes())
            .with_context(|| format!("writing {}", file.path.display()))?;
        file.text = text;
        file.version += 1;
        tracing::debug!(uri, version = file.version, edits = edits.len(), "Wrote fixes");
        Ok(())
    }
}

impl DocumentSurface for FileDocuments {
    fn current_version(&self, uri: &str) -> Option<i32> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .map(|file| file.version)
    }

    fn active_document(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn apply_edits<'a>(&'a self, uri: &'a str, edits: &'a [TextEdit]) -> EditFut<'a> {
        Box::pin(async move {
            match self.write_edits(uri, edits) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(uri, "Failed to apply fixes: {e:#}");
                    false
                }
            }
        })
    }

    fn show_information(&self, message: &str) {
        eprintln!("{message}");
    }

    fn show_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

type Hooks = Arc<Mutex<Vec<(u64, Arc<dyn WillSaveHook>)>>>;

/// Save pipeline: every registered hook runs before the file is written.
#[derive(Default)]
pub struct SavePipeline {
    hooks: Hooks,
    next_id: AtomicU64,
}

struct HookRegistration {
    id: u64,
    hooks: Hooks,
}

impl Disposable for HookRegistration {
    fn dispose(&mut self) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

impl SaveInterceptor for SavePipeline {
    fn register(&self, hook: Arc<dyn WillSaveHook>) -> Box<dyn Disposable> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, hook));
        Box::new(HookRegistration {
            id,
            hooks: Arc::clone(&self.hooks),
        })
    }
}

impl SavePipeline {
    /// Run the hooks for `uri`, fold their edits into the file, and return
    /// how many edits were written.
    pub async fn save(
        &self,
        documents: &FileDocuments,
        uri: &str,
        language_id: &str,
        reason: SaveReason,
    ) -> Result<usize> {
        let hooks: Vec<_> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        let mut written = 0;
        for hook in hooks {
            let version = documents
                .current_version(uri)
                .ok_or_else(|| anyhow!("{uri} is not open"))?;
            let target = SaveTarget {
                uri: uri.to_string(),
                language_id: language_id.to_string(),
                version,
            };
            let edits = hook.will_save(target, reason).await;
            documents.write_edits(uri, &edits)?;
            written += edits.len();
        }
        Ok(written)
    }
}
