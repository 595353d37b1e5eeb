//! Seams to the editor that hosts the client.
//!
//! The client never owns documents or the save pipeline; the host implements
//! these traits and hands them in as trait objects.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use lintel_types::{SaveReason, TextEdit};

/// Resolves to whether the editor accepted the edit batch.
pub type EditFut<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Resolves to the edits the editor should fold into the pending save.
pub type SaveFut<'a> = Pin<Box<dyn Future<Output = Vec<TextEdit>> + Send + 'a>>;

/// The editor's document model, as far as the fix workflow needs it.
pub trait DocumentSurface: Send + Sync {
    /// Version the editor currently assigns to `uri`, if it is open.
    fn current_version(&self, uri: &str) -> Option<i32>;

    /// URI of the document in the focused editable surface.
    fn active_document(&self) -> Option<String>;

    /// Apply `edits` to `uri` as one undoable batch.
    fn apply_edits<'a>(&'a self, uri: &'a str, edits: &'a [TextEdit]) -> EditFut<'a>;

    /// Non-modal informational message.
    fn show_information(&self, message: &str);

    /// Non-modal error message.
    fn show_error(&self, message: &str);
}

/// Document being saved, as seen by a will-save hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTarget {
    pub uri: String,
    pub language_id: String,
    /// Version at the moment the save started.
    pub version: i32,
}

/// Runs before a save; the save waits for the returned future.
pub trait WillSaveHook: Send + Sync {
    fn will_save(&self, target: SaveTarget, reason: SaveReason) -> SaveFut<'_>;
}

/// A registration that can be torn down. Disposing twice is a no-op.
pub trait Disposable: Send {
    fn dispose(&mut self);
}

/// The editor's save pipeline.
pub trait SaveInterceptor: Send + Sync {
    fn register(&self, hook: Arc<dyn WillSaveHook>) -> Box<dyn Disposable>;
}
