//! Versioned fix workflow.
//!
//! Fixes are computed by the server against a specific document version. By
//! the time the reply arrives the user may have kept typing, so the version the
//! server fixed is compared with the editor's current version right before
//! anything is mutated. A mismatch discards the batch; it is not an error.
//!
//! Invocations against the same document take turns. Invocations against
//! different documents run independently.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use lintel_types::{DocumentRef, FixResult, TextEdit, display_name};

use crate::error::RequestError;
use crate::host::DocumentSurface;
use crate::output::OutputChannel;
use crate::protocol::FixRequest;

/// Boxed future returned by request seams.
pub type RequestFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RequestError>> + Send + 'a>>;

/// Anything that can ask the server for a document's fixes.
pub trait FixRequester: Send + Sync {
    fn compute_all_fixes(&self, request: FixRequest) -> RequestFut<'_, FixResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// Edits were applied to the document.
    Applied,
    /// The document changed while fixes were computed; nothing was applied.
    Stale,
    /// Focus moved elsewhere or the editor rejected the edits.
    Failed,
}

impl FixOutcome {
    /// Stale is a no-op, not a failure.
    #[must_use]
    pub fn is_success(self) -> bool {
        self != Self::Failed
    }
}

/// What a completion observer sees, exactly once per finished workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixCompletion {
    /// Document that had focus when the edits were (or would have been) applied.
    pub target: Option<String>,
    pub uri: String,
    pub edits: Vec<TextEdit>,
    pub outcome: FixOutcome,
}

type CompletionObserver = Arc<dyn Fn(&FixCompletion) -> anyhow::Result<()> + Send + Sync>;

type TurnMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

pub struct FixWorkflow {
    observers: RwLock<Vec<CompletionObserver>>,
    turns: TurnMap,
    output: OutputChannel,
}

impl FixWorkflow {
    #[must_use]
    pub fn new(output: OutputChannel) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            turns: Mutex::new(HashMap::new()),
            output,
        }
    }

    /// Register an observer. Observers run in registration order.
    pub fn on_complete(
        &self,
        observer: impl Fn(&FixCompletion) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Request fixes for `doc` and apply them if the document has not moved on.
    ///
    /// A request that fails never produced edits, so observers are not called.
    pub async fn fix_document(
        &self,
        requester: &dyn FixRequester,
        documents: &dyn DocumentSurface,
        doc: DocumentRef,
    ) -> Result<FixCompletion, RequestError> {
        let _turn = self.turn(&doc.uri).await;
        tracing::debug!(uri = %doc.uri, version = doc.version, "Requesting fixes");

        let result = match requester
            .compute_all_fixes(FixRequest::new(doc.uri.clone(), false))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.output
                    .error(format!("Computing fixes for {} failed: {e}", doc.display_name()));
                return Err(e);
            }
        };

        Ok(self
            .apply_turn(documents, &doc.uri, result.document_version, result.edits)
            .await)
    }

    /// Apply edits computed for `version` of `uri`, unless the document has moved on.
    pub async fn apply_versioned(
        &self,
        documents: &dyn DocumentSurface,
        uri: &str,
        version: i32,
        edits: Vec<TextEdit>,
    ) -> FixCompletion {
        let _turn = self.turn(uri).await;
        self.apply_turn(documents, uri, version, edits).await
    }

    /// On-save variant: the save applies the returned edits itself.
    ///
    /// Empty on failure or staleness. Observers are not called; the save is
    /// the completion.
    pub async fn fixes_for_save(
        &self,
        requester: &dyn FixRequester,
        documents: &dyn DocumentSurface,
        doc: DocumentRef,
    ) -> Vec<TextEdit> {
        let _turn = self.turn(&doc.uri).await;

        let result = match requester
            .compute_all_fixes(FixRequest::new(doc.uri.clone(), true))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.output.error(format!(
                    "Computing fixes on save for {} failed: {e}",
                    doc.display_name()
                ));
                return Vec::new();
            }
        };

        let current = documents.current_version(&doc.uri);
        if current != Some(result.document_version) {
            tracing::info!(
                uri = %doc.uri,
                fixed = result.document_version,
                ?current,
                "Dropping stale fixes on save"
            );
            documents.show_information(&stale_message(&doc.uri));
            return Vec::new();
        }
        result.edits
    }

    async fn apply_turn(
        &self,
        documents: &dyn DocumentSurface,
        uri: &str,
        version: i32,
        edits: Vec<TextEdit>,
    ) -> FixCompletion {
        let name = display_name(uri);
        let current = documents.current_version(uri);
        let target = documents.active_document();

        let outcome = if current != Some(version) {
            tracing::info!(uri, fixed = version, ?current, "Discarding stale fixes");
            documents.show_information(&stale_message(uri));
            FixOutcome::Stale
        } else if target.as_deref() != Some(uri) {
            let message =
                format!("Fixes for {name} were not applied: it is no longer the active document.");
            self.output.error(message.as_str());
            documents.show_error(&message);
            FixOutcome::Failed
        } else if edits.is_empty() || documents.apply_edits(uri, &edits).await {
            tracing::debug!(uri, version, count = edits.len(), "Applied fixes");
            FixOutcome::Applied
        } else {
            let message = format!("Failed to apply fixes to {name}.");
            self.output.error(message.as_str());
            documents.show_error(&message);
            FixOutcome::Failed
        };

        let completion = FixCompletion {
            target,
            uri: uri.to_string(),
            edits,
            outcome,
        };
        self.notify(&completion);
        completion
    }

    fn notify(&self, completion: &FixCompletion) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (index, observer) in observers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer(completion))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.output
                        .error(format!("Fix completion observer {index} failed: {e:#}"));
                }
                Err(_) => {
                    self.output
                        .error(format!("Fix completion observer {index} panicked"));
                }
            }
        }
    }

    async fn turn(&self, uri: &str) -> DocumentTurn<'_> {
        let lock = {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(turns.entry(uri.to_string()).or_default())
        };
        DocumentTurn {
            turns: &self.turns,
            uri: uri.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_documents(&self) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn stale_message(uri: &str) -> String {
    format!(
        "Fixes for {} were discarded because the document changed while they were computed.",
        display_name(uri)
    )
}

/// Exclusive turn on one document. The map entry goes away with the last turn.
struct DocumentTurn<'a> {
    turns: &'a TurnMap,
    uri: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        if turns
            .get(&self.uri)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            turns.remove(&self.uri);
        }
    }
}
