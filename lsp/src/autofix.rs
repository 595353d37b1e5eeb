//! Auto-fix-on-save policy.
//!
//! Two states, enabled and disabled. While enabled exactly one will-save hook
//! is registered with the host; the host's save waits for the hook, which runs
//! the fix workflow against the pre-save version and hands back the edits.

use std::sync::Arc;

use lintel_types::{DocumentRef, SaveReason};

use crate::fixes::{FixRequester, FixWorkflow};
use crate::host::{Disposable, DocumentSurface, SaveFut, SaveInterceptor, SaveTarget, WillSaveHook};
use crate::status::LanguageSet;

/// The hook installed while auto-fix-on-save is enabled.
pub struct SaveFixHook {
    workflow: Arc<FixWorkflow>,
    requester: Arc<dyn FixRequester>,
    documents: Arc<dyn DocumentSurface>,
    languages: LanguageSet,
}

impl SaveFixHook {
    pub fn new(
        workflow: Arc<FixWorkflow>,
        requester: Arc<dyn FixRequester>,
        documents: Arc<dyn DocumentSurface>,
        languages: LanguageSet,
    ) -> Self {
        Self {
            workflow,
            requester,
            documents,
            languages,
        }
    }
}

impl WillSaveHook for SaveFixHook {
    fn will_save(&self, target: SaveTarget, reason: SaveReason) -> SaveFut<'_> {
        Box::pin(async move {
            if !reason.triggers_auto_fix() {
                tracing::trace!(uri = %target.uri, "Autosave after delay, not fixing");
                return Vec::new();
            }
            if !self.languages.contains(&target.language_id) {
                return Vec::new();
            }
            let doc = DocumentRef::new(target.uri, target.version);
            self.workflow
                .fixes_for_save(self.requester.as_ref(), self.documents.as_ref(), doc)
                .await
        })
    }
}

pub struct AutoFixOnSave {
    hook: Arc<SaveFixHook>,
    registration: Option<Box<dyn Disposable>>,
}

impl AutoFixOnSave {
    #[must_use]
    pub fn new(hook: SaveFixHook) -> Self {
        Self {
            hook: Arc::new(hook),
            registration: None,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.registration.is_some()
    }

    /// Bring the registration in line with `enabled`. Repeating a call is a no-op.
    pub fn configure(&mut self, enabled: bool, interceptor: &dyn SaveInterceptor) {
        match (enabled, self.is_enabled()) {
            (true, false) => {
                let hook: Arc<dyn WillSaveHook> = self.hook.clone();
                self.registration = Some(interceptor.register(hook));
                tracing::debug!("Auto-fix on save enabled");
            }
            (false, true) => {
                self.dispose();
                tracing::debug!("Auto-fix on save disabled");
            }
            _ => {}
        }
    }

    pub fn dispose(&mut self) {
        if let Some(mut registration) = self.registration.take() {
            registration.dispose();
        }
    }
}

impl Drop for AutoFixOnSave {
    fn drop(&mut self) {
        self.dispose();
    }
}
