//! Auto-fix-on-save through the host's save pipeline.

use std::sync::Arc;

use lintel_lsp::SaveTarget;
use lintel_types::{DocumentRef, SaveReason};

use crate::common::{Harness, edit, eventually, settings};

const A_TS: &str = "file:///work/src/a.ts";
const SOURCE: &str = "var x = 1;\n";

async fn harness(auto_fix_on_save: bool) -> Harness {
    let settings = settings(&["typescript"]).with_auto_fix_on_save(auto_fix_on_save);
    let mut h = Harness::started(settings).await;
    h.documents.open(A_TS, 3, SOURCE);
    h.client
        .document_opened(&DocumentRef::new(A_TS, 3), "typescript", SOURCE)
        .await
        .unwrap();
    h.launcher.script.reply_with(3, vec![edit(0, 0, 3, "let")]);
    h
}

fn target(language_id: &str, version: i32) -> SaveTarget {
    SaveTarget {
        uri: A_TS.to_string(),
        language_id: language_id.to_string(),
        version,
    }
}

fn fix_requests(h: &Harness) -> usize {
    h.launcher
        .script
        .params_of("textDocument/lint/allFixes")
        .len()
}

#[tokio::test]
async fn manual_save_folds_fixes_into_the_save() {
    let mut h = harness(true).await;
    assert!(h.client.auto_fix_enabled());
    assert_eq!(h.saves.installed(), 1);

    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("typescript", 3), SaveReason::Manual))
        .await;

    assert_eq!(edits, [edit(0, 0, 3, "let")]);
    let requests = h.launcher.script.params_of("textDocument/lint/allFixes");
    assert_eq!(requests[0]["isOnSave"], true);
    // The save applies the edits, not the workflow.
    assert_eq!(h.documents.text(A_TS), SOURCE);
}

#[tokio::test]
async fn focus_out_autosave_also_fixes() {
    let mut h = harness(true).await;
    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("typescript", 3), SaveReason::FocusOut))
        .await;
    assert_eq!(edits.len(), 1);
}

#[tokio::test]
async fn delayed_autosave_never_asks_the_server() {
    let mut h = harness(true).await;
    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("typescript", 3), SaveReason::AfterDelay))
        .await;
    assert!(edits.is_empty());
    assert_eq!(fix_requests(&h), 0);
}

#[tokio::test]
async fn other_languages_are_left_alone() {
    let mut h = harness(true).await;
    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("python", 3), SaveReason::Manual))
        .await;
    assert!(edits.is_empty());
    assert_eq!(fix_requests(&h), 0);
}

#[tokio::test]
async fn stale_save_fixes_are_dropped() {
    let mut h = harness(true).await;
    h.documents.type_into(A_TS);

    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("typescript", 4), SaveReason::Manual))
        .await;

    assert!(edits.is_empty());
    assert_eq!(fix_requests(&h), 1);
    assert!(h.documents.infos()[0].contains("a.ts"));
}

#[tokio::test]
async fn server_failure_saves_without_fixes() {
    let mut h = harness(true).await;
    h.launcher.script.fail_with(-32603, "boom");

    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("typescript", 3), SaveReason::Manual))
        .await;
    assert!(edits.is_empty());
}

#[tokio::test]
async fn toggling_the_setting_registers_one_hook() {
    let mut h = harness(false).await;
    assert_eq!(h.saves.installed(), 0);

    let enabled = h.client.settings().clone().with_auto_fix_on_save(true);
    h.client.configuration_changed(enabled.clone()).await;
    h.client.configuration_changed(enabled).await;
    assert_eq!(h.saves.installed(), 1);

    let script = Arc::clone(&h.launcher.script);
    eventually(|| {
        script
            .params_of("workspace/didChangeConfiguration")
            .len()
            == 2
    })
    .await;
    let pushed = script.params_of("workspace/didChangeConfiguration");
    assert_eq!(pushed[1]["settings"]["lint"]["autoFixOnSave"], true);

    let disabled = h.client.settings().clone().with_auto_fix_on_save(false);
    h.client.configuration_changed(disabled).await;
    assert_eq!(h.saves.installed(), 0);

    let saves = h.saves.clone();
    let edits = h
        .drive(saves.save(target("typescript", 3), SaveReason::Manual))
        .await;
    assert!(edits.is_empty());
    assert_eq!(fix_requests(&h), 0);
}
