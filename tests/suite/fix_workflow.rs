//! Versioned fix workflow, end to end through the client and a scripted server.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use lintel_lsp::{Command, CommandError, CommandOutcome, FixCompletion, FixOutcome, RequestError};
use lintel_types::DocumentRef;

use crate::common::{Harness, edit, settings};

const A_MD: &str = "file:///work/a.md";
const B_MD: &str = "file:///work/b.md";

async fn opened(version: i32, text: &str) -> Harness {
    let mut h = Harness::started(settings(&["markdown"])).await;
    h.documents.open(A_MD, version, text);
    h.client
        .document_opened(&DocumentRef::new(A_MD, version), "markdown", text)
        .await
        .unwrap();
    h
}

fn observe(h: &Harness) -> Arc<Mutex<Vec<FixCompletion>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.client.on_fix_complete(move |completion| {
        sink.lock().unwrap().push(completion.clone());
        Ok(())
    });
    seen
}

fn fixed(outcome: CommandOutcome) -> FixCompletion {
    match outcome {
        CommandOutcome::Fixed(completion) => completion,
        other => panic!("expected a fix completion, got {other:?}"),
    }
}

#[tokio::test]
async fn fixes_apply_when_the_version_still_matches() {
    let mut h = opened(3, "# titel\n").await;
    h.launcher.script.reply_with(3, vec![edit(0, 2, 7, "title")]);
    let seen = observe(&h);

    let commands = h.client.commands();
    let completion = fixed(h.drive(commands.execute(Command::ExecuteAutofix)).await.unwrap());

    assert_eq!(completion.outcome, FixOutcome::Applied);
    assert_eq!(completion.target.as_deref(), Some(A_MD));
    assert_eq!(h.documents.text(A_MD), "# title\n");
    assert_eq!(*seen.lock().unwrap(), [completion]);

    let opened = h.launcher.script.params_of("textDocument/didOpen");
    assert_eq!(opened[0]["textDocument"]["version"], 3);
    assert_eq!(opened[0]["textDocument"]["languageId"], "markdown");
    let requests = h.launcher.script.params_of("textDocument/lint/allFixes");
    assert_eq!(requests[0]["textDocument"]["uri"], A_MD);
    assert_eq!(requests[0]["isOnSave"], false);
}

#[tokio::test]
async fn fixes_for_an_older_version_are_discarded() {
    let mut h = opened(3, "# titel\n").await;
    h.launcher.script.reply_with(3, vec![edit(0, 2, 7, "title")]);
    h.documents.type_into(A_MD);
    let seen = observe(&h);

    let commands = h.client.commands();
    let completion = fixed(h.drive(commands.execute(Command::ExecuteAutofix)).await.unwrap());

    assert_eq!(completion.outcome, FixOutcome::Stale);
    assert_eq!(completion.edits.len(), 1);
    assert_eq!(h.documents.text(A_MD), "# titel\n");
    assert_eq!(h.documents.apply_calls.load(Ordering::SeqCst), 0);
    let infos = h.documents.infos();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].contains("a.md"));
    assert_eq!(seen.lock().unwrap().len(), 1, "stale runs still complete");
}

#[tokio::test]
async fn back_to_back_runs_on_one_document_are_serialized() {
    let mut h = opened(3, "# titel\n").await;
    h.launcher.script.reply_with(3, vec![edit(0, 2, 7, "title")]);

    let commands = h.client.commands();
    let (first, second) = h
        .drive(async {
            tokio::join!(
                commands.execute(Command::ExecuteAutofix),
                commands.execute(Command::ExecuteAutofix)
            )
        })
        .await;

    let mut outcomes = [fixed(first.unwrap()).outcome, fixed(second.unwrap()).outcome];
    outcomes.sort_by_key(|outcome| *outcome != FixOutcome::Applied);
    assert_eq!(outcomes, [FixOutcome::Applied, FixOutcome::Stale]);
    assert_eq!(h.documents.text(A_MD), "# title\n");
}

#[tokio::test]
async fn empty_fix_list_applies_nothing() {
    let mut h = opened(3, "# title\n").await;
    h.launcher.script.reply_with(3, Vec::new());

    let commands = h.client.commands();
    let completion = fixed(h.drive(commands.execute(Command::ExecuteAutofix)).await.unwrap());

    assert_eq!(completion.outcome, FixOutcome::Applied);
    assert_eq!(h.documents.apply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn server_errors_surface_without_a_completion() {
    let mut h = opened(3, "# titel\n").await;
    h.launcher.script.fail_with(-32603, "rule crashed");
    let seen = observe(&h);

    let commands = h.client.commands();
    let err = h
        .drive(commands.execute(Command::ExecuteAutofix))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommandError::Request(RequestError::Server { code: -32603, .. })
    ));
    assert!(seen.lock().unwrap().is_empty());
    assert!(
        h.client
            .output()
            .lines()
            .iter()
            .any(|line| line.contains("rule crashed"))
    );
}

#[tokio::test]
async fn null_result_is_an_error() {
    let mut h = opened(3, "# titel\n").await;

    let commands = h.client.commands();
    let err = h
        .drive(commands.execute(Command::ExecuteAutofix))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Request(RequestError::EmptyResult { .. })
    ));
}

#[tokio::test]
async fn edits_for_a_document_that_lost_focus_fail() {
    let mut h = opened(3, "# titel\n").await;
    h.documents.open(B_MD, 1, "b\n");
    let seen = observe(&h);

    let commands = h.client.commands();
    let completion = fixed(
        h.drive(commands.execute(Command::ApplyTextEdits {
            uri: A_MD.to_string(),
            version: 3,
            edits: vec![edit(0, 2, 7, "title")],
        }))
        .await
        .unwrap(),
    );

    assert_eq!(completion.outcome, FixOutcome::Failed);
    assert_eq!(completion.target.as_deref(), Some(B_MD));
    assert_eq!(h.documents.text(A_MD), "# titel\n");
    assert_eq!(h.documents.errors.lock().unwrap().len(), 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn apply_text_edits_invocation_round_trip() {
    let mut h = opened(3, "# titel\n").await;
    let args = [
        serde_json::json!(A_MD),
        serde_json::json!(3),
        serde_json::to_value(vec![edit(0, 2, 7, "title")]).unwrap(),
    ];
    let command = Command::from_invocation("lintel.applyTextEdits", &args).unwrap();

    let commands = h.client.commands();
    let completion = fixed(h.drive(commands.execute(command)).await.unwrap());
    assert_eq!(completion.outcome, FixOutcome::Applied);
    assert_eq!(h.documents.text(A_MD), "# title\n");
}

#[tokio::test]
async fn fixing_while_disconnected_fails_fast() {
    let h = Harness::new(settings(&["markdown"]));
    h.documents.open(A_MD, 1, "x\n");

    let err = h
        .client
        .commands()
        .execute(Command::ExecuteAutofix)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Request(RequestError::NotConnected)
    ));
}
