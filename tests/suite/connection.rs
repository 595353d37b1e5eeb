//! Connection lifecycle, restart policy, notification routing, and document sync.

use std::sync::{Arc, Mutex};

use serde_json::json;

use lintel_types::{ConnectionState, DocumentRef, Severity};

use crate::common::{Harness, eventually, settings};

const A_TS: &str = "file:///work/a.ts";

#[tokio::test]
async fn start_runs_the_handshake() {
    let h = Harness::started(settings(&["typescript"])).await;
    assert_eq!(h.client.state(), ConnectionState::Running);
    assert_eq!(h.client.generation(), 1);

    let script = Arc::clone(&h.launcher.script);
    eventually(|| script.methods().len() >= 3).await;
    assert_eq!(
        script.methods()[..3],
        ["initialize", "initialized", "$/setTrace"]
    );
    let init = &script.params_of("initialize")[0];
    assert_eq!(init["rootUri"], "file:///work");
    assert_eq!(init["initializationOptions"]["autoFixOnSave"], false);
    assert_eq!(script.params_of("$/setTrace")[0]["value"], "off");
}

#[tokio::test]
async fn notifications_right_after_the_handshake_are_kept() {
    let mut h = Harness::new(settings(&["typescript"]));
    h.launcher.script.notify_after_initialized("lint/noLibrary", json!(null));
    h.client.start_and_wait().await.unwrap();

    h.pump_until(|c| c.status().severity() == Severity::Error).await;
    assert_eq!(h.client.snapshot().label(), "lint: error");
}

#[tokio::test]
async fn status_notifications_reach_the_snapshot() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let server = h.launcher.server();

    server.notify("lint/status", json!({ "state": 2, "message": "2 rules failed to load" }));
    h.pump_until(|c| c.status().severity() == Severity::Warn).await;
    assert_eq!(h.client.snapshot().label(), "lint: warn");
    assert_eq!(h.client.status().message(), Some("2 rules failed to load"));

    server.notify("lint/startProgress", json!(null));
    h.pump_until(|c| c.status().is_busy()).await;
    assert_eq!(h.client.snapshot().label(), "lint: warn (busy)");

    server.notify("lint/stopProgress", json!(null));
    server.notify("lint/status", json!({ "state": 1 }));
    h.pump_until(|c| c.status().severity() == Severity::Ok && !c.status().is_busy())
        .await;
    assert_eq!(h.client.snapshot().label(), "lint");
}

#[tokio::test]
async fn missing_config_and_library_are_reported() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let server = h.launcher.server();

    server.notify("lint/noConfig", json!(null));
    h.pump_until(|c| c.status().severity() == Severity::Warn).await;
    assert!(
        h.client
            .status()
            .message()
            .is_some_and(|m| m.contains("configuration"))
    );

    server.notify("lint/noLibrary", json!(null));
    h.pump_until(|c| c.status().severity() == Severity::Error).await;
}

#[tokio::test]
async fn unknown_notifications_are_ignored() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let server = h.launcher.server();

    server.notify("lint/somethingNew", json!({ "state": 3 }));
    server.notify("$/logTrace", json!({ "message": "checked a.ts" }));
    h.pump_until(|c| {
        c.output()
            .lines()
            .iter()
            .any(|line| line.contains("checked a.ts"))
    })
    .await;
    assert_eq!(h.client.status().severity(), Severity::Ok);
    assert_eq!(h.client.state(), ConnectionState::Running);
}

#[tokio::test]
async fn server_requests_for_status_are_answered() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let server = h.launcher.server();

    server.send_raw(json!({ "jsonrpc": "2.0", "id": 7, "method": "lint/noLibrary" }));
    server.send_raw(json!({ "jsonrpc": "2.0", "id": 8, "method": "lint/mystery" }));
    h.pump_until(|c| c.status().severity() == Severity::Error).await;
}

#[tokio::test]
async fn crashed_server_is_restarted() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.client
        .on_state_change(move |_, new| sink.lock().unwrap().push(new));

    h.launcher.server().close();
    h.pump_until(|c| c.generation() == 2 && c.state() == ConnectionState::Running)
        .await;

    assert_eq!(h.launcher.launches(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        [
            ConnectionState::Stopped,
            ConnectionState::Starting,
            ConnectionState::Running
        ]
    );
}

#[tokio::test]
async fn repeated_crashes_give_up() {
    let mut h = Harness::started(settings(&["typescript"])).await;

    for generation in 2..=5 {
        h.launcher.server().close();
        h.pump_until(|c| c.generation() == generation && c.state() == ConnectionState::Running)
            .await;
    }

    h.launcher.server().close();
    h.pump_until(|c| c.state() == ConnectionState::Stopped).await;
    assert_eq!(h.launcher.launches(), 5);
}

#[tokio::test]
async fn deliberate_exit_is_not_restarted() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let server = h.launcher.server();

    server.notify("lint/exit", json!(null));
    server.close();
    h.pump_until(|c| c.state() == ConnectionState::Stopped).await;

    assert!(h.client.server_called_exit());
    assert_eq!(h.launcher.launches(), 1);
    assert_eq!(h.client.snapshot().label(), "lint (stopped)");
}

#[tokio::test]
async fn malformed_frames_eventually_shut_down() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let server = h.launcher.server();

    for n in 0..4 {
        server.send_raw(json!({ "jsonrpc": "2.0", "garbage": n }));
    }
    h.pump_until(|c| c.state() == ConnectionState::Stopped).await;
    assert_eq!(h.launcher.launches(), 1);
}

#[tokio::test]
async fn stop_shuts_the_server_down() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    h.client.stop().await;
    assert_eq!(h.client.state(), ConnectionState::Stopped);

    let script = Arc::clone(&h.launcher.script);
    eventually(|| script.methods().iter().any(|m| m == "exit")).await;
    assert!(script.methods().iter().any(|m| m == "shutdown"));
    assert_eq!(h.launcher.launches(), 1);
}

#[tokio::test]
async fn document_sync_follows_the_language_set() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    let doc = DocumentRef::new(A_TS, 1);

    h.client
        .document_opened(&DocumentRef::new("file:///work/main.py", 1), "python", "x")
        .await
        .unwrap();
    h.client.document_changed(&doc, "let x;").await.unwrap();

    h.client
        .document_opened(&doc, "typescript", "var x;")
        .await
        .unwrap();
    h.client
        .document_changed(&DocumentRef::new(A_TS, 2), "let x;")
        .await
        .unwrap();
    h.client.document_saved(A_TS).await.unwrap();
    h.client.document_closed(A_TS).await.unwrap();
    h.client.document_closed(A_TS).await.unwrap();

    let script = Arc::clone(&h.launcher.script);
    eventually(|| script.methods().iter().any(|m| m == "textDocument/didClose")).await;
    let sync: Vec<_> = script
        .methods()
        .into_iter()
        .filter(|m| m.starts_with("textDocument/"))
        .collect();
    assert_eq!(
        sync,
        [
            "textDocument/didOpen",
            "textDocument/didChange",
            "textDocument/didSave",
            "textDocument/didClose"
        ]
    );
    let changed = &script.params_of("textDocument/didChange")[0];
    assert_eq!(changed["textDocument"]["version"], 2);
    assert_eq!(changed["contentChanges"][0]["text"], "let x;");
}

#[tokio::test]
async fn restart_forgets_open_documents() {
    let mut h = Harness::started(settings(&["typescript"])).await;
    h.client
        .document_opened(&DocumentRef::new(A_TS, 1), "typescript", "var x;")
        .await
        .unwrap();

    h.launcher.server().close();
    h.pump_until(|c| c.generation() == 2 && c.state() == ConnectionState::Running)
        .await;

    // Not open on the new connection, so nothing is sent.
    h.client.document_saved(A_TS).await.unwrap();
    h.client.stop().await;
    let script = Arc::clone(&h.launcher.script);
    eventually(|| script.methods().iter().any(|m| m == "exit")).await;
    assert!(!script.methods().iter().any(|m| m == "textDocument/didSave"));
}
