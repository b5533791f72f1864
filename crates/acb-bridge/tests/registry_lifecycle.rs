//! Worker lifecycle against a real state root: hire, end, restart,
//! reconciliation, and the pipe relay. Exec workers only — nothing here
//! needs a live tmux server.

#![cfg(unix)]

mod support;

use agent_crew_bridge::BackendKind;
use agent_crew_bridge_core::BridgeError;
use std::io::Write;
use std::time::Duration;
use support::{mock_registry, mock_registry_from, test_config};

#[tokio::test(flavor = "multi_thread")]
async fn hire_makes_worker_visible_and_focused() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    let name = registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    assert_eq!(name, "alice");

    let workers = registry.get_registered();
    let info = workers.get("alice").expect("alice should be registered");
    assert_eq!(info.kind, BackendKind::Exec);
    assert!(info.address.ends_with("inbox.pipe"));

    assert_eq!(registry.state().focused().as_deref(), Some("alice"));
    // Pending is pre-armed so the first reply routes immediately.
    assert!(registry.state().pending.is_pending("alice"));
    assert_eq!(registry.state().pending.chat_id("alice"), Some(10));

    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn hire_normalizes_the_name() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    let name = registry.hire("  Alice! ", BackendKind::Exec, 10).await.unwrap();
    assert_eq!(name, "alice");
    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn reserved_name_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    let err = registry.hire("team", BackendKind::Exec, 10).await.unwrap_err();
    assert!(matches!(err, BridgeError::Invalid { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_hire_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    let err = registry.hire("alice", BackendKind::Exec, 10).await.unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyExists { .. }));
    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn end_removes_worker_and_state() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    registry.end("alice").unwrap();

    assert!(!registry.get_registered().contains_key("alice"));
    assert!(!dir.path().join("alice").exists());
    assert_eq!(registry.state().focused(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn end_unknown_worker_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());
    assert!(matches!(
        registry.end("ghost").unwrap_err(),
        BridgeError::NotFound { .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_hire_leftovers_read_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    // Marker written but no pipe: a crash mid-hire.
    let orphan = dir.path().join("carol");
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("backend"), "exec").unwrap();

    assert!(!registry.get_registered().contains_key("carol"));

    // Re-hiring the same name cleans the orphan up and succeeds.
    registry.hire("carol", BackendKind::Exec, 10).await.unwrap();
    assert!(registry.get_registered().contains_key("carol"));
    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn ending_focused_worker_moves_focus_to_survivor() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    registry.hire("bob", BackendKind::Exec, 10).await.unwrap();
    assert_eq!(registry.state().focused().as_deref(), Some("bob"));

    registry.end("bob").unwrap();
    assert_eq!(registry.state().focused().as_deref(), Some("alice"));
    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_exec_drops_continuation_state() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    let worker_dir = dir.path().join("alice");
    std::fs::write(worker_dir.join("session_id"), "abc-123").unwrap();

    registry.restart("alice").await.unwrap();

    assert!(!worker_dir.join("session_id").exists());
    assert!(!registry.state().pending.is_pending("alice"));
    // Pipe was recreated and is still a FIFO.
    use std::os::unix::fs::FileTypeExt;
    let meta = std::fs::metadata(worker_dir.join("inbox.pipe")).unwrap();
    assert!(meta.file_type().is_fifo());
    registry.shutdown();
}

fn tmux_runs(args: &[&str]) -> bool {
    std::process::Command::new("tmux")
        .args(args)
        .output()
        .is_ok_and(|out| out.status.success())
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_of_running_interactive_worker_is_rejected() {
    if !tmux_runs(&["-V"]) {
        eprintln!("tmux unavailable; skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    // Unique prefix so a concurrent test run never sees this session.
    config.tmux_prefix = format!("acbtest{}-", std::process::id());
    let session = format!("{}alice", config.tmux_prefix);
    let (registry, _exec) = mock_registry_from(config);

    if !tmux_runs(&["new-session", "-d", "-s", &session]) {
        eprintln!("could not create tmux session; skipping");
        return;
    }

    let workers = registry.get_registered();
    assert_eq!(
        workers.get("alice").map(|info| info.kind),
        Some(BackendKind::Interactive)
    );

    // The injected interactive backend reports the worker online, so the
    // guard must refuse without touching the session.
    let err = registry.restart("alice").await.unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyRunning { .. }));
    assert!(tmux_runs(&["has-session", "-t", &session]));

    let _ = tmux_runs(&["kill-session", "-t", &session]);
}

#[tokio::test(flavor = "multi_thread")]
async fn send_delivers_and_arms_pending() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    registry.state().pending.clear_pending("alice");

    registry.send("alice", "do the thing", Some(42)).await.unwrap();

    assert_eq!(
        exec.sent(),
        vec![("alice".to_string(), "do the thing".to_string())]
    );
    assert!(registry.state().pending.is_pending("alice"));
    assert_eq!(registry.state().pending.chat_id("alice"), Some(42));
    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn send_to_unknown_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());
    assert!(matches!(
        registry.send("ghost", "hi", None).await.unwrap_err(),
        BridgeError::NotFound { .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn send_to_offline_worker_fails_without_arming_pending() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    registry.state().pending.clear_pending("alice");
    exec.set_offline("alice");

    let err = registry.send("alice", "hi", Some(42)).await.unwrap_err();
    assert!(matches!(err, BridgeError::Offline { .. }));
    assert!(!registry.state().pending.is_pending("alice"));
    assert!(exec.sent().is_empty());
    registry.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn reader_start_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    assert!(registry.relay().is_running("alice"));

    // Second start for the same worker is a no-op, not a second reader.
    registry.start_existing_readers();
    assert!(registry.relay().is_running("alice"));

    registry.end("alice").unwrap();
    assert!(!registry.relay().is_running("alice"));
}

#[tokio::test(flavor = "multi_thread")]
async fn pipe_line_is_forwarded_to_send() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, exec) = mock_registry(dir.path());

    registry.hire("alice", BackendKind::Exec, 10).await.unwrap();
    let pipe = dir.path().join("alice").join("inbox.pipe");

    // Writing the FIFO from "another worker" must land in alice's send.
    {
        let mut writer = std::fs::OpenOptions::new().write(true).open(&pipe).unwrap();
        writeln!(writer, "ping from bob").unwrap();
    }

    let mut delivered = false;
    for _ in 0..100 {
        if exec
            .sent()
            .contains(&("alice".to_string(), "ping from bob".to_string()))
        {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "relayed line never reached the worker send path");
    registry.shutdown();
}
