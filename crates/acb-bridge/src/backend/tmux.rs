//! Terminal-multiplexer session primitives.
//!
//! Thin wrappers over the `tmux` CLI. All text injection uses literal
//! mode (`-l`) so message content is never interpreted as key names or
//! shell input. Key presses (Enter, Escape) are sent as separate
//! non-literal calls.

use agent_crew_bridge_core::BridgeError;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between sending literal text and the Enter keypress. Sending
/// them back to back makes the terminal treat the pair as one event and
/// drop characters.
pub const TEXT_TO_ENTER_DELAY_MS: u64 = 500;

/// How long the advisory "did the prompt clear" poll runs before giving up.
pub const ACCEPT_POLL_TIMEOUT_MS: u64 = 500;

/// Interval between prompt polls.
pub const ACCEPT_POLL_INTERVAL_MS: u64 = 100;

fn run_tmux(args: &[&str]) -> Result<std::process::Output, BridgeError> {
    Command::new("tmux")
        .args(args)
        .output()
        .map_err(|e| BridgeError::send_failed(format!("tmux {} failed", args[0]), e))
}

/// Whether a tmux session with this exact name exists.
pub fn session_exists(session: &str) -> bool {
    Command::new("tmux")
        .args(["has-session", "-t", session])
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Create a detached session sized for a full-width agent UI.
///
/// # Errors
///
/// Returns [`BridgeError::SendFailed`] if tmux cannot be invoked or the
/// session cannot be created.
pub fn create_session(session: &str) -> Result<(), BridgeError> {
    let out = run_tmux(&[
        "new-session", "-d", "-s", session, "-x", "200", "-y", "50",
    ])?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(BridgeError::send_failed_msg(format!(
            "could not create session '{session}': {stderr}"
        )));
    }
    debug!("created tmux session {session}");
    Ok(())
}

/// Destroy a session. Missing session is not an error.
pub fn kill_session(session: &str) {
    if let Err(e) = run_tmux(&["kill-session", "-t", session]) {
        warn!("kill-session {session}: {e}");
    }
}

/// List all session names known to the tmux server.
///
/// An unreachable tmux server reads as "no sessions" — the registry
/// self-heals once the server is back.
pub fn list_sessions() -> Vec<String> {
    let Ok(out) = run_tmux(&["list-sessions", "-F", "#{session_name}"]) else {
        return Vec::new();
    };
    if !out.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Send literal text into a session. No Enter is sent.
pub fn send_literal(session: &str, text: &str) -> Result<(), BridgeError> {
    let out = run_tmux(&["send-keys", "-t", session, "-l", text])?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(BridgeError::send_failed_msg(format!(
            "send-keys to '{session}' failed: {stderr}"
        )));
    }
    Ok(())
}

/// Send a named key (Enter, Escape, a digit) as a key press.
pub fn send_key(session: &str, key: &str) -> Result<(), BridgeError> {
    let out = run_tmux(&["send-keys", "-t", session, key])?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(BridgeError::send_failed_msg(format!(
            "send-keys {key} to '{session}' failed: {stderr}"
        )));
    }
    Ok(())
}

/// Interrupt the worker's current turn.
pub fn send_escape(session: &str) {
    if let Err(e) = send_key(session, "Escape") {
        warn!("escape to {session}: {e}");
    }
}

/// The command currently running in the session's active pane.
pub fn pane_command(session: &str) -> Option<String> {
    let out = run_tmux(&[
        "display-message",
        "-t",
        session,
        "-p",
        "#{pane_current_command}",
    ])
    .ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Whether the workload process is alive inside the session.
///
/// Fast path: the pane's current command matches. Fallback: the workload
/// is a child of the pane process (shells wrapping the workload make
/// `pane_current_command` report the shell).
pub fn workload_running(session: &str, workload: &str) -> bool {
    if let Some(cmd) = pane_command(session) {
        if cmd.to_ascii_lowercase().contains(&workload.to_ascii_lowercase()) {
            return true;
        }
    }

    let Ok(out) = run_tmux(&["display-message", "-t", session, "-p", "#{pane_pid}"]) else {
        return false;
    };
    if !out.status.success() {
        return false;
    }
    let pane_pid = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if pane_pid.is_empty() {
        return false;
    }

    Command::new("pgrep")
        .args(["-P", &pane_pid, workload])
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Export a hook environment variable into the session.
///
/// `tmux set-environment` persists in the session, so hooks started later
/// (or after a worker restart) still see it.
pub fn set_env(session: &str, key: &str, value: &str) {
    if let Err(e) = run_tmux(&["set-environment", "-t", session, key, value]) {
        warn!("set-environment {key} in {session}: {e}");
    }
}

/// Remove a hook environment variable from the session.
pub fn unset_env(session: &str, key: &str) {
    let _ = run_tmux(&["set-environment", "-u", "-t", session, key]);
}

/// Poll the rendered pane until the input prompt reads empty.
///
/// An empty prompt line (`❯` followed by nothing) means the worker
/// accepted the injected text. The result is advisory telemetry only;
/// callers must not retry or roll back a send on `false`.
pub async fn prompt_empty(session: &str) -> bool {
    let deadline =
        std::time::Instant::now() + Duration::from_millis(ACCEPT_POLL_TIMEOUT_MS);
    loop {
        if let Ok(out) = run_tmux(&["capture-pane", "-t", session, "-p"]) {
            if out.status.success() {
                let pane = String::from_utf8_lossy(&out.stdout);
                if pane_has_empty_prompt(&pane) {
                    return true;
                }
            }
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(ACCEPT_POLL_INTERVAL_MS)).await;
    }
}

fn pane_has_empty_prompt(pane: &str) -> bool {
    pane.lines().any(|line| {
        let trimmed = line.trim_end();
        trimmed == "❯" || (trimmed.starts_with('❯') && trimmed[3..].trim().is_empty())
    })
}
