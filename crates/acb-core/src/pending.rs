//! On-disk per-worker state: pending markers and reply-routing chat ids.
//!
//! Layout under the state root, one directory per worker:
//!
//! ```text
//! <root>/<name>/pending      unix timestamp, written when a request goes out
//! <root>/<name>/chat_id      chat to deliver this worker's replies to
//! <root>/<name>/backend      marker naming the backend kind (exec workers)
//! <root>/<name>/session_id   adapter continuation state (exec workers)
//! <root>/<name>/inbox.pipe   FIFO for worker-to-worker messages (exec workers)
//! ```
//!
//! Pending markers are time-based, not signal-based: any reader that finds
//! a marker older than [`PENDING_TIMEOUT_SECS`] deletes it and reports
//! not-pending. No sweeper thread is needed.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Pending markers self-expire after this many seconds (10 minutes).
pub const PENDING_TIMEOUT_SECS: u64 = 600;

/// File name of the exec-backend marker inside a worker directory.
pub const BACKEND_MARKER: &str = "backend";

/// File name of the per-worker FIFO.
pub const PIPE_NAME: &str = "inbox.pipe";

/// File name of the adapter continuation-state file.
pub const SESSION_ID_FILE: &str = "session_id";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(unix)]
fn restrict_file(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) {}

#[cfg(unix)]
fn restrict_dir(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) {}

/// Tracker over the per-worker state directories.
#[derive(Debug, Clone)]
pub struct PendingTracker {
    root: PathBuf,
}

impl PendingTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The state root this tracker operates on.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one worker's state files.
    pub fn worker_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create a worker's state directory with restricted permissions.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be created.
    pub fn ensure_worker_dir(&self, name: &str) -> std::io::Result<PathBuf> {
        let dir = self.worker_dir(name);
        std::fs::create_dir_all(&dir)?;
        restrict_dir(&self.root);
        restrict_dir(&dir);
        Ok(dir)
    }

    fn pending_file(&self, name: &str) -> PathBuf {
        self.worker_dir(name).join("pending")
    }

    fn chat_id_file(&self, name: &str) -> PathBuf {
        self.worker_dir(name).join("chat_id")
    }

    /// Record where a worker's replies should go, without arming pending.
    pub fn record_chat(&self, name: &str, chat_id: i64) {
        let Ok(dir) = self.ensure_worker_dir(name) else {
            warn!("could not create state dir for worker {name}");
            return;
        };
        let chat = dir.join("chat_id");
        if std::fs::write(&chat, chat_id.to_string()).is_ok() {
            restrict_file(&chat);
        }
    }

    /// Mark a worker as having an outstanding request from `chat_id`.
    ///
    /// Writes both the timestamped marker and the chat id, so a reply
    /// arriving at any later point can be routed even if this process
    /// restarted in between.
    pub fn set_pending(&self, name: &str, chat_id: i64) {
        let Ok(dir) = self.ensure_worker_dir(name) else {
            warn!("could not create state dir for worker {name}");
            return;
        };
        let pending = dir.join("pending");
        if std::fs::write(&pending, now_secs().to_string()).is_ok() {
            restrict_file(&pending);
        }
        self.record_chat(name, chat_id);
    }

    /// Clear a worker's pending marker. Missing marker is fine.
    pub fn clear_pending(&self, name: &str) {
        let pending = self.pending_file(name);
        if pending.exists() {
            let _ = std::fs::remove_file(&pending);
        }
    }

    /// Whether the worker has a live (unexpired) pending marker.
    ///
    /// Markers older than [`PENDING_TIMEOUT_SECS`] are deleted on read
    /// and reported as not pending.
    pub fn is_pending(&self, name: &str) -> bool {
        let pending = self.pending_file(name);
        let Ok(raw) = std::fs::read_to_string(&pending) else {
            return false;
        };
        let Ok(ts) = raw.trim().parse::<u64>() else {
            // Unparseable marker: treat as stale and drop it.
            let _ = std::fs::remove_file(&pending);
            return false;
        };
        if now_secs().saturating_sub(ts) > PENDING_TIMEOUT_SECS {
            debug!("pending marker for {name} expired, clearing");
            let _ = std::fs::remove_file(&pending);
            return false;
        }
        true
    }

    /// Chat id replies from this worker should be delivered to.
    pub fn chat_id(&self, name: &str) -> Option<i64> {
        let raw = std::fs::read_to_string(self.chat_id_file(name)).ok()?;
        raw.trim().parse::<i64>().ok()
    }

    /// All distinct chat ids recorded across worker directories.
    pub fn all_chat_ids(&self) -> Vec<i64> {
        let mut ids = std::collections::BTreeSet::new();
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                if let Ok(raw) = std::fs::read_to_string(entry.path().join("chat_id")) {
                    if let Ok(id) = raw.trim().parse::<i64>() {
                        ids.insert(id);
                    }
                }
            }
        }
        ids.into_iter().collect()
    }

    /// Remove every state file for a worker, including its directory.
    pub fn remove_worker(&self, name: &str) {
        let dir = self.worker_dir(name);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("failed to remove state dir for {name}: {e}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_pending(&self, name: &str, age_secs: u64) {
        let ts = now_secs().saturating_sub(age_secs);
        std::fs::write(self.pending_file(name), ts.to_string()).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker() -> (TempDir, PendingTracker) {
        let dir = TempDir::new().unwrap();
        let tracker = PendingTracker::new(dir.path());
        (dir, tracker)
    }

    #[test]
    fn set_then_is_pending() {
        let (_dir, t) = tracker();
        assert!(!t.is_pending("alice"));
        t.set_pending("alice", 42);
        assert!(t.is_pending("alice"));
        assert_eq!(t.chat_id("alice"), Some(42));
    }

    #[test]
    fn record_chat_does_not_arm_pending() {
        let (_dir, t) = tracker();
        t.record_chat("alice", 42);
        assert!(!t.is_pending("alice"));
        assert_eq!(t.chat_id("alice"), Some(42));
    }

    #[test]
    fn clear_pending_keeps_chat_id() {
        let (_dir, t) = tracker();
        t.set_pending("alice", 42);
        t.clear_pending("alice");
        assert!(!t.is_pending("alice"));
        // chat_id survives so late replies still route
        assert_eq!(t.chat_id("alice"), Some(42));
    }

    #[test]
    fn stale_marker_self_heals() {
        let (_dir, t) = tracker();
        t.set_pending("alice", 42);
        t.backdate_pending("alice", PENDING_TIMEOUT_SECS + 1);
        assert!(!t.is_pending("alice"));
        // marker file is gone after the expired read
        assert!(!t.worker_dir("alice").join("pending").exists());
    }

    #[test]
    fn marker_just_inside_window_still_pending() {
        let (_dir, t) = tracker();
        t.set_pending("alice", 42);
        t.backdate_pending("alice", PENDING_TIMEOUT_SECS - 5);
        assert!(t.is_pending("alice"));
    }

    #[test]
    fn garbage_marker_dropped() {
        let (_dir, t) = tracker();
        t.ensure_worker_dir("alice").unwrap();
        std::fs::write(t.worker_dir("alice").join("pending"), "not-a-number").unwrap();
        assert!(!t.is_pending("alice"));
        assert!(!t.worker_dir("alice").join("pending").exists());
    }

    #[test]
    fn all_chat_ids_deduplicates() {
        let (_dir, t) = tracker();
        t.set_pending("alice", 7);
        t.set_pending("bob", 7);
        t.set_pending("carol", 9);
        assert_eq!(t.all_chat_ids(), vec![7, 9]);
    }

    #[test]
    fn remove_worker_clears_everything() {
        let (_dir, t) = tracker();
        t.set_pending("alice", 42);
        t.remove_worker("alice");
        assert!(!t.worker_dir("alice").exists());
        assert!(!t.is_pending("alice"));
    }

    #[cfg(unix)]
    #[test]
    fn pending_file_permissions_restricted() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, t) = tracker();
        t.set_pending("alice", 42);
        let mode = std::fs::metadata(t.worker_dir("alice").join("pending"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
