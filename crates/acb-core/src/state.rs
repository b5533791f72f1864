//! Node-level persisted state.
//!
//! The external worker processes are the durable state; this bridge
//! process is disposable. The one thing worth carrying across a bridge
//! restart is where the operator left off: the focused worker and the
//! last chat the bridge talked to. Written atomically (tmp + rename) so a
//! crash mid-write never leaves a torn file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const STATE_FILE: &str = "control.json";

/// Focus pointer and last-known chat, persisted under the state root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Name of the currently focused worker, if any.
    #[serde(default)]
    pub focused: Option<String>,
    /// Last chat id the bridge interacted with.
    #[serde(default)]
    pub last_chat_id: Option<i64>,
    /// When this file was last written.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeState {
    fn path(root: &Path) -> PathBuf {
        root.join(STATE_FILE)
    }

    /// Load persisted state, or defaults when missing or unreadable.
    ///
    /// A corrupt file is not fatal: the bridge re-learns focus from the
    /// next reconciliation pass.
    pub fn load(root: &Path) -> Self {
        let path = Self::path(root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("ignoring corrupt state file {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist state with a tmp-file + rename swap.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the write or rename fails.
    pub fn save(&mut self, root: &Path) -> std::io::Result<()> {
        self.updated_at = Some(Utc::now());
        std::fs::create_dir_all(root)?;
        let path = Self::path(root);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &path)
    }
}
