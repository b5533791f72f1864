//! Worker backend protocol.
//!
//! A backend defines how to start, message, and health-check one kind of
//! worker. All behavioral difference between worker kinds lives behind
//! this trait; the registry and router never branch on kind except to
//! select the backend instance.

pub mod exec;
pub mod interactive;
pub mod tmux;

use agent_crew_bridge_core::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use exec::ExecBackend;
pub use interactive::InteractiveBackend;

/// Worker backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Persistent terminal-multiplexed process addressed via a tmux
    /// session that accepts simulated keystrokes.
    Interactive,
    /// No persistent process; each message spawns a one-shot adapter
    /// that reports its result asynchronously.
    Exec,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" | "terminal" => Ok(Self::Interactive),
            "exec" => Ok(Self::Exec),
            other => Err(format!("unknown backend kind '{other}'")),
        }
    }
}

/// Everything a backend needs to deliver one message.
#[derive(Debug, Clone)]
pub struct SendContext {
    /// Worker name (state-directory key).
    pub worker: String,
    /// Backend address: tmux session name, or FIFO path for exec workers.
    pub address: String,
    /// Message text to deliver.
    pub text: String,
    /// URL adapters and hooks report results back to.
    pub bridge_url: String,
    /// State root holding per-worker directories.
    pub state_dir: PathBuf,
}

/// Protocol every worker backend implements.
///
/// Intentionally minimal: three operations. Adding a worker kind means
/// adding one implementation, not branching logic in callers.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Which kind this backend drives.
    fn kind(&self) -> BackendKind;

    /// Command line that initializes a fresh interactive worker.
    ///
    /// `None` for backends with no persistent process to start.
    fn start_cmd(&self) -> Option<String>;

    /// Deliver one message to the worker.
    ///
    /// Interactive backends serialize concurrent sends to the same
    /// address internally; exec backends return as soon as the adapter
    /// spawn succeeds and the adapter reports out-of-band.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SendFailed`] when delivery could not be
    /// attempted. Delivery is never retried here; retry is an explicit
    /// operator action.
    async fn send(&self, ctx: &SendContext) -> Result<(), BridgeError>;

    /// Whether the worker behind `address` is ready to receive.
    async fn is_online(&self, address: &str) -> bool;
}
