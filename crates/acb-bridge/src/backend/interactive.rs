//! Interactive backend: a persistent worker in a tmux session.
//!
//! The worker process is long-lived and presumed ready whenever its host
//! session exists and the pane is running the workload process. Delivery
//! is keystroke injection: literal text, a settle delay, then Enter —
//! serialized per session so concurrent sends never interleave.

use super::tmux;
use super::{Backend, BackendKind, SendContext};
use agent_crew_bridge_core::BridgeError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Per-address send locks, created lazily.
///
/// The table itself sits behind a coarse lock held only for the
/// lookup/insert, never across the send. The per-address mutex
/// serializes the whole write-then-submit sequence.
#[derive(Debug, Default)]
pub struct SendLocks {
    table: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SendLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serialization lock for one address.
    pub fn lock_for(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Backend driving persistent tmux-hosted workers.
pub struct InteractiveBackend {
    workload: String,
    start_cmd: String,
    locks: Arc<SendLocks>,
}

impl InteractiveBackend {
    pub fn new(workload: String, start_cmd: String, locks: Arc<SendLocks>) -> Self {
        Self {
            workload,
            start_cmd,
            locks,
        }
    }

    /// Process name the liveness probe looks for.
    pub fn workload(&self) -> &str {
        &self.workload
    }
}

#[async_trait::async_trait]
impl Backend for InteractiveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Interactive
    }

    fn start_cmd(&self) -> Option<String> {
        Some(self.start_cmd.clone())
    }

    async fn send(&self, ctx: &SendContext) -> Result<(), BridgeError> {
        let lock = self.locks.lock_for(&ctx.address);
        let _guard = lock.lock().await;

        tmux::send_literal(&ctx.address, &ctx.text)?;
        // Text and Enter sent back to back read as one event and drop
        // characters; the settle delay is part of the protocol.
        tokio::time::sleep(Duration::from_millis(tmux::TEXT_TO_ENTER_DELAY_MS)).await;
        tmux::send_key(&ctx.address, "Enter")?;

        debug!("delivered to {} via session {}", ctx.worker, ctx.address);
        Ok(())
    }

    async fn is_online(&self, address: &str) -> bool {
        tmux::session_exists(address) && tmux::workload_running(address, &self.workload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_for_returns_same_lock_per_address() {
        let locks = SendLocks::new();
        let a1 = locks.lock_for("crew-alice");
        let a2 = locks.lock_for("crew-alice");
        let b = locks.lock_for("crew-bob");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test]
    async fn sends_to_same_address_serialize() {
        let locks = Arc::new(SendLocks::new());
        let lock = locks.lock_for("crew-alice");

        let guard = lock.lock().await;
        // A second acquisition must not succeed while the first is held.
        let second = locks.lock_for("crew-alice");
        assert!(second.try_lock().is_err());
        drop(guard);
        assert!(second.try_lock().is_ok());
    }

    #[test]
    fn start_cmd_exposed() {
        let backend = InteractiveBackend::new(
            "claude".to_string(),
            "claude --dangerously-skip-permissions".to_string(),
            Arc::new(SendLocks::new()),
        );
        assert_eq!(
            backend.start_cmd().as_deref(),
            Some("claude --dangerously-skip-permissions")
        );
        assert_eq!(backend.kind(), BackendKind::Interactive);
    }
}
