//! Exec backend: no persistent process, one adapter spawn per message.
//!
//! The adapter receives the worker name, the message, the bridge URL, and
//! the state root as positional arguments, runs the workload to
//! completion on its own schedule, and posts the result back over HTTP.
//! The bridge's part ends when the spawn succeeds.

use super::{Backend, BackendKind, SendContext};
use agent_crew_bridge_core::BridgeError;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};
use uuid::Uuid;

/// Backend driving one-shot adapter subprocesses.
pub struct ExecBackend {
    adapter: String,
}

impl ExecBackend {
    pub fn new(adapter: String) -> Self {
        Self { adapter }
    }

    /// Adapter command invoked per message.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }
}

#[async_trait::async_trait]
impl Backend for ExecBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Exec
    }

    fn start_cmd(&self) -> Option<String> {
        None
    }

    async fn send(&self, ctx: &SendContext) -> Result<(), BridgeError> {
        let delivery_id = Uuid::new_v4();
        debug!(
            "spawning adapter {} for {} (delivery {delivery_id})",
            self.adapter, ctx.worker
        );

        // Detached from this request: no inherited stdio, no foreground
        // wait. The adapter reports through the bridge URL, not through
        // its exit status.
        let mut child = Command::new(&self.adapter)
            .arg(&ctx.worker)
            .arg(&ctx.text)
            .arg(&ctx.bridge_url)
            .arg(&ctx.state_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BridgeError::send_failed(
                    format!("could not launch adapter '{}'", self.adapter),
                    e,
                )
            })?;

        info!(
            "adapter pid {} handling delivery {delivery_id} for {}",
            child.id(),
            ctx.worker
        );
        // Still our child until waited on; reap it off the request path
        // so finished adapters never pile up in the process table.
        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    async fn is_online(&self, address: &str) -> bool {
        // An exec worker's address is its inbox FIFO; the worker is
        // reachable exactly while that pipe exists.
        Path::new(address).exists()
    }
}
