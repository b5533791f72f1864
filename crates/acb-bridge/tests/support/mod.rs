//! Shared fixtures for the integration tests: a recording backend and a
//! registry wired to a tempdir state root.

#![allow(dead_code)]

use agent_crew_bridge::registry::{ControlPlaneState, WorkerRegistry};
use agent_crew_bridge::{Backend, BackendKind, SendContext};
use agent_crew_bridge_core::{BridgeConfig, BridgeError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Backend test double: records sends, with scriptable liveness and
/// per-worker failure injection.
pub struct MockBackend {
    kind: BackendKind,
    sent: Mutex<Vec<(String, String)>>,
    offline: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sent: Mutex::new(Vec::new()),
            offline: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_offline(&self, name: &str) {
        self.offline.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_sends_to(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn start_cmd(&self) -> Option<String> {
        None
    }

    async fn send(&self, ctx: &SendContext) -> Result<(), BridgeError> {
        if self.failing.lock().unwrap().contains(&ctx.worker) {
            return Err(BridgeError::send_failed_msg(format!(
                "injected failure for {}",
                ctx.worker
            )));
        }
        self.sent
            .lock()
            .unwrap()
            .push((ctx.worker.clone(), ctx.text.clone()));
        Ok(())
    }

    async fn is_online(&self, address: &str) -> bool {
        // Exec addresses embed the worker directory name.
        !self
            .offline
            .lock()
            .unwrap()
            .iter()
            .any(|name| address.contains(&format!("/{name}/")))
    }
}

/// Config pointed at a tempdir, with a tmux prefix no real session uses.
pub fn test_config(state_dir: &Path) -> BridgeConfig {
    BridgeConfig {
        port: 0,
        state_dir: state_dir.to_path_buf(),
        tmux_prefix: "acbtest-".to_string(),
        bridge_url: Some("http://127.0.0.1:9".to_string()),
        workload: "claude".to_string(),
        start_cmd: "claude --dangerously-skip-permissions".to_string(),
        exec_adapter: "true".to_string(),
        chat_api_url: None,
        chat_token: String::new(),
        webhook_secret: None,
        admin_chat_id: None,
    }
}

/// Registry whose backends are both the same recording mock.
pub fn mock_registry(state_dir: &Path) -> (Arc<WorkerRegistry>, Arc<MockBackend>) {
    mock_registry_from(test_config(state_dir))
}

/// Same as [`mock_registry`], but with a caller-tuned config.
pub fn mock_registry_from(config: BridgeConfig) -> (Arc<WorkerRegistry>, Arc<MockBackend>) {
    let state = Arc::new(ControlPlaneState::new(
        config.state_dir.clone(),
        config.admin_chat_id,
    ));
    let exec = MockBackend::new(BackendKind::Exec);
    let interactive = MockBackend::new(BackendKind::Interactive);
    let registry = WorkerRegistry::with_backends(config, state, interactive, exec.clone());
    (registry, exec)
}
