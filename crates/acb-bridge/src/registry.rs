//! Worker registry.
//!
//! The authoritative state lives outside this process: interactive
//! workers are tmux sessions matching the configured prefix, exec workers
//! are state directories carrying a backend marker and an inbox FIFO.
//! Every read re-derives the registry from that external state; the
//! in-memory view is never trusted across operations. Workers that
//! vanished are dropped, never invented.

use crate::backend::interactive::SendLocks;
use crate::backend::{tmux, Backend, BackendKind, ExecBackend, InteractiveBackend, SendContext};
use crate::relay::{self, PipeRelay};
use agent_crew_bridge_core::pending::{BACKEND_MARKER, PIPE_NAME, SESSION_ID_FILE};
use agent_crew_bridge_core::{names, BridgeConfig, BridgeError, NodeState, PendingTracker};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Wait after the start command before the first-run prompt appears.
const HANDSHAKE_WAIT_MS: u64 = 1500;

/// Settle time between the confirmation digit and Enter.
const HANDSHAKE_KEY_DELAY_MS: u64 = 300;

/// Menu choice accepting the interactive workload's first-run prompt.
const HANDSHAKE_CONFIRM_KEY: &str = "2";

/// One registered worker, as derived from external state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub name: String,
    pub kind: BackendKind,
    /// tmux session name, or FIFO path for exec workers.
    pub address: String,
}

/// Shared mutable control-plane state.
///
/// The focus pointer, the per-worker send-lock table, and the admin
/// identity are the only data touched from more than one task. Each sits
/// behind its own coarse lock, held for the lookup or mutation only,
/// never across a blocking external call.
pub struct ControlPlaneState {
    pub pending: PendingTracker,
    pub send_locks: Arc<SendLocks>,
    node: Mutex<NodeState>,
    state_root: PathBuf,
    admin_chat_id: Mutex<Option<i64>>,
    announced: AtomicBool,
}

impl ControlPlaneState {
    pub fn new(state_root: PathBuf, admin_chat_id: Option<i64>) -> Self {
        let node = NodeState::load(&state_root);
        Self {
            pending: PendingTracker::new(&state_root),
            send_locks: Arc::new(SendLocks::new()),
            node: Mutex::new(node),
            state_root,
            admin_chat_id: Mutex::new(admin_chat_id),
            announced: AtomicBool::new(false),
        }
    }

    pub fn state_root(&self) -> &std::path::Path {
        &self.state_root
    }

    /// Currently focused worker, if any.
    pub fn focused(&self) -> Option<String> {
        self.node
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .focused
            .clone()
    }

    /// Point focus at a worker (or clear it) and persist.
    pub fn set_focus(&self, name: Option<&str>) {
        let mut node = self.node.lock().unwrap_or_else(|e| e.into_inner());
        node.focused = name.map(str::to_string);
        if let Err(e) = node.save(&self.state_root) {
            warn!("could not persist focus: {e}");
        }
    }

    /// Last chat the bridge talked to, surviving restarts.
    pub fn last_chat_id(&self) -> Option<i64> {
        self.node
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_chat_id
    }

    /// Remember the chat a message came from.
    pub fn note_chat(&self, chat_id: i64) {
        let mut node = self.node.lock().unwrap_or_else(|e| e.into_inner());
        if node.last_chat_id == Some(chat_id) {
            return;
        }
        node.last_chat_id = Some(chat_id);
        if let Err(e) = node.save(&self.state_root) {
            warn!("could not persist chat id: {e}");
        }
    }

    /// Whether this chat is the operator.
    ///
    /// With no pre-set admin, the first sender becomes the operator;
    /// everyone else is silently rejected after that.
    pub fn is_admin(&self, chat_id: i64) -> bool {
        let mut admin = self.admin_chat_id.lock().unwrap_or_else(|e| e.into_inner());
        match *admin {
            Some(id) => id == chat_id,
            None => {
                info!("learned operator chat id {chat_id}");
                *admin = Some(chat_id);
                true
            }
        }
    }

    pub fn admin(&self) -> Option<i64> {
        *self.admin_chat_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True exactly once, on the first call. Drives the startup notice.
    pub fn first_contact(&self) -> bool {
        !self.announced.swap(true, Ordering::SeqCst)
    }

    /// Enforce the focus invariant against a fresh worker map: focus
    /// never points outside it. When it does, reassign to the first
    /// remaining worker, or clear when none remain.
    fn reconcile_focus(&self, workers: &BTreeMap<String, WorkerInfo>) {
        let mut node = self.node.lock().unwrap_or_else(|e| e.into_inner());
        let valid = node
            .focused
            .as_deref()
            .is_some_and(|name| workers.contains_key(name));
        if valid {
            return;
        }
        let replacement = workers.keys().next().cloned();
        if node.focused == replacement {
            return;
        }
        match &replacement {
            Some(name) => info!("focus moved to {name}"),
            None => info!("focus cleared, no workers left"),
        }
        node.focused = replacement;
        if let Err(e) = node.save(&self.state_root) {
            warn!("could not persist focus: {e}");
        }
    }
}

/// Worker lifecycle and delivery, reconciled against external state.
pub struct WorkerRegistry {
    config: BridgeConfig,
    state: Arc<ControlPlaneState>,
    interactive: Arc<dyn Backend>,
    exec: Arc<dyn Backend>,
    relay: PipeRelay,
}

impl WorkerRegistry {
    /// Build a registry with the real backends.
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let state = Arc::new(ControlPlaneState::new(
            config.state_dir.clone(),
            config.admin_chat_id,
        ));
        let interactive = Arc::new(InteractiveBackend::new(
            config.workload.clone(),
            config.start_cmd.clone(),
            state.send_locks.clone(),
        ));
        let exec = Arc::new(ExecBackend::new(config.exec_adapter.clone()));
        Self::with_backends(config, state, interactive, exec)
    }

    /// Build a registry with injected backends.
    pub fn with_backends(
        config: BridgeConfig,
        state: Arc<ControlPlaneState>,
        interactive: Arc<dyn Backend>,
        exec: Arc<dyn Backend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state,
            interactive,
            exec,
            relay: PipeRelay::new(),
        })
    }

    pub fn state(&self) -> &Arc<ControlPlaneState> {
        &self.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn relay(&self) -> &PipeRelay {
        &self.relay
    }

    fn backend_for(&self, kind: BackendKind) -> &Arc<dyn Backend> {
        match kind {
            BackendKind::Interactive => &self.interactive,
            BackendKind::Exec => &self.exec,
        }
    }

    /// tmux session name hosting an interactive worker.
    pub fn session_name(&self, name: &str) -> String {
        format!("{}{name}", self.config.tmux_prefix)
    }

    fn pipe_path(&self, name: &str) -> PathBuf {
        self.state.pending.worker_dir(name).join(PIPE_NAME)
    }

    /// Enumerate workers from external state.
    ///
    /// Interactive workers come from the tmux session list filtered by
    /// prefix; exec workers from state directories carrying both the
    /// backend marker and the inbox FIFO (partial hire leftovers with
    /// only one artifact are treated as absent). Interactive wins a name
    /// collision.
    pub fn scan(&self) -> BTreeMap<String, WorkerInfo> {
        let mut workers = BTreeMap::new();

        if let Ok(entries) = std::fs::read_dir(self.state.pending.root()) {
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                if !dir.join(BACKEND_MARKER).exists() || !dir.join(PIPE_NAME).exists() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let address = dir.join(PIPE_NAME).to_string_lossy().into_owned();
                workers.insert(
                    name.clone(),
                    WorkerInfo {
                        name,
                        kind: BackendKind::Exec,
                        address,
                    },
                );
            }
        }

        for session in tmux::list_sessions() {
            let Some(name) = session.strip_prefix(&self.config.tmux_prefix) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            workers.insert(
                name.to_string(),
                WorkerInfo {
                    name: name.to_string(),
                    kind: BackendKind::Interactive,
                    address: session.clone(),
                },
            );
        }

        workers
    }

    /// Fresh worker map with the focus invariant enforced.
    pub fn get_registered(&self) -> BTreeMap<String, WorkerInfo> {
        let workers = self.scan();
        self.state.reconcile_focus(&workers);
        workers
    }

    /// All workers, sorted by name.
    pub fn list(&self) -> Vec<WorkerInfo> {
        self.get_registered().into_values().collect()
    }

    /// Hire a new worker and focus it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Invalid`] for a bad name, [`BridgeError::AlreadyExists`]
    /// on a name collision, [`BridgeError::SendFailed`] when the session or
    /// pipe cannot be created.
    pub async fn hire(
        self: &Arc<Self>,
        raw_name: &str,
        kind: BackendKind,
        chat_id: i64,
    ) -> Result<String, BridgeError> {
        let name = names::validate(raw_name).map_err(|message| BridgeError::Invalid { message })?;
        if self.scan().contains_key(&name) {
            return Err(BridgeError::AlreadyExists { name });
        }

        match kind {
            BackendKind::Interactive => {
                let session = self.session_name(&name);
                if tmux::session_exists(&session) {
                    return Err(BridgeError::AlreadyExists { name });
                }
                tmux::create_session(&session)?;
                self.state
                    .pending
                    .ensure_worker_dir(&name)
                    .map_err(|e| BridgeError::send_failed("could not create state dir", e))?;
                self.state.pending.record_chat(&name, chat_id);
                self.launch_workload(&session).await?;
            }
            BackendKind::Exec => {
                // A crashed earlier hire may have left partial state.
                self.state.pending.remove_worker(&name);
                let dir = self
                    .state
                    .pending
                    .ensure_worker_dir(&name)
                    .map_err(|e| BridgeError::send_failed("could not create state dir", e))?;
                std::fs::write(dir.join(BACKEND_MARKER), "exec")
                    .map_err(|e| BridgeError::send_failed("could not write backend marker", e))?;
                let pipe = self.pipe_path(&name);
                relay::create_pipe(&pipe)
                    .map_err(|e| BridgeError::send_failed("could not create inbox pipe", e))?;
                // Pre-arm pending so the very first reply routes even if
                // it lands before the first message goes out.
                self.state.pending.set_pending(&name, chat_id);
                self.relay.start_reader(&name, &pipe, Arc::downgrade(self));
            }
        }

        self.state.set_focus(Some(&name));
        self.state.note_chat(chat_id);
        info!("hired {name} ({kind})");
        Ok(name)
    }

    /// End a worker: tear down its session or pipe, delete its state,
    /// and move focus off it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] when the worker does not exist.
    pub fn end(&self, name: &str) -> Result<(), BridgeError> {
        let workers = self.get_registered();
        let info = workers.get(name).ok_or_else(|| BridgeError::NotFound {
            name: name.to_string(),
        })?;

        match info.kind {
            BackendKind::Interactive => tmux::kill_session(&info.address),
            BackendKind::Exec => self.relay.stop_reader(name),
        }
        self.state.pending.remove_worker(name);

        if self.state.focused().as_deref() == Some(name) {
            self.state.set_focus(None);
        }
        // Reassigns focus to a survivor, or leaves it cleared.
        self.get_registered();
        info!("ended {name}");
        Ok(())
    }

    /// Restart a worker's inner process.
    ///
    /// Exec workers are stateless: drop the saved continuation id and
    /// recreate the pipe. Interactive workers keep their session; only
    /// the workload respawns, and never while it is still alive.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`], [`BridgeError::AlreadyRunning`], or
    /// [`BridgeError::SendFailed`] from the relaunch.
    pub async fn restart(self: &Arc<Self>, name: &str) -> Result<(), BridgeError> {
        let workers = self.get_registered();
        let info = workers.get(name).ok_or_else(|| BridgeError::NotFound {
            name: name.to_string(),
        })?;

        match info.kind {
            BackendKind::Exec => {
                let dir = self.state.pending.worker_dir(name);
                let _ = std::fs::remove_file(dir.join(SESSION_ID_FILE));
                self.relay.stop_reader(name);
                let pipe = self.pipe_path(name);
                relay::create_pipe(&pipe)
                    .map_err(|e| BridgeError::send_failed("could not recreate inbox pipe", e))?;
                self.relay.start_reader(name, &pipe, Arc::downgrade(self));
                self.state.pending.clear_pending(name);
                info!("reset exec worker {name}");
                Ok(())
            }
            BackendKind::Interactive => {
                if self.interactive.is_online(&info.address).await {
                    return Err(BridgeError::AlreadyRunning {
                        name: name.to_string(),
                    });
                }
                self.launch_workload(&info.address).await?;
                info!("relaunched {name}");
                Ok(())
            }
        }
    }

    /// Deliver a message to a worker.
    ///
    /// When `chat_id` is given, pending is armed before delivery so the
    /// reply can be routed even if it arrives before this call returns.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`], [`BridgeError::Offline`], or the
    /// backend's [`BridgeError::SendFailed`]. Never retried here; retry
    /// is an explicit operator action.
    pub async fn send(
        &self,
        name: &str,
        text: &str,
        chat_id: Option<i64>,
    ) -> Result<(), BridgeError> {
        let workers = self.get_registered();
        let info = workers.get(name).ok_or_else(|| BridgeError::NotFound {
            name: name.to_string(),
        })?;
        let backend = self.backend_for(info.kind);

        if !backend.is_online(&info.address).await {
            return Err(BridgeError::Offline {
                name: name.to_string(),
            });
        }
        if let Some(id) = chat_id {
            self.state.pending.set_pending(name, id);
        }

        let ctx = SendContext {
            worker: name.to_string(),
            address: info.address.clone(),
            text: text.to_string(),
            bridge_url: self.config.effective_bridge_url(),
            state_dir: self.state.pending.root().to_path_buf(),
        };
        backend.send(&ctx).await
    }

    /// Whether a worker is ready to receive.
    pub async fn is_online(&self, name: &str) -> bool {
        let workers = self.get_registered();
        let Some(info) = workers.get(name) else {
            return false;
        };
        self.backend_for(info.kind).is_online(&info.address).await
    }

    /// Start pipe readers for every exec worker found on disk.
    ///
    /// Called once at startup so workers hired by a previous bridge
    /// process keep receiving relayed messages.
    pub fn start_existing_readers(self: &Arc<Self>) {
        for info in self.scan().values() {
            if info.kind == BackendKind::Exec {
                self.relay
                    .start_reader(&info.name, &self.pipe_path(&info.name), Arc::downgrade(self));
            }
        }
    }

    /// Stop all pipe readers. Called on shutdown.
    pub fn shutdown(&self) {
        self.relay.stop_all();
    }

    /// Export addressing into the session, run the start command, and
    /// answer the workload's first-run prompt.
    async fn launch_workload(&self, session: &str) -> Result<(), BridgeError> {
        self.export_hook_env(session);

        let Some(start_cmd) = self.interactive.start_cmd() else {
            return Ok(());
        };
        tmux::send_literal(session, &start_cmd)?;
        tokio::time::sleep(Duration::from_millis(tmux::TEXT_TO_ENTER_DELAY_MS)).await;
        tmux::send_key(session, "Enter")?;

        // First run shows an interactive confirmation menu.
        tokio::time::sleep(Duration::from_millis(HANDSHAKE_WAIT_MS)).await;
        tmux::send_key(session, HANDSHAKE_CONFIRM_KEY)?;
        tokio::time::sleep(Duration::from_millis(HANDSHAKE_KEY_DELAY_MS)).await;
        tmux::send_key(session, "Enter")?;
        Ok(())
    }

    /// Hook scripts inside the session need the bridge's address and the
    /// state root. The chat token is deliberately not exported.
    fn export_hook_env(&self, session: &str) {
        tmux::set_env(session, "ACB_BRIDGE_URL", &self.config.effective_bridge_url());
        tmux::set_env(
            session,
            "ACB_STATE_DIR",
            &self.state.pending.root().to_string_lossy(),
        );
        tmux::set_env(session, "ACB_PORT", &self.config.port.to_string());
        tmux::set_env(session, "ACB_TMUX_PREFIX", &self.config.tmux_prefix);
    }
}
