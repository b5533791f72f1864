//! Inbound message routing.
//!
//! Turns one operator message into an intent: a bridge command, a
//! worker-name shortcut, an `@name` one-off, an `@all` broadcast, a
//! reply-threaded route, or a plain message to the focused worker.
//!
//! Routing precedence, highest first: explicit `@name` mention,
//! reply-to-worker, reply-with-context, default-to-focus. Only the
//! shortcut and explicit focus commands move the focus pointer;
//! mentions and replies never do.

use crate::backend::{tmux, BackendKind};
use crate::registry::{WorkerInfo, WorkerRegistry};
use crate::transport::ChatTransport;
use agent_crew_bridge_core::{names, BridgeConfig, BridgeError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between "work in progress" signals while a send is pending.
const NOTIFY_INTERVAL_SECS: u64 = 4;

/// Reaction attached when the advisory accept poll sees the prompt clear.
const ACCEPTED_REACTION: &str = "👍";

/// Workload slash-commands that only make sense inside the worker's own
/// terminal. Answered with a pointer instead of being routed as text.
const BLOCKED_COMMANDS: &[&str] = &[
    "clear", "compact", "cost", "doctor", "init", "memory", "vim", "login", "logout",
    "terminal-setup",
];

const HELP_TEXT: &str = "\
I bridge this chat to your crew of terminal workers.

/hire <name> [exec] - start a new worker
/team - who's on the crew
/focus <name> - pick who plain messages go to
/progress - who's still working
/pause [name] - interrupt a worker
/relaunch [name] - restart a worker's process
/end <name> - dismiss a worker
/learn [topic] - ask for a Problem/Fix/Why note
/settings - bridge configuration

@name message - one-off message without changing focus
@all message - broadcast to every online worker
/<name> - shortcut: focus that worker";

/// An inbound operator message as delivered by the webhook.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
}

/// The message being replied to, if any.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReplyRef {
    pub message_id: i64,
    #[serde(default)]
    pub text: String,
    /// Whether the replied message was sent by the bridge itself.
    #[serde(default)]
    pub from_bridge: bool,
}

/// Extract the worker name a bridge-formatted reply refers to.
///
/// Bridge output is prefixed `name:` on its own first line; anything
/// else yields `None`.
pub fn reply_worker(replied: &str) -> Option<&str> {
    let first = replied.lines().next()?;
    let name = first.strip_suffix(':')?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return None;
    }
    Some(name)
}

/// Parses operator input and performs the serialized send.
pub struct CommandRouter {
    registry: Arc<WorkerRegistry>,
    transport: Arc<dyn ChatTransport>,
}

impl CommandRouter {
    pub fn new(registry: Arc<WorkerRegistry>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Handle one inbound message end to end. Never returns an error:
    /// every failure becomes a chat reply or a log line.
    pub async fn handle(&self, msg: InboundMessage) {
        let state = self.registry.state();
        if !state.is_admin(msg.chat_id) {
            debug!("ignoring message from non-operator chat {}", msg.chat_id);
            return;
        }
        state.note_chat(msg.chat_id);

        if state.first_contact() {
            let workers = self.registry.get_registered();
            let notice = match workers.len() {
                0 => "Bridge online. No workers yet - /hire one to get started.".to_string(),
                n => format!(
                    "Bridge online. {n} worker(s) on the crew: {}.",
                    workers.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            };
            self.say(msg.chat_id, &notice).await;
        }

        let text = msg.text.trim().to_string();
        if text.is_empty() {
            return;
        }

        if let Some(rest) = text.strip_prefix('/') {
            self.handle_command(&msg, rest).await;
            return;
        }

        if let Some(rest) = text.strip_prefix('@') {
            let (name, body) = match rest.split_once(char::is_whitespace) {
                Some((name, body)) => (name, body.trim()),
                None => (rest, ""),
            };
            if name.eq_ignore_ascii_case("all") {
                self.broadcast(&msg, body).await;
                return;
            }
            if body.is_empty() {
                self.say(msg.chat_id, &format!("What should I tell {name}?")).await;
                return;
            }
            // One-off: focus stays where it was.
            self.route(&msg, &names::normalize(name), body).await;
            return;
        }

        if let Some(reply) = &msg.reply_to {
            let workers = self.registry.get_registered();
            if let Some(name) = reply_worker(&reply.text) {
                if workers.contains_key(name) {
                    let name = name.to_string();
                    self.route(&msg, &name, &text).await;
                    return;
                }
            }
            if !reply.text.trim().is_empty() {
                // Not a worker message; carry the replied text forward
                // as context for the focused worker.
                let body = format!("Context:\n{}\n\n{}", reply.text.trim(), text);
                self.route_to_focus(&msg, &body).await;
                return;
            }
        }

        self.route_to_focus(&msg, &text).await;
    }

    async fn handle_command(&self, msg: &InboundMessage, rest: &str) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        let args = parts.next().unwrap_or_default().trim();

        match command.as_str() {
            "start" | "help" => self.say(msg.chat_id, HELP_TEXT).await,
            "hire" | "new" => self.cmd_hire(msg, args).await,
            "team" | "list" => self.cmd_team(msg).await,
            "focus" | "use" => self.cmd_focus(msg, args).await,
            "end" | "kill" => self.cmd_end(msg, args).await,
            "progress" | "status" => self.cmd_progress(msg).await,
            "pause" | "stop" => self.cmd_pause(msg, args).await,
            "relaunch" | "restart" => self.cmd_relaunch(msg, args).await,
            "settings" | "system" => self.cmd_settings(msg).await,
            "learn" => self.cmd_learn(msg, args).await,
            _ if BLOCKED_COMMANDS.contains(&command.as_str()) => {
                self.say(
                    msg.chat_id,
                    &format!("/{command} is an in-terminal command - not supported here."),
                )
                .await;
            }
            _ => self.cmd_shortcut(msg, &command, args).await,
        }
    }

    /// `/name [text]`: switch focus to an existing worker, optionally
    /// routing text in the same breath. Unknown names fall through to
    /// the unknown-command reply.
    async fn cmd_shortcut(&self, msg: &InboundMessage, command: &str, args: &str) {
        let name = names::normalize(command);
        let workers = self.registry.get_registered();
        if !workers.contains_key(&name) {
            self.say(
                msg.chat_id,
                &format!("Unknown command /{command}. Try /help."),
            )
            .await;
            return;
        }

        self.registry.state().set_focus(Some(&name));
        if args.is_empty() {
            self.say(msg.chat_id, &format!("Focused on {name}.")).await;
        } else {
            self.route(msg, &name, args).await;
        }
    }

    async fn cmd_hire(&self, msg: &InboundMessage, args: &str) {
        let mut parts = args.split_whitespace();
        let Some(raw_name) = parts.next() else {
            self.say(msg.chat_id, "Usage: /hire <name> [exec]").await;
            return;
        };
        let kind = match parts.next() {
            None => BackendKind::Interactive,
            Some(kind_arg) => match kind_arg.parse::<BackendKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    self.say(
                        msg.chat_id,
                        &format!("Unknown backend '{kind_arg}'. Use 'exec' or leave it off."),
                    )
                    .await;
                    return;
                }
            },
        };

        match self.registry.hire(raw_name, kind, msg.chat_id).await {
            Ok(name) => {
                let note = match kind {
                    BackendKind::Interactive => {
                        format!("{name} joined the crew and has focus. Give them a minute to boot.")
                    }
                    BackendKind::Exec => {
                        format!("{name} joined the crew (exec) and has focus.")
                    }
                };
                self.say(msg.chat_id, &note).await;
            }
            Err(e) => self.say(msg.chat_id, &e.user_message()).await,
        }
    }

    async fn cmd_team(&self, msg: &InboundMessage) {
        let workers = self.registry.get_registered();
        if workers.is_empty() {
            self.say(msg.chat_id, "No workers on the crew. /hire one.").await;
            return;
        }
        let focused = self.registry.state().focused();
        let mut lines = vec!["Your crew:".to_string()];
        for (name, info) in &workers {
            let online = self.registry.is_online(name).await;
            let mut line = format!(
                "• {name} ({}) - {}",
                info.kind,
                if online { "online" } else { "offline" }
            );
            if focused.as_deref() == Some(name) {
                line.push_str(" ← focus");
            }
            lines.push(line);
        }
        self.say(msg.chat_id, &lines.join("\n")).await;
    }

    async fn cmd_focus(&self, msg: &InboundMessage, args: &str) {
        if args.is_empty() {
            let reply = match self.registry.state().focused() {
                Some(name) => format!("Focused on {name}."),
                None => "No worker focused.".to_string(),
            };
            self.say(msg.chat_id, &reply).await;
            return;
        }
        let name = names::normalize(args);
        let workers = self.registry.get_registered();
        if !workers.contains_key(&name) {
            self.say(
                msg.chat_id,
                &BridgeError::NotFound { name }.user_message(),
            )
            .await;
            return;
        }
        self.registry.state().set_focus(Some(&name));
        self.say(msg.chat_id, &format!("Focused on {name}.")).await;
    }

    async fn cmd_end(&self, msg: &InboundMessage, args: &str) {
        if args.is_empty() {
            self.say(msg.chat_id, "Usage: /end <name>").await;
            return;
        }
        let name = names::normalize(args);
        match self.registry.end(&name) {
            Ok(()) => {
                let followup = match self.registry.state().focused() {
                    Some(next) => format!("{name} dismissed. Focus moved to {next}."),
                    None => format!("{name} dismissed. The crew is empty."),
                };
                self.say(msg.chat_id, &followup).await;
            }
            Err(e) => self.say(msg.chat_id, &e.user_message()).await,
        }
    }

    async fn cmd_progress(&self, msg: &InboundMessage) {
        let workers = self.registry.get_registered();
        let pending: Vec<&str> = workers
            .keys()
            .filter(|name| self.registry.state().pending.is_pending(name))
            .map(String::as_str)
            .collect();
        let reply = if pending.is_empty() {
            "Nobody is working on anything right now.".to_string()
        } else {
            format!("Still working: {}.", pending.join(", "))
        };
        self.say(msg.chat_id, &reply).await;
    }

    /// Interrupt a worker's current turn and stop the typing signal.
    async fn cmd_pause(&self, msg: &InboundMessage, args: &str) {
        let Some(name) = self.target_or_focus(msg, args).await else {
            return;
        };
        let workers = self.registry.get_registered();
        let Some(info) = workers.get(&name) else {
            self.say(msg.chat_id, &BridgeError::NotFound { name }.user_message())
                .await;
            return;
        };
        if info.kind == BackendKind::Interactive {
            tmux::send_escape(&info.address);
        }
        self.registry.state().pending.clear_pending(&name);
        self.say(msg.chat_id, &format!("Paused {name}.")).await;
    }

    async fn cmd_relaunch(&self, msg: &InboundMessage, args: &str) {
        let Some(name) = self.target_or_focus(msg, args).await else {
            return;
        };
        match self.registry.restart(&name).await {
            Ok(()) => self.say(msg.chat_id, &format!("Relaunched {name}.")).await,
            Err(e) => self.say(msg.chat_id, &e.user_message()).await,
        }
    }

    async fn cmd_settings(&self, msg: &InboundMessage) {
        let config: &BridgeConfig = self.registry.config();
        let reply = format!(
            "Bridge settings:\n\
             port: {}\n\
             state dir: {}\n\
             tmux prefix: {}\n\
             bridge url: {}\n\
             workload: {}\n\
             start cmd: {}\n\
             exec adapter: {}\n\
             chat api: {}\n\
             chat token: {}\n\
             operator chat: {}",
            config.port,
            config.state_dir.display(),
            config.tmux_prefix,
            config.effective_bridge_url(),
            config.workload,
            config.start_cmd,
            config.exec_adapter,
            config.chat_api_url.as_deref().unwrap_or("(not set)"),
            BridgeConfig::redact(&config.chat_token),
            self.registry
                .state()
                .admin()
                .map_or_else(|| "(learning)".to_string(), |id| id.to_string()),
        );
        self.say(msg.chat_id, &reply).await;
    }

    /// Ask the focused worker for a short retrospective note.
    async fn cmd_learn(&self, msg: &InboundMessage, args: &str) {
        let topic = if args.is_empty() {
            "the last problem you solved".to_string()
        } else {
            args.to_string()
        };
        let prompt = format!(
            "Write a short note about {topic} in three parts - Problem: what went \
             wrong, Fix: what resolved it, Why: the underlying cause - so the rest \
             of the crew can learn from it."
        );
        self.route_to_focus(msg, &prompt).await;
    }

    /// Resolve an explicit name argument, falling back to focus.
    async fn target_or_focus(&self, msg: &InboundMessage, args: &str) -> Option<String> {
        if !args.is_empty() {
            return Some(names::normalize(args));
        }
        match self.registry.state().focused() {
            Some(name) => Some(name),
            None => {
                self.say(msg.chat_id, "No worker focused. Name one, or /focus first.")
                    .await;
                None
            }
        }
    }

    async fn route_to_focus(&self, msg: &InboundMessage, text: &str) {
        match self.registry.state().focused() {
            Some(name) => self.route(msg, &name, text).await,
            None => {
                self.say(
                    msg.chat_id,
                    "No worker focused. /hire one or /focus <name> first.",
                )
                .await;
            }
        }
    }

    /// The routed-send sequence: deliver, keep the typing signal alive
    /// while pending, and acknowledge acceptance when observable.
    async fn route(&self, msg: &InboundMessage, name: &str, text: &str) {
        let workers = self.registry.get_registered();
        let info = workers.get(name).cloned();

        match self.registry.send(name, text, Some(msg.chat_id)).await {
            Ok(()) => {
                info!("routed {} chars to {name}", text.len());
                self.spawn_notifier(name.to_string(), msg.chat_id);
                if let Some(info) = info {
                    self.acknowledge(msg, &info).await;
                }
            }
            Err(e) => {
                warn!("route to {name} failed: {e}");
                self.say(msg.chat_id, &e.user_message()).await;
            }
        }
    }

    /// Advisory accept check. A negative result changes nothing: the
    /// send already happened and is never rolled back or retried.
    async fn acknowledge(&self, msg: &InboundMessage, info: &WorkerInfo) {
        if info.kind != BackendKind::Interactive {
            return;
        }
        if tmux::prompt_empty(&info.address).await {
            let _ = self
                .transport
                .set_reaction(msg.chat_id, msg.message_id, ACCEPTED_REACTION)
                .await;
        }
    }

    /// `@all`: deliver to every online worker; failures are reported but
    /// never abort the remaining deliveries. Focus is untouched.
    async fn broadcast(&self, msg: &InboundMessage, text: &str) {
        if text.is_empty() {
            self.say(msg.chat_id, "What should I broadcast?").await;
            return;
        }
        let workers: BTreeMap<String, WorkerInfo> = self.registry.get_registered();
        if workers.is_empty() {
            self.say(msg.chat_id, "No workers on the crew. /hire one.").await;
            return;
        }

        let mut delivered = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        for name in workers.keys() {
            if !self.registry.is_online(name).await {
                skipped.push(name.clone());
                continue;
            }
            match self.registry.send(name, text, Some(msg.chat_id)).await {
                Ok(()) => {
                    self.spawn_notifier(name.clone(), msg.chat_id);
                    delivered.push(name.clone());
                }
                Err(e) => {
                    warn!("broadcast to {name} failed: {e}");
                    failed.push(name.clone());
                }
            }
        }

        let mut parts = Vec::new();
        if !delivered.is_empty() {
            parts.push(format!("Sent to {}.", delivered.join(", ")));
        }
        if !skipped.is_empty() {
            parts.push(format!("Offline: {}.", skipped.join(", ")));
        }
        if !failed.is_empty() {
            parts.push(format!("Failed: {}.", failed.join(", ")));
        }
        self.say(msg.chat_id, &parts.join(" ")).await;
    }

    /// Signal "work in progress" every few seconds until the worker's
    /// pending marker clears or expires. A liveness hint, not a lock.
    fn spawn_notifier(&self, name: String, chat_id: i64) {
        let registry = self.registry.clone();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            while registry.state().pending.is_pending(&name) {
                transport.send_typing(chat_id).await;
                tokio::time::sleep(Duration::from_secs(NOTIFY_INTERVAL_SECS)).await;
            }
        });
    }

    async fn say(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.transport.send_text(chat_id, text).await {
            warn!("chat reply failed: {e}");
        }
    }
}
