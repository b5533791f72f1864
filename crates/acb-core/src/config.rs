//! Bridge configuration resolution.
//!
//! Env-first with an optional TOML file. The file supplies defaults; any
//! environment variable with an `ACB_` prefix wins over it. Nothing here
//! touches the network; secret values are only ever displayed redacted.

use crate::home;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default tmux session prefix used to recognize bridge-managed workers.
pub const DEFAULT_TMUX_PREFIX: &str = "crew-";

/// Default workload process name checked by the interactive liveness probe.
pub const DEFAULT_WORKLOAD: &str = "claude";

/// Default command that initializes a fresh interactive worker.
pub const DEFAULT_START_CMD: &str = "claude --dangerously-skip-permissions";

/// Default adapter executable for exec-mode workers.
pub const DEFAULT_EXEC_ADAPTER: &str = "acb-exec-adapter";

/// Optional TOML config file shape. All fields optional; env wins.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    state_dir: Option<PathBuf>,
    tmux_prefix: Option<String>,
    bridge_url: Option<String>,
    workload: Option<String>,
    start_cmd: Option<String>,
    exec_adapter: Option<String>,
    chat_api_url: Option<String>,
    chat_token: Option<String>,
    webhook_secret: Option<String>,
    admin_chat_id: Option<i64>,
}

/// Resolved bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// TCP port the control-channel listener binds.
    pub port: u16,
    /// State root; one subdirectory per worker.
    pub state_dir: PathBuf,
    /// tmux session prefix for worker isolation.
    pub tmux_prefix: String,
    /// Explicit bridge URL override for distributed setups.
    pub bridge_url: Option<String>,
    /// Process name the interactive liveness check looks for.
    pub workload: String,
    /// Command line that starts a fresh interactive worker.
    pub start_cmd: String,
    /// Adapter executable spawned per exec-mode message.
    pub exec_adapter: String,
    /// Chat API base URL; when unset, outbound chat calls are no-ops.
    pub chat_api_url: Option<String>,
    /// Chat API token. Never exported into worker sessions.
    pub chat_token: String,
    /// Optional inbound webhook shared secret.
    pub webhook_secret: Option<String>,
    /// Pre-set operator chat id; when unset the first sender is learned.
    pub admin_chat_id: Option<i64>,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl BridgeConfig {
    /// Resolve configuration from an optional file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if a numeric env var is malformed.
    pub fn resolve(config_path: Option<&Path>, home_dir: &Path) -> Result<Self> {
        let file: FileConfig = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let port = match env_var("ACB_PORT") {
            Some(v) => v.parse::<u16>().context("ACB_PORT is not a valid port")?,
            None => file.port.unwrap_or(8080),
        };

        let state_dir = env_var("ACB_STATE_DIR")
            .map(PathBuf::from)
            .or(file.state_dir)
            .unwrap_or_else(|| home::default_state_dir(home_dir));

        let admin_chat_id = match env_var("ACB_ADMIN_CHAT_ID") {
            Some(v) => Some(
                v.parse::<i64>()
                    .context("ACB_ADMIN_CHAT_ID is not a valid chat id")?,
            ),
            None => file.admin_chat_id,
        };

        Ok(Self {
            port,
            state_dir,
            tmux_prefix: env_var("ACB_TMUX_PREFIX")
                .or(file.tmux_prefix)
                .unwrap_or_else(|| DEFAULT_TMUX_PREFIX.to_string()),
            bridge_url: env_var("ACB_BRIDGE_URL")
                .or(file.bridge_url)
                .map(|u| u.trim_end_matches('/').to_string()),
            workload: env_var("ACB_WORKLOAD")
                .or(file.workload)
                .unwrap_or_else(|| DEFAULT_WORKLOAD.to_string()),
            start_cmd: env_var("ACB_START_CMD")
                .or(file.start_cmd)
                .unwrap_or_else(|| DEFAULT_START_CMD.to_string()),
            exec_adapter: env_var("ACB_EXEC_ADAPTER")
                .or(file.exec_adapter)
                .unwrap_or_else(|| DEFAULT_EXEC_ADAPTER.to_string()),
            chat_api_url: env_var("ACB_CHAT_API_URL")
                .or(file.chat_api_url)
                .map(|u| u.trim_end_matches('/').to_string()),
            chat_token: env_var("ACB_CHAT_TOKEN")
                .or(file.chat_token)
                .unwrap_or_default(),
            webhook_secret: env_var("ACB_WEBHOOK_SECRET").or(file.webhook_secret),
            admin_chat_id,
        })
    }

    /// URL worker hooks and adapters report back to.
    ///
    /// The explicit override wins; otherwise localhost on the bound port.
    pub fn effective_bridge_url(&self) -> String {
        self.bridge_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    /// Redact a secret for status output: keep 4 chars each end.
    pub fn redact(value: &str) -> String {
        if value.is_empty() {
            return "(not set)".to_string();
        }
        if value.len() <= 8 {
            return "***".to_string();
        }
        format!("{}...{}", &value[..4], &value[value.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_acb_env() {
        for key in [
            "ACB_PORT",
            "ACB_STATE_DIR",
            "ACB_TMUX_PREFIX",
            "ACB_BRIDGE_URL",
            "ACB_WORKLOAD",
            "ACB_START_CMD",
            "ACB_EXEC_ADAPTER",
            "ACB_CHAT_API_URL",
            "ACB_CHAT_TOKEN",
            "ACB_WEBHOOK_SECRET",
            "ACB_ADMIN_CHAT_ID",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn defaults_without_file_or_env() {
        clear_acb_env();
        let config = BridgeConfig::resolve(None, Path::new("/home/op")).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.tmux_prefix, "crew-");
        assert_eq!(config.workload, "claude");
        assert_eq!(config.state_dir, PathBuf::from("/home/op/.acb/workers"));
        assert_eq!(config.effective_bridge_url(), "http://localhost:8080");
        assert!(config.admin_chat_id.is_none());
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        clear_acb_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "port = 9000\ntmux_prefix = \"file-\"\n").unwrap();

        unsafe { std::env::set_var("ACB_TMUX_PREFIX", "env-") };
        let config = BridgeConfig::resolve(Some(&path), Path::new("/home/op")).unwrap();
        unsafe { std::env::remove_var("ACB_TMUX_PREFIX") };

        assert_eq!(config.port, 9000);
        assert_eq!(config.tmux_prefix, "env-");
    }

    #[test]
    #[serial]
    fn bridge_url_trailing_slash_normalized() {
        clear_acb_env();
        unsafe { std::env::set_var("ACB_BRIDGE_URL", "https://bridge.example.com/") };
        let config = BridgeConfig::resolve(None, Path::new("/home/op")).unwrap();
        unsafe { std::env::remove_var("ACB_BRIDGE_URL") };

        assert_eq!(
            config.effective_bridge_url(),
            "https://bridge.example.com"
        );
    }

    #[test]
    #[serial]
    fn bad_port_is_an_error() {
        clear_acb_env();
        unsafe { std::env::set_var("ACB_PORT", "not-a-port") };
        let result = BridgeConfig::resolve(None, Path::new("/home/op"));
        unsafe { std::env::remove_var("ACB_PORT") };
        assert!(result.is_err());
    }

    #[test]
    fn redaction() {
        assert_eq!(BridgeConfig::redact(""), "(not set)");
        assert_eq!(BridgeConfig::redact("short"), "***");
        assert_eq!(
            BridgeConfig::redact("1234567890abcdef"),
            "1234...cdef"
        );
    }
}
