//! Bridge error taxonomy.
//!
//! Every error a registry or router operation can produce is user-correctable
//! and carries a suggestion; nothing here is meant to escape a single
//! inbound-message handler as a panic. Expired pending markers are not an
//! error at all — they self-heal on read.

/// Errors surfaced by registry and router operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The named worker does not exist in the freshly scanned registry.
    #[error("worker '{name}' not found")]
    NotFound { name: String },

    /// The worker is registered but its backend reports not-ready.
    #[error("worker '{name}' is offline")]
    Offline { name: String },

    /// Hire collision: the name is already taken.
    #[error("worker '{name}' already exists")]
    AlreadyExists { name: String },

    /// Restart collision: the workload process is still running.
    #[error("worker '{name}' is already running")]
    AlreadyRunning { name: String },

    /// A backend delivery call failed. Never retried automatically.
    #[error("send failed: {message}")]
    SendFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A bounded poll gave up. Non-fatal; the send is assumed delivered.
    #[error("timed out: {message}")]
    Timeout { message: String },

    /// Invalid operator input (bad worker name, bad usage).
    #[error("{message}")]
    Invalid { message: String },
}

impl BridgeError {
    /// Wrap an I/O or subprocess failure as a send failure.
    pub fn send_failed<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::SendFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A send failure with no underlying source error.
    pub fn send_failed_msg(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
            source: None,
        }
    }

    /// The operator-facing reply for this error, with a next-step hint.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { name } => {
                format!("Can't find {name}. Check /team for who's available.")
            }
            Self::Offline { name } => {
                format!("{name} is offline. Try /relaunch.")
            }
            Self::AlreadyExists { name } => {
                format!("Worker '{name}' already exists. Choose another name.")
            }
            Self::AlreadyRunning { name } => {
                format!("{name} is already running.")
            }
            Self::SendFailed { message, .. } => {
                format!("Could not send: {message}. Try /relaunch.")
            }
            Self::Timeout { message } => format!("Gave up waiting: {message}"),
            Self::Invalid { message } => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_suggests_team() {
        let err = BridgeError::NotFound {
            name: "alice".to_string(),
        };
        assert!(err.user_message().contains("/team"));
    }

    #[test]
    fn offline_suggests_relaunch() {
        let err = BridgeError::Offline {
            name: "bob".to_string(),
        };
        assert!(err.user_message().contains("/relaunch"));
    }

    #[test]
    fn send_failed_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = BridgeError::send_failed("tmux send-keys", io);
        assert!(err.to_string().contains("tmux send-keys"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
