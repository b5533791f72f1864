//! Outbound chat transport.
//!
//! The bridge talks to the operator through whatever chat API is
//! configured; everything behind [`ChatTransport`] is replaceable. The
//! HTTP implementation speaks a bot-API dialect (JSON POST per method);
//! the mock records calls for tests.

use agent_crew_bridge_core::BridgeError;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

/// Outbound operations the bridge needs from a chat API.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a text message to a chat.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), BridgeError>;

    /// Deliver a file with an optional caption.
    async fn send_attachment(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), BridgeError>;

    /// Attach a reaction emoji to a message.
    async fn set_reaction(
        &self,
        chat_id: i64,
        message_id: i64,
        reaction: &str,
    ) -> Result<(), BridgeError>;

    /// Signal "work in progress" to a chat. Best-effort liveness hint.
    async fn send_typing(&self, chat_id: i64);
}

/// Bot-API transport over HTTP.
pub struct HttpChatTransport {
    client: reqwest::Client,
    base: String,
}

impl HttpChatTransport {
    /// `api_url` is the API root; the token becomes part of the path in
    /// the usual bot-API shape.
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), BridgeError> {
        let url = format!("{}/{method}", self.base);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::send_failed(format!("chat API {method}"), e))?;
        if !resp.status().is_success() {
            return Err(BridgeError::send_failed_msg(format!(
                "chat API {method} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), BridgeError> {
        self.call(
            "sendMessage",
            serde_json::json!({ "chat_id": chat_id, "text": text }),
        )
        .await
    }

    async fn send_attachment(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), BridgeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BridgeError::send_failed("could not read attachment", e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let url = format!("{}/sendDocument", self.base);
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::send_failed("chat API sendDocument", e))?;
        if !resp.status().is_success() {
            return Err(BridgeError::send_failed_msg(format!(
                "chat API sendDocument returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn set_reaction(
        &self,
        chat_id: i64,
        message_id: i64,
        reaction: &str,
    ) -> Result<(), BridgeError> {
        self.call(
            "setMessageReaction",
            serde_json::json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "reaction": [{ "type": "emoji", "emoji": reaction }],
            }),
        )
        .await
    }

    async fn send_typing(&self, chat_id: i64) {
        let result = self
            .call(
                "sendChatAction",
                serde_json::json!({ "chat_id": chat_id, "action": "typing" }),
            )
            .await;
        if let Err(e) = result {
            debug!("typing signal failed: {e}");
        }
    }
}

/// Transport used when no chat API is configured: logs and drops.
pub struct NullChatTransport;

#[async_trait]
impl ChatTransport for NullChatTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), BridgeError> {
        warn!("no chat API configured; dropping message to {chat_id}: {text}");
        Ok(())
    }

    async fn send_attachment(
        &self,
        chat_id: i64,
        path: &Path,
        _caption: Option<&str>,
    ) -> Result<(), BridgeError> {
        warn!(
            "no chat API configured; dropping attachment to {chat_id}: {}",
            path.display()
        );
        Ok(())
    }

    async fn set_reaction(&self, _: i64, _: i64, _: &str) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn send_typing(&self, _: i64) {}
}

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentItem {
    Text { chat_id: i64, text: String },
    Attachment { chat_id: i64, path: String },
    Reaction { chat_id: i64, message_id: i64, reaction: String },
    Typing { chat_id: i64 },
}

/// In-memory transport for tests.
#[derive(Default)]
pub struct MockChatTransport {
    sent: std::sync::Mutex<Vec<SentItem>>,
}

impl MockChatTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Text bodies only, in send order.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|item| match item {
                SentItem::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, item: SentItem) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(item);
    }
}

#[async_trait]
impl ChatTransport for MockChatTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), BridgeError> {
        self.record(SentItem::Text {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_attachment(
        &self,
        chat_id: i64,
        path: &Path,
        _caption: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.record(SentItem::Attachment {
            chat_id,
            path: path.to_string_lossy().into_owned(),
        });
        Ok(())
    }

    async fn set_reaction(
        &self,
        chat_id: i64,
        message_id: i64,
        reaction: &str,
    ) -> Result<(), BridgeError> {
        self.record(SentItem::Reaction {
            chat_id,
            message_id,
            reaction: reaction.to_string(),
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) {
        self.record(SentItem::Typing { chat_id });
    }
}
