//! HTTP control endpoints.
//!
//! The listener is the bridge's only inbound surface:
//!
//! - `POST /webhook`  — operator messages from the chat service
//! - `POST /response` — worker output from hook scripts and adapters;
//!   this is the sole path by which worker output reaches the chat
//! - `POST /notify`   — system notifications fanned out to all known chats
//! - `GET  /workers`  — discovery: how to message each worker directly
//! - `GET  /`         — identity banner
//!
//! Handlers never let an error escape: anything unexpected is logged and
//! answered with a generic failure so the process keeps running.

use crate::registry::WorkerRegistry;
use crate::router::{CommandRouter, InboundMessage};
use crate::transport::ChatTransport;
use crate::BackendKind;
use agent_crew_bridge_core::text::{format_response, split_message, CHAT_MAX_LENGTH};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    pub transport: Arc<dyn ChatTransport>,
    pub router: Arc<CommandRouter>,
}

/// Build the control-plane router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/response", post(worker_response))
        .route("/notify", post(notify))
        .route("/workers", get(list_workers))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Bind the listener and serve until the token is cancelled.
///
/// # Errors
///
/// Returns an error when the port cannot be bound; this is one of the
/// few startup-fatal conditions.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("control listener on port {port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn banner() -> &'static str {
    concat!("agent-crew-bridge ", env!("CARGO_PKG_VERSION"), "\n")
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    worker: String,
    text: String,
}

/// Worker output callback. Clears the worker's pending marker, resolves
/// the destination chat from disk, and relays the text in prefixed,
/// length-limited chunks.
async fn worker_response(
    State(state): State<AppState>,
    Json(body): Json<WorkerResponse>,
) -> (StatusCode, Json<Value>) {
    let pending = &state.registry.state().pending;
    pending.clear_pending(&body.worker);

    let Some(chat_id) = pending.chat_id(&body.worker) else {
        warn!("response from {} but no chat id on disk", body.worker);
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": "no chat recorded for worker" })),
        );
    };

    let text = body.text.trim();
    if text.is_empty() {
        return (StatusCode::OK, Json(json!({ "ok": true })));
    }

    let formatted = format_response(&body.worker, text);
    for chunk in split_message(&formatted, CHAT_MAX_LENGTH) {
        if let Err(e) = state.transport.send_text(chat_id, &chunk).await {
            warn!("relaying response from {} failed: {e}", body.worker);
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "error": "chat delivery failed" })),
            );
        }
    }
    info!("relayed {} chars from {}", text.len(), body.worker);
    (StatusCode::OK, Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct Notification {
    text: String,
}

/// Fan a system notification out to every chat the bridge has talked to.
async fn notify(
    State(state): State<AppState>,
    Json(body): Json<Notification>,
) -> (StatusCode, Json<Value>) {
    let chat_ids = state.registry.state().pending.all_chat_ids();
    if chat_ids.is_empty() {
        return (
            StatusCode::OK,
            Json(json!({ "ok": true, "delivered": 0 })),
        );
    }
    let mut delivered = 0;
    for chat_id in chat_ids {
        match state.transport.send_text(chat_id, &body.text).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!("notify to {chat_id} failed: {e}"),
        }
    }
    (
        StatusCode::OK,
        Json(json!({ "ok": true, "delivered": delivered })),
    )
}

/// Discovery endpoint: lets one worker learn how to message another
/// without shared memory.
async fn list_workers(State(state): State<AppState>) -> Json<Value> {
    let workers: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|info| {
            let (protocol, send_example) = match info.kind {
                BackendKind::Interactive => (
                    "terminal",
                    format!("tmux send-keys -t {} -l 'message'", info.address),
                ),
                BackendKind::Exec => ("pipe", format!("echo 'message' > {}", info.address)),
            };
            json!({
                "name": info.name,
                "protocol": protocol,
                "address": info.address,
                "send_example": send_example,
            })
        })
        .collect();
    Json(json!({ "workers": workers }))
}

/// Inbound operator messages. The shared secret, when configured, must
/// match; everything else is handed to the command router on its own
/// task so slow sends never block the webhook reply.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(msg): Json<InboundMessage>,
) -> StatusCode {
    if let Some(expected) = &state.registry.config().webhook_secret {
        let presented = headers
            .get("x-webhook-secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != expected.as_str() {
            warn!("webhook rejected: bad secret");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let router = state.router.clone();
    tokio::spawn(async move {
        router.handle(msg).await;
    });
    StatusCode::OK
}
