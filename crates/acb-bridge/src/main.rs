//! acb-bridge - chat control plane for a crew of terminal agent workers

use agent_crew_bridge::registry::WorkerRegistry;
use agent_crew_bridge::router::CommandRouter;
use agent_crew_bridge::server::{self, AppState};
use agent_crew_bridge::transport::{ChatTransport, HttpChatTransport, NullChatTransport};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Chat control plane for a crew of terminal agent workers
#[derive(Parser, Debug)]
#[command(name = "acb-bridge")]
#[command(about = "Chat control plane for a crew of terminal agent workers")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port for the control listener (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        unsafe { std::env::set_var("ACB_LOG", "debug") };
    }
    agent_crew_bridge_core::logging::init();

    info!("acb-bridge starting...");

    let home_dir =
        agent_crew_bridge_core::home::get_home_dir().context("Failed to determine home directory")?;

    let mut config =
        agent_crew_bridge_core::config::BridgeConfig::resolve(args.config.as_deref(), &home_dir)
            .context("Failed to resolve configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    // Startup-fatal: without the state root nothing else can run.
    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!("Failed to create state root {}", config.state_dir.display())
    })?;
    info!("State root: {}", config.state_dir.display());

    let transport: Arc<dyn ChatTransport> = match &config.chat_api_url {
        Some(api_url) if !config.chat_token.is_empty() => {
            Arc::new(HttpChatTransport::new(api_url, &config.chat_token))
        }
        _ => {
            warn!("No chat API configured; outbound messages will be dropped");
            Arc::new(NullChatTransport)
        }
    };

    let port = config.port;
    let registry = WorkerRegistry::new(config);
    registry.start_existing_readers();

    let router = Arc::new(CommandRouter::new(registry.clone(), transport.clone()));
    let state = AppState {
        registry: registry.clone(),
        transport: transport.clone(),
        router,
    };

    let cancel_token = CancellationToken::new();
    let cancel_for_signals = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to create SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received SIGINT (Ctrl+C)");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C");
        }

        cancel_for_signals.cancel();
    });

    server::serve(state, port, cancel_token)
        .await
        .context("Control listener failed")?;

    // Graceful teardown: tell the operator, stop the pipe readers.
    for chat_id in registry.state().pending.all_chat_ids() {
        if let Err(e) = transport
            .send_text(chat_id, "Bridge shutting down. Workers keep running.")
            .await
        {
            warn!("shutdown notice to {chat_id} failed: {e}");
        }
    }
    registry.shutdown();

    info!("acb-bridge shutdown complete");
    Ok(())
}
