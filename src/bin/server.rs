//! moderated-chat HTTP server binary.
//!
//! Serves one chat session over JSON endpoints for a browser front end.
//!
//! # Environment Variables
//!
//! - `CHAT_CONFIG` — Optional YAML config file
//! - `CHAT_CREDENTIALS` — Comma-separated base64 API keys (required)
//! - `CHAT_CONTEXT_URL` / `CHAT_CONTEXT_PATH` — Context document source
//! - `PORT` — HTTP port (default: 8080)
//! - `RUST_LOG` — Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! CHAT_CREDENTIALS=... cargo run --bin server
//! ```

use anyhow::Context;
use moderated_chat::config::ChatConfig;
use moderated_chat::server::{app_router, AppState};
use moderated_chat::session::ConversationSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,moderated_chat=debug".into()),
        )
        .init();

    let config = ChatConfig::load().context("invalid configuration")?;
    let conversation =
        ConversationSession::from_config(&config).context("failed to build chat session")?;
    let app = app_router(AppState::new(conversation));

    tracing::info!("moderated-chat server starting on {}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health     — liveness probe");
    tracing::info!("  POST /passkey    — unlock and load context");
    tracing::info!("  POST /messages   — send a message");
    tracing::info!("  GET  /feed       — poll display entries");

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
