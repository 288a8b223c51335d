//! Axum route handlers for the chat server.
//!
//! # Routes
//!
//! - `GET  /health`           — Returns `{"status": "ok", "version": ...}`
//! - `POST /passkey`          — Unlocks the session and loads the context
//! - `POST /messages`         — Admits a turn and runs it in the background
//! - `POST /cancel`           — Stops the turn in flight
//! - `POST /clear`            — Empties the conversation
//! - `GET  /state`            — Session snapshot
//! - `GET  /feed?since=N`     — Display entries newer than `N`
//! - `GET  /transcript`       — Plain-text transcript download

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::feed::DisplayFeed;
use crate::errors::{ContextLoadError, UnlockError};
use crate::session::{ConversationSession, SendRejected, SessionSnapshot};
use crate::transcript::Transcript;

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    pub conversation: ConversationSession,
    pub feed: Arc<DisplayFeed>,
    pub transcript: Arc<Transcript>,
}

impl AppState {
    /// Wrap `conversation` and attach the feed and transcript listeners.
    pub fn new(conversation: ConversationSession) -> Self {
        let feed = Arc::new(DisplayFeed::new());
        let transcript = Arc::new(Transcript::new());
        conversation.subscribe(feed.clone());
        conversation.subscribe(transcript.clone());
        Self {
            conversation,
            feed,
            transcript,
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/passkey", post(passkey_handler))
        .route("/messages", post(message_handler))
        .route("/cancel", post(cancel_handler))
        .route("/clear", post(clear_handler))
        .route("/state", get(state_handler))
        .route("/feed", get(feed_handler))
        .route("/transcript", get(transcript_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "moderated-chat",
    }))
}

#[derive(Debug, Deserialize)]
struct PasskeyRequest {
    #[serde(default)]
    passkey: String,
}

/// POST /passkey — verify the passkey, then load the context document.
///
/// Returns the confirmation text and suggested questions once the context
/// is ready. A repeat submission after a successful load is a no-op. The load
/// runs on its own task and finishes even if the client disconnects.
async fn passkey_handler(
    State(state): State<AppState>,
    Json(request): Json<PasskeyRequest>,
) -> Result<Json<Value>, ApiError> {
    let conversation = state.conversation.clone();
    let unlock = tokio::spawn(async move { conversation.unlock(&request.passkey).await });
    let result = unlock.await.map_err(|e| {
        tracing::error!("unlock task failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "unlock failed")
    })?;
    match result {
        Ok(ready) => Ok(Json(json!({
            "status": "ready",
            "confirmation": ready.confirmation,
            "suggestions": ready.suggestions,
        }))),
        Err(UnlockError::Context(ContextLoadError::AlreadyLoaded)) => {
            Ok(Json(json!({ "status": "ready" })))
        }
        Err(UnlockError::Context(ContextLoadError::AlreadyLoading)) => {
            Ok(Json(json!({ "status": "loading" })))
        }
        Err(e @ UnlockError::Access(_)) => Err(api_error(StatusCode::UNAUTHORIZED, e.user_message())),
        Err(e) => {
            tracing::warn!("context load failed: {}", e);
            Err(api_error(StatusCode::BAD_GATEWAY, e.user_message()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    message: String,
}

/// POST /messages — admit a turn and run it in the background.
///
/// Admission is synchronous so rejections come back on this request. The
/// reply arrives through `/feed`.
async fn message_handler(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.conversation.begin(&request.message) {
        Ok(turn) => {
            tracing::debug!("turn admitted: {:?}", turn.message());
            tokio::spawn(turn.run());
            Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
        }
        Err(rejected) => {
            let status = match rejected {
                SendRejected::EmptyMessage => StatusCode::BAD_REQUEST,
                SendRejected::GenerationInFlight | SendRejected::ContextLoading => {
                    StatusCode::CONFLICT
                }
                SendRejected::AccessNotGranted => StatusCode::UNAUTHORIZED,
                SendRejected::ContextUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            };
            let message = rejected
                .user_message()
                .map(str::to_string)
                .unwrap_or_else(|| rejected.to_string());
            Err(api_error(status, message))
        }
    }
}

/// POST /cancel — stop the turn in flight (no-op when idle).
async fn cancel_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cancelled": state.conversation.cancel() }))
}

/// POST /clear — empty the conversation (no-op while generating).
async fn clear_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cleared": state.conversation.clear() }))
}

/// GET /state — flags, mode, rude count and history.
async fn state_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.conversation.snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct FeedQuery {
    #[serde(default)]
    since: u64,
}

/// GET /feed?since=N — display entries newer than `N`.
async fn feed_handler(State(state): State<AppState>, Query(query): Query<FeedQuery>) -> Json<Value> {
    Json(json!({
        "entries": state.feed.since(query.since),
        "latest": state.feed.latest(),
    }))
}

/// GET /transcript — plain-text transcript as a file download.
async fn transcript_handler(State(state): State<AppState>) -> impl IntoResponse {
    let disposition = format!("attachment; filename=\"{}\"", state.transcript.file_name());
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        state.transcript.export(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
