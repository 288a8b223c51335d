//! HTTP adapter for one chat session.
//!
//! The server owns a single [`ConversationSession`](crate::session::ConversationSession)
//! and exposes its operations as JSON endpoints. Display entries are
//! collected by [`DisplayFeed`] and polled by the browser.
//!
//! # Endpoints
//!
//! - `GET  /health`     — Liveness probe
//! - `POST /passkey`    — Unlock and load context
//! - `POST /messages`   — Send a message
//! - `POST /cancel`, `POST /clear`
//! - `GET  /state`, `GET /feed`, `GET /transcript`

pub mod feed;
pub mod routes;

pub use feed::{DisplayFeed, FeedEntry, Sender};
pub use routes::{app_router, AppState};
