//! # moderated-chat
//!
//! A passkey-gated chat assistant grounded in a single context document,
//! with a rudeness moderation state machine in front of the Gemini
//! `generateContent` API.
//!
//! The pieces, in the order a session uses them:
//!
//! - [`access`]: passkey digest check and per-session credential draw
//! - [`context`]: fetch, decode and install the context document
//! - [`moderation`]: rudeness classifier, apology detection, Normal/Roast modes
//! - [`session`]: history, the in-flight flag, cancellation, and the
//!   [`ConversationSession`] orchestrator
//! - [`events`], [`render`], [`transcript`]: what the UI layer consumes
//! - [`server`]: axum adapter used by the `server` binary

pub mod access;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod llms;
pub mod moderation;
pub mod render;
pub mod server;
pub mod session;
pub mod transcript;
pub mod utilities;

pub use access::{AccessGate, Credential, CredentialPool};
pub use config::ChatConfig;
pub use context::{ContextLoader, ContextReady};
pub use errors::{AccessError, ClassificationError, ContextLoadError, GenerationError};
pub use events::{SessionEvent, SessionListener};
pub use llms::{GeminiClient, GenerativeModel};
pub use moderation::{Mode, ModerationStateMachine, RudenessClassifier};
pub use session::{ConversationSession, SendRejected, Session, TurnOutcome};
pub use transcript::Transcript;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
