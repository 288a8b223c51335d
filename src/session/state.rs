//! Session data model.
//!
//! One [`Session`] exists per chat window. Components receive it explicitly
//! (or through [`SharedSession`]) instead of reading ambient globals, so
//! independent sessions never interfere with each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::AbortHandle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Credential;
use crate::moderation::ModerationState;

/// Session behind a lock, shared between the turn in flight and the caller
/// that may cancel it. Guards are never held across an `.await`.
pub type SharedSession = Arc<Mutex<Session>>;

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Speaker label used in prompts and transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One history entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Where the context document stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContextState {
    /// Nothing attempted yet.
    #[default]
    Unloaded,
    Loading,
    Loaded(Arc<str>),
    /// The last load attempt failed. Only a manual reload retries.
    Unavailable,
}

impl ContextState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded(_) => "loaded",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    abort: AbortHandle,
}

/// All mutable state of one chat session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    credential: Option<Credential>,
    context: ContextState,
    history: Vec<Message>,
    moderation: ModerationState,
    in_flight: Option<InFlight>,
    next_turn_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            credential: None,
            context: ContextState::Unloaded,
            history: Vec::new(),
            moderation: ModerationState::default(),
            in_flight: None,
            next_turn_id: 1,
        }
    }

    /// Wrap in the lock used by [`ConversationSession`](super::ConversationSession).
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    // ---- access ----

    pub fn access_granted(&self) -> bool {
        self.credential.is_some()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub(crate) fn grant(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    // ---- context ----

    pub fn context(&self) -> &ContextState {
        &self.context
    }

    pub fn context_loading(&self) -> bool {
        matches!(self.context, ContextState::Loading)
    }

    /// Decoded context text, if loaded.
    pub fn context_text(&self) -> Option<Arc<str>> {
        match &self.context {
            ContextState::Loaded(text) => Some(Arc::clone(text)),
            _ => None,
        }
    }

    pub(crate) fn set_context(&mut self, context: ContextState) {
        self.context = context;
    }

    // ---- history ----

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.history.push(message);
    }

    // ---- moderation ----

    pub fn moderation(&self) -> &ModerationState {
        &self.moderation
    }

    pub(crate) fn moderation_mut(&mut self) -> &mut ModerationState {
        &mut self.moderation
    }

    // ---- generation ----

    pub fn generation_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Mark a turn as in flight. Returns `None` when one already is.
    pub(crate) fn claim_generation(&mut self, abort: AbortHandle) -> Option<u64> {
        if self.in_flight.is_some() {
            return None;
        }
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        self.in_flight = Some(InFlight { id, abort });
        Some(id)
    }

    /// Whether turn `id` still holds the flag (i.e. was not cancelled).
    pub(crate) fn holds_generation(&self, id: u64) -> bool {
        matches!(&self.in_flight, Some(current) if current.id == id)
    }

    /// Release the flag if turn `id` still holds it.
    ///
    /// Returns `false` when the turn was cancelled in the meantime, in which
    /// case its output must be discarded.
    pub(crate) fn release_generation(&mut self, id: u64) -> bool {
        match &self.in_flight {
            Some(current) if current.id == id => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Clear the flag and abort whatever holds it.
    pub(crate) fn abort_generation(&mut self) -> bool {
        match self.in_flight.take() {
            Some(current) => {
                current.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Empty history and start a fresh moderation state.
    pub(crate) fn reset_conversation(&mut self) {
        self.history.clear();
        self.moderation = ModerationState::default();
    }
}
