//! Chat sessions: the state model and the orchestrator driving it.

mod conversation;
mod state;

pub use conversation::{
    ConversationSession, ConversationSessionBuilder, SendRejected, SessionSnapshot, Turn,
    TurnOutcome, CANCELLED_TEXT, EMPTY_REPLY_TEXT,
};
pub use state::{ContextState, Message, Role, Session, SharedSession};
