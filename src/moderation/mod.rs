//! Conversation moderation.
//!
//! A classifier scores each user message, an apology detector looks for
//! contrition, and the state machine turns both into a mode and a verdict
//! for the turn.

pub mod apology;
pub mod classifier;
pub mod state_machine;

pub use apology::{ApologyDetector, ApologyStrategy, KeywordApologyDetector, ModelApologyDetector};
pub use classifier::{parse_score, RudenessClassifier, DEFAULT_CLASSIFIER_TIMEOUT};
pub use state_machine::{
    Mode, ModerationPolicy, ModerationState, ModerationStateMachine, Transition, TurnSignals,
    Verdict, APOLOGY_ACKNOWLEDGMENT,
};
