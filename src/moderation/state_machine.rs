//! Rudeness moderation state machine.
//!
//! Two modes, `Normal` and `Roast`. Every admitted user message feeds one
//! [`TurnSignals`] into [`ModerationStateMachine::transition`], which is the
//! only code that mutates a [`ModerationState`]. Rules, in order:
//!
//! 1. score above `rude_score_threshold` increments `rude_count`;
//! 2. an apology while in `Roast` resets the count, returns to `Normal`, and
//!    the turn is answered with a fixed acknowledgment instead of the model;
//! 3. otherwise a count above `rude_count_threshold` puts the session in
//!    `Roast` (a level check on the accumulated count, not an edge);
//! 4. otherwise the mode is unchanged.

use serde::{Deserialize, Serialize};

/// Fixed reply for an accepted apology.
pub const APOLOGY_ACKNOWLEDGMENT: &str =
    "Apology Noted. Responsibility acknowledged—let’s refocus on science. What’s your next step?";

/// Persona currently answering the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Roast,
}

impl Mode {
    /// Whether replies produced in this mode are recorded into history.
    ///
    /// Roast replies are ephemeral and never reach future prompts.
    pub fn records_reply(&self) -> bool {
        matches!(self, Self::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Roast => "roast",
        }
    }
}

/// Thresholds of the moderation policy. Both comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationPolicy {
    /// A message counts as rude when its score is strictly greater.
    pub rude_score_threshold: u8,
    /// Roast mode starts once the rude count is strictly greater.
    pub rude_count_threshold: u32,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            rude_score_threshold: 5,
            rude_count_threshold: 3,
        }
    }
}

/// Rude-message counter and current mode of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModerationState {
    rude_count: u32,
    mode: Mode,
}

impl ModerationState {
    pub fn rude_count(&self) -> u32 {
        self.rude_count
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

/// Classifier outputs for one user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSignals {
    /// Rudeness score in `0..=10`; 0 also means "classifier unavailable".
    pub rudeness: u8,
    pub apology: bool,
}

/// How the current turn is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Long-form mentor persona; reply recorded into history.
    Mentor,
    /// Short roast persona; reply not recorded.
    Roast,
    /// Apology accepted; answer with [`APOLOGY_ACKNOWLEDGMENT`], no model call.
    Acknowledge,
}

impl Verdict {
    pub fn calls_model(&self) -> bool {
        !matches!(self, Self::Acknowledge)
    }

    pub fn records_reply(&self) -> bool {
        matches!(self, Self::Mentor)
    }
}

/// Result of one [`ModerationStateMachine::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
    /// Whether this message incremented the rude count.
    pub counted: bool,
    pub rude_count: u32,
    pub verdict: Verdict,
}

impl Transition {
    pub fn mode_changed(&self) -> bool {
        self.from != self.to
    }
}

/// Applies [`ModerationPolicy`] to a [`ModerationState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModerationStateMachine {
    policy: ModerationPolicy,
}

impl ModerationStateMachine {
    pub fn new(policy: ModerationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ModerationPolicy {
        &self.policy
    }

    /// Advance `state` by one user message.
    pub fn transition(&self, state: &mut ModerationState, signals: TurnSignals) -> Transition {
        let from = state.mode;

        let counted = signals.rudeness > self.policy.rude_score_threshold;
        if counted {
            state.rude_count = state.rude_count.saturating_add(1);
        }

        let verdict = if signals.apology && state.mode == Mode::Roast {
            state.rude_count = 0;
            state.mode = Mode::Normal;
            Verdict::Acknowledge
        } else {
            if state.rude_count > self.policy.rude_count_threshold {
                state.mode = Mode::Roast;
            }
            match state.mode {
                Mode::Normal => Verdict::Mentor,
                Mode::Roast => Verdict::Roast,
            }
        };

        if from != state.mode {
            log::info!(
                "moderation mode {} -> {} (rude_count={})",
                from.as_str(),
                state.mode.as_str(),
                state.rude_count
            );
        }

        Transition {
            from,
            to: state.mode,
            counted,
            rude_count: state.rude_count,
            verdict,
        }
    }
}
