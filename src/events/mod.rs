//! Session events for the UI and log-export collaborators.
//!
//! The core never touches display state. It emits [`SessionEvent`]s and
//! every registered [`SessionListener`] renders, records or forwards them
//! as it sees fit.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::moderation::Mode;

/// What a bot-authored display message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMessageKind {
    /// Context-ready confirmation.
    Confirmation,
    /// Mentor-mode reply (recorded into history).
    Reply,
    /// Roast-mode reply (not recorded).
    Roast,
    /// Fixed acknowledgment of an apology.
    Acknowledgment,
    /// Fixed precondition notice, e.g. "context still loading".
    Notice,
    /// Fixed failure text.
    Error,
}

/// Something the UI may want to show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    AccessGranted,
    AccessDenied { message: String },
    ContextLoading,
    ContextLoaded { suggestions: Vec<String> },
    ContextFailed { message: String },
    UserMessage { content: String },
    BotMessage {
        kind: BotMessageKind,
        /// Reply text as produced (Markdown).
        raw: String,
        /// Output of the renderer collaborator.
        markup: String,
    },
    ModeChanged { from: Mode, to: Mode, rude_count: u32 },
    GenerationStarted,
    GenerationFinished,
    Cancelled { message: String },
    Cleared,
}

/// Receives every event emitted by a session.
///
/// Called synchronously on the emitting task; implementations must not block.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Fan-out of events to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionListener>>>>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        log::trace!("session event: {:?}", event);
        // Snapshot so listeners may subscribe from inside a callback.
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            emitter.subscribe(Arc::new(move |e: &SessionEvent| seen.lock().push(e.clone())));
        }
        emitter.emit(SessionEvent::Cleared);
        assert_eq!(seen.lock().as_slice(), &[SessionEvent::Cleared, SessionEvent::Cleared]);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(SessionEvent::ModeChanged {
            from: Mode::Normal,
            to: Mode::Roast,
            rude_count: 4,
        })
        .unwrap();
        assert_eq!(json["type"], "mode_changed");
        assert_eq!(json["to"], "roast");
    }
}
