//! Display feed for polling clients.
//!
//! A [`SessionListener`] that turns session events into numbered chat-window
//! entries. Clients poll `GET /feed?since=N` and append what they get.

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::{BotMessageKind, SessionEvent, SessionListener};
use crate::render::{HtmlEscapeRenderer, Renderer};

/// Who an entry is displayed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    /// Out-of-band notices such as "cleared" or "cancelled".
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub seq: u64,
    pub sender: Sender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<BotMessageKind>,
    /// Display-ready HTML.
    pub markup: String,
}

#[derive(Debug, Default)]
struct FeedInner {
    next_seq: u64,
    entries: Vec<FeedEntry>,
}

/// Ordered display entries derived from session events.
#[derive(Debug, Default)]
pub struct DisplayFeed {
    inner: Mutex<FeedInner>,
}

impl DisplayFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, sender: Sender, kind: Option<BotMessageKind>, markup: String) {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.entries.push(FeedEntry {
            seq,
            sender,
            kind,
            markup,
        });
    }

    /// Entries with `seq > since`, oldest first.
    pub fn since(&self, since: u64) -> Vec<FeedEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }

    /// Sequence number of the newest entry (0 when empty).
    pub fn latest(&self) -> u64 {
        self.inner.lock().next_seq
    }
}

impl SessionListener for DisplayFeed {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::UserMessage { content } => {
                self.push(Sender::User, None, HtmlEscapeRenderer.render(content))
            }
            SessionEvent::BotMessage { kind, markup, .. } => {
                self.push(Sender::Bot, Some(*kind), markup.clone())
            }
            SessionEvent::AccessDenied { message } | SessionEvent::ContextFailed { message } => self
                .push(
                    Sender::Bot,
                    Some(BotMessageKind::Error),
                    HtmlEscapeRenderer.render(message),
                ),
            SessionEvent::Cancelled { message } => {
                self.push(Sender::System, None, HtmlEscapeRenderer.render(message))
            }
            SessionEvent::Cleared => {
                // Sequence numbers keep growing so pollers notice the reset.
                self.inner.lock().entries.clear();
                self.push(Sender::System, None, "cleared".to_string());
            }
            SessionEvent::AccessGranted
            | SessionEvent::ContextLoading
            | SessionEvent::ContextLoaded { .. }
            | SessionEvent::ModeChanged { .. }
            | SessionEvent::GenerationStarted
            | SessionEvent::GenerationFinished => {}
        }
    }
}
