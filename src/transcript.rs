//! Conversation log export.
//!
//! [`Transcript`] listens to session events and keeps an append-only plain
//! text log for the user to download. It is derived from events only and the
//! core never reads it back.

use std::path::Path;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::events::{BotMessageKind, SessionEvent, SessionListener};

#[derive(Debug, Clone)]
struct Line {
    at: DateTime<Local>,
    speaker: &'static str,
    text: String,
}

/// Append-only plain-text transcript.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Mutex<Vec<Line>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, speaker: &'static str, text: impl Into<String>) {
        self.lines.lock().push(Line {
            at: Local::now(),
            speaker,
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Whole transcript as text, one `[time] Speaker: text` entry per line.
    pub fn export(&self) -> String {
        let lines = self.lines.lock();
        let mut out = String::new();
        for line in lines.iter() {
            out.push_str(&format!(
                "[{}] {}: {}\n",
                line.at.format("%Y-%m-%d %H:%M:%S"),
                line.speaker,
                line.text
            ));
        }
        out
    }

    /// Suggested download name, e.g. `conversation-20240501-142233.txt`.
    pub fn file_name(&self) -> String {
        format!("conversation-{}.txt", Local::now().format("%Y%m%d-%H%M%S"))
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.export())
    }
}

impl SessionListener for Transcript {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::UserMessage { content } => self.push("User", content.clone()),
            SessionEvent::BotMessage { kind, raw, .. } => {
                let speaker = match kind {
                    BotMessageKind::Notice | BotMessageKind::Error => "System",
                    _ => "Bot",
                };
                self.push(speaker, raw.clone());
            }
            SessionEvent::ModeChanged { from, to, .. } => {
                self.push("System", format!("mode {} -> {}", from.as_str(), to.as_str()))
            }
            SessionEvent::AccessGranted => self.push("System", "passkey accepted"),
            SessionEvent::ContextFailed { message } => self.push("System", message.clone()),
            SessionEvent::Cancelled { message } => self.push("System", message.clone()),
            SessionEvent::Cleared => self.push("System", "conversation cleared"),
            SessionEvent::AccessDenied { .. }
            | SessionEvent::ContextLoading
            | SessionEvent::ContextLoaded { .. }
            | SessionEvent::GenerationStarted
            | SessionEvent::GenerationFinished => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::Mode;

    #[test]
    fn test_records_conversation_lines() {
        let t = Transcript::new();
        t.on_event(&SessionEvent::UserMessage {
            content: "hello".into(),
        });
        t.on_event(&SessionEvent::GenerationStarted);
        t.on_event(&SessionEvent::BotMessage {
            kind: BotMessageKind::Reply,
            raw: "hi there".into(),
            markup: "hi there".into(),
        });
        t.on_event(&SessionEvent::ModeChanged {
            from: Mode::Normal,
            to: Mode::Roast,
            rude_count: 4,
        });
        assert_eq!(t.len(), 3);
        let text = t.export();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("] User: hello"));
        assert!(lines[1].ends_with("] Bot: hi there"));
        assert!(lines[2].ends_with("] System: mode normal -> roast"));
    }

    #[test]
    fn test_write_to_file() {
        let t = Transcript::new();
        t.on_event(&SessionEvent::Cleared);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(t.file_name());
        t.write_to(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("System: conversation cleared"));
    }
}
