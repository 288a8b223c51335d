//! Renderer collaborator.
//!
//! Turns raw reply text into something safe to display. The core hands the
//! output straight to the UI and never inspects it.

use std::fmt;

/// Raw reply text in, display-safe markup out.
pub trait Renderer: Send + Sync + fmt::Debug {
    fn render(&self, raw: &str) -> String;
}

/// Leaves text untouched. For terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl Renderer for PlainTextRenderer {
    fn render(&self, raw: &str) -> String {
        raw.to_string()
    }
}

/// HTML-escapes the text and turns line breaks into `<br>`.
///
/// Markdown is left for the browser to format.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEscapeRenderer;

impl Renderer for HtmlEscapeRenderer {
    fn render(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + raw.len() / 8);
        for ch in raw.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                '\n' => out.push_str("<br>"),
                '\r' => {}
                c => out.push(c),
            }
        }
        out
    }
}
