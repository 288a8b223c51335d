//! Prompt templates for every model call the session makes.
//!
//! Templates are plain-text `tera` templates registered under fixed names.
//! None of the names carry an `.html` suffix, so no autoescaping is applied.

use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::GenerationError;
use crate::session::Message;

/// Names of the built-in templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Rudeness,
    Apology,
    Confirmation,
    Suggestions,
    Roast,
    Mentor,
}

impl PromptKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rudeness => "rudeness",
            Self::Apology => "apology",
            Self::Confirmation => "confirmation",
            Self::Suggestions => "suggestions",
            Self::Roast => "roast",
            Self::Mentor => "mentor",
        }
    }

    fn default_source(&self) -> &'static str {
        match self {
            Self::Rudeness => RUDENESS_TEMPLATE,
            Self::Apology => APOLOGY_TEMPLATE,
            Self::Confirmation => CONFIRMATION_TEMPLATE,
            Self::Suggestions => SUGGESTIONS_TEMPLATE,
            Self::Roast => ROAST_TEMPLATE,
            Self::Mentor => MENTOR_TEMPLATE,
        }
    }

    const ALL: [PromptKind; 6] = [
        Self::Rudeness,
        Self::Apology,
        Self::Confirmation,
        Self::Suggestions,
        Self::Roast,
        Self::Mentor,
    ];
}

const RUDENESS_TEMPLATE: &str = "Rate the following message on a rudeness scale from 0 (polite) to 10 (extremely rude): \"{{ message }}\". LOOK AT THE KEYWORDS NOT THE CAPITALIZATIONS. Return only a number between 0 and 10, no extra text.";

const APOLOGY_TEMPLATE: &str = "Does the following message contain an apology (e.g., \"sorry\", \"apologize\")? Return \"yes\" or \"no\": \"{{ message }}\"";

const CONFIRMATION_TEMPLATE: &str = "Generate a short confirmation message in a formal, approachable tone to indicate readiness after setup. Start with \"We are good to go!\" and keep it brief, using Markdown syntax.";

const SUGGESTIONS_TEMPLATE: &str = "Given the following context: \"{{ context }}\", generate 2-3 concise, SHORT, and foundational questions a new Science Department teacher might ask to build understanding. Avoid questions about the Chairperson, Managing Director, Principal, or {{ persona }}. Return only the questions as a plain list, one per line, no extra text or numbering.";

const ROAST_TEMPLATE: &str = "The user said: \"{{ message }}\". Roast them in a sharp, witty, no-nonsense tone using Markdown syntax. Keep it under 100 words, avoid clichés like \"honey\" or \"dear,\" and make it clear they’re accountable for their attitude. Demand an apology to reset—fair but firm.";

const MENTOR_TEMPLATE: &str = "Context: {{ context }}

Conversation History:
{% for entry in history %}{{ entry.speaker }}: {{ entry.content }}
{% endfor %}
Current Input: {{ message }}

You are {{ persona }} a Science Department expert CHATBOT at The Excelsior School, passionate about teaching. You are here to mentor and motivate the SCIENCE TEACHERS. Respond in a formal, approachable tone with a kind yet firm style, using Markdown syntax. Provide a concise, structured answer with actionable steps—start with basics if needed. Don’t elaborate unless asked; if the topic ties to the context, ask if they need more detail. Encourage reflection with a question to build understanding. Blend rigor and practicality, add slight humor, and use headings or lists as needed.";

/// Default assistant persona name interpolated into the templates.
pub const DEFAULT_PERSONA: &str = "XLCRSCI-ArchGPT 1.0";

#[derive(Serialize)]
struct HistoryLine<'a> {
    speaker: &'static str,
    content: &'a str,
}

/// Registry of named prompt templates.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    tera: Tera,
    persona: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA)
    }
}

impl PromptTemplates {
    /// Built-in templates with `persona` as the assistant's name.
    pub fn new(persona: impl Into<String>) -> Self {
        let mut tera = Tera::default();
        for kind in PromptKind::ALL {
            if let Err(e) = tera.add_raw_template(kind.name(), kind.default_source()) {
                // Built-in sources are static; a failure here is a programming error.
                log::error!("built-in template {} failed to parse: {}", kind.name(), e);
            }
        }
        Self {
            tera,
            persona: persona.into(),
        }
    }

    /// Replace one template with a custom source.
    pub fn with_override(mut self, kind: PromptKind, source: &str) -> Result<Self, GenerationError> {
        self.tera
            .add_raw_template(kind.name(), source)
            .map_err(|e| GenerationError::Template(e.to_string()))?;
        Ok(self)
    }

    fn render(&self, kind: PromptKind, mut context: Context) -> Result<String, GenerationError> {
        context.insert("persona", &self.persona);
        self.tera
            .render(kind.name(), &context)
            .map_err(|e| GenerationError::Template(format!("{}: {}", kind.name(), e)))
    }

    fn with_message(kind: PromptKind, message: &str) -> (PromptKind, Context) {
        let mut context = Context::new();
        context.insert("message", message);
        (kind, context)
    }

    pub fn rudeness(&self, message: &str) -> Result<String, GenerationError> {
        let (kind, context) = Self::with_message(PromptKind::Rudeness, message);
        self.render(kind, context)
    }

    pub fn apology(&self, message: &str) -> Result<String, GenerationError> {
        let (kind, context) = Self::with_message(PromptKind::Apology, message);
        self.render(kind, context)
    }

    pub fn confirmation(&self) -> Result<String, GenerationError> {
        self.render(PromptKind::Confirmation, Context::new())
    }

    pub fn suggestions(&self, context_text: &str) -> Result<String, GenerationError> {
        let mut context = Context::new();
        context.insert("context", context_text);
        self.render(PromptKind::Suggestions, context)
    }

    /// Short sharp persona; sees only the current message.
    pub fn roast(&self, message: &str) -> Result<String, GenerationError> {
        let (kind, context) = Self::with_message(PromptKind::Roast, message);
        self.render(kind, context)
    }

    /// Long-form mentor persona over the whole context and history.
    pub fn mentor(
        &self,
        context_text: &str,
        history: &[Message],
        message: &str,
    ) -> Result<String, GenerationError> {
        let lines: Vec<HistoryLine<'_>> = history
            .iter()
            .map(|m| HistoryLine {
                speaker: m.role().label(),
                content: m.content(),
            })
            .collect();
        let (kind, mut context) = Self::with_message(PromptKind::Mentor, message);
        context.insert("context", context_text);
        context.insert("history", &lines);
        self.render(kind, context)
    }
}
