//! Context document loading.
//!
//! The context document is published base64-encoded and loaded once per
//! session after the passkey is accepted. Everything the assistant says in
//! mentor mode is grounded in it, so chat stays closed until it is loaded.

mod source;

pub use source::{ContextSource, FileContextSource, HttpContextSource};

use std::sync::Arc;

use base64::Engine;
use serde::Serialize;

use crate::access::Credential;
use crate::errors::ContextLoadError;
use crate::llms::GenerativeModel;
use crate::session::{ContextState, SharedSession};
use crate::utilities::prompts::PromptTemplates;

/// Used when the confirmation call fails or returns nothing.
pub const FALLBACK_CONFIRMATION: &str =
    "## We are good to go!\nLet’s dive into science with purpose—ready to learn and grow?";

/// Used when the suggestion call fails or returns nothing usable.
pub const FALLBACK_SUGGESTIONS: [&str; 3] = [
    "What are the core concepts here?",
    "How does this apply in practice?",
    "What’s the first step to understanding this?",
];

/// Decode a published context document.
pub fn decode_context(encoded: &str) -> Result<String, ContextLoadError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ContextLoadError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ContextLoadError::Decode(e.to_string()))
}

/// One suggested question per non-blank line, list markers stripped.
pub fn parse_suggestions(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Serialize)]
pub struct ContextReady {
    #[serde(skip)]
    pub context: Arc<str>,
    /// Markdown confirmation shown to the user.
    pub confirmation: String,
    /// Starter questions; never empty.
    pub suggestions: Vec<String>,
}

/// Fetches, decodes and installs the context document on a session.
#[derive(Debug, Clone)]
pub struct ContextLoader {
    source: Arc<dyn ContextSource>,
    model: Arc<dyn GenerativeModel>,
    templates: Arc<PromptTemplates>,
}

impl ContextLoader {
    pub fn new(
        source: Arc<dyn ContextSource>,
        model: Arc<dyn GenerativeModel>,
        templates: Arc<PromptTemplates>,
    ) -> Self {
        Self {
            source,
            model,
            templates,
        }
    }

    /// Load the context document into `session`.
    ///
    /// Requires access to have been granted. Calls made while a load is
    /// already running, or after one succeeded, return a no-op error
    /// ([`ContextLoadError::is_noop`]) and leave the session untouched.
    ///
    /// A fetch or decode failure marks the context unavailable. Nothing
    /// retries automatically. The confirmation and suggestion calls are
    /// best-effort and fall back to fixed text. Dropping the returned future
    /// before it completes also marks the context unavailable, so a later
    /// load can retry.
    pub async fn load(&self, session: &SharedSession) -> Result<ContextReady, ContextLoadError> {
        let credential = {
            let mut s = session.lock();
            let credential = s
                .credential()
                .cloned()
                .ok_or(ContextLoadError::AccessNotGranted)?;
            match s.context() {
                ContextState::Loading => return Err(ContextLoadError::AlreadyLoading),
                ContextState::Loaded(_) => return Err(ContextLoadError::AlreadyLoaded),
                ContextState::Unloaded | ContextState::Unavailable => {}
            }
            s.set_context(ContextState::Loading);
            credential
        };
        let guard = LoadingGuard { session };

        log::info!("loading context from {}", self.source.describe());
        let text = match self.fetch_and_decode().await {
            Ok(text) => text,
            Err(e) => {
                log::error!("context load failed: {}", e);
                return Err(e);
            }
        };
        log::debug!("decoded context: {} chars", text.chars().count());
        let context: Arc<str> = Arc::from(text);

        let confirmation = self.confirmation(&credential).await;
        let suggestions = self.suggestions(&context, &credential).await;

        session
            .lock()
            .set_context(ContextState::Loaded(Arc::clone(&context)));
        drop(guard);
        log::info!("context loaded");

        Ok(ContextReady {
            context,
            confirmation,
            suggestions,
        })
    }

    async fn fetch_and_decode(&self) -> Result<String, ContextLoadError> {
        let encoded = self.source.fetch().await?;
        decode_context(&encoded)
    }

    async fn confirmation(&self, credential: &Credential) -> String {
        let result = match self.templates.confirmation() {
            Ok(prompt) => self.model.generate(&prompt, credential).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => FALLBACK_CONFIRMATION.to_string(),
            Err(e) => {
                log::warn!("confirmation generation failed: {}", e);
                FALLBACK_CONFIRMATION.to_string()
            }
        }
    }

    async fn suggestions(&self, context: &str, credential: &Credential) -> Vec<String> {
        let result = match self.templates.suggestions(context) {
            Ok(prompt) => self.model.generate(&prompt, credential).await,
            Err(e) => Err(e),
        };
        let parsed = match result {
            Ok(text) => parse_suggestions(&text),
            Err(e) => {
                log::warn!("suggestion generation failed: {}", e);
                Vec::new()
            }
        };
        if parsed.is_empty() {
            FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
        } else {
            parsed
        }
    }
}

/// Moves a session out of `Loading` when a load ends without installing
/// the document: on a fetch error, or when the load future is dropped.
struct LoadingGuard<'a> {
    session: &'a SharedSession,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut s = self.session.lock();
        if s.context_loading() {
            log::warn!("context load did not finish; marking unavailable");
            s.set_context(ContextState::Unavailable);
        }
    }
}
