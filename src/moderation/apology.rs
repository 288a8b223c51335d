//! Apology detection.
//!
//! Two strategies exist and a session uses exactly one, chosen by
//! [`ApologyStrategy`] at construction. There is no fallback from one to the
//! other: the keyword matcher is the default, the model-backed detector is
//! opt-in.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::access::Credential;
use crate::llms::GenerativeModel;
use crate::utilities::prompts::PromptTemplates;

/// Which detector a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApologyStrategy {
    /// Local regex over apology phrases. No network call.
    #[default]
    Keyword,
    /// Ask the model for a yes/no answer. Fails closed (no apology).
    Model,
}

impl std::str::FromStr for ApologyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "model" | "llm" => Ok(Self::Model),
            other => Err(format!("unknown apology strategy '{}'", other)),
        }
    }
}

/// Decides whether a user message apologises.
#[async_trait]
pub trait ApologyDetector: Send + Sync + fmt::Debug {
    async fn is_apology(&self, message: &str, credential: &Credential) -> bool;
}

static APOLOGY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(sorry|apolog(?:y|ies|i[sz]e[sd]?|i[sz]ing)|my bad|forgive me|pardon me)\b",
    )
    .unwrap()
});

/// Matches common apology phrases ("sorry", "I apologize", "my bad", ...).
#[derive(Debug, Clone, Default)]
pub struct KeywordApologyDetector;

impl KeywordApologyDetector {
    pub fn matches(message: &str) -> bool {
        APOLOGY_PATTERN.is_match(message)
    }
}

#[async_trait]
impl ApologyDetector for KeywordApologyDetector {
    async fn is_apology(&self, message: &str, _credential: &Credential) -> bool {
        Self::matches(message)
    }
}

/// Asks the model whether the message contains an apology.
///
/// Only an answer of exactly `yes` (case-insensitive, trimmed) counts. Any
/// failure, including running past the timeout, counts as no apology.
#[derive(Debug, Clone)]
pub struct ModelApologyDetector {
    model: Arc<dyn GenerativeModel>,
    templates: Arc<PromptTemplates>,
    timeout: Duration,
}

impl ModelApologyDetector {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        templates: Arc<PromptTemplates>,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            templates,
            timeout,
        }
    }
}

#[async_trait]
impl ApologyDetector for ModelApologyDetector {
    async fn is_apology(&self, message: &str, credential: &Credential) -> bool {
        let prompt = match self.templates.apology(message) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("apology prompt failed: {}", e);
                return false;
            }
        };
        match tokio::time::timeout(self.timeout, self.model.generate(&prompt, credential)).await {
            Ok(Ok(answer)) => answer.trim().eq_ignore_ascii_case("yes"),
            Ok(Err(e)) => {
                log::warn!("apology check failed: {}", e);
                false
            }
            Err(_) => {
                log::warn!("apology check timed out after {:?}", self.timeout);
                false
            }
        }
    }
}
