//! Generative-language model abstraction.
//!
//! Every external call this crate makes (confirmation, suggestions,
//! rudeness rating, apology check, reply) is one prompt in, one text blob
//! out. There is no streaming protocol; any typing effect is a rendering
//! concern applied to the finished string.

use std::fmt;

use async_trait::async_trait;

use crate::access::Credential;
use crate::errors::GenerationError;

/// A single-prompt text generation backend.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the request and nothing observable is left behind.
#[async_trait]
pub trait GenerativeModel: Send + Sync + fmt::Debug {
    /// Model identifier, e.g. `gemini-1.5-flash`.
    fn model(&self) -> &str;

    fn provider(&self) -> &str {
        "gemini"
    }

    /// Send `prompt` and return the reply text (possibly empty).
    async fn generate(&self, prompt: &str, credential: &Credential)
        -> Result<String, GenerationError>;
}
