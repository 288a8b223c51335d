//! Generative-language model backends.

pub mod base_llm;
pub mod providers;

pub use base_llm::GenerativeModel;
pub use providers::gemini::GeminiClient;
