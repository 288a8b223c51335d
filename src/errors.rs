//! Error taxonomy for the chat session.
//!
//! Only [`AccessError`], [`ContextLoadError`] and [`GenerationError`] ever
//! reach the user, and always as a fixed sentence from `user_message()`.
//! [`ClassificationError`] is absorbed by the classifier (score 0) and
//! cancellation is not an error at all.

use thiserror::Error;

/// Shown when context setup fails for any reason.
pub const CONTEXT_FAILURE_TEXT: &str =
    "Error: System’s down—check the console and let’s fix this together.";

/// Shown in place of a reply when generation fails.
pub const GENERATION_FAILURE_TEXT: &str =
    "Error: Connection issue—check the console and let’s troubleshoot.";

/// Passkey submission failures. Recoverable: the user simply retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Nothing left after trimming the submitted secret.
    #[error("no passkey supplied")]
    Missing,

    /// Digest of the submitted secret does not match the reference digest.
    #[error("passkey digest mismatch")]
    Incorrect,
}

impl AccessError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Missing => "Please provide the Department Passkey—no shortcuts here.",
            Self::Incorrect => "Incorrect passkey. Try again—accuracy matters.",
        }
    }
}

/// Context document failures. Only a reload recovers; nothing retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextLoadError {
    /// `load()` was called before the passkey was accepted.
    #[error("access has not been granted")]
    AccessNotGranted,

    /// Another `load()` is already running; this call did nothing.
    #[error("context load already in flight")]
    AlreadyLoading,

    /// The document is already installed on this session.
    #[error("context already loaded")]
    AlreadyLoaded,

    /// The document source answered with a non-success status.
    #[error("failed to load context file: {status}")]
    Status { status: u16 },

    /// The request never produced a response.
    #[error("context transport error: {0}")]
    Transport(String),

    /// Local file could not be read.
    #[error("context read error: {0}")]
    Io(String),

    /// Body is not valid base64, or does not decode to UTF-8.
    #[error("context decode error: {0}")]
    Decode(String),
}

impl ContextLoadError {
    /// `true` for the guard variants that leave the session untouched.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            Self::AccessNotGranted | Self::AlreadyLoading | Self::AlreadyLoaded
        )
    }

    pub fn user_message(&self) -> &'static str {
        CONTEXT_FAILURE_TEXT
    }
}

/// Rudeness/apology classification failures. Never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("classifier call timed out after {0} ms")]
    Timeout(u64),

    #[error("classifier call failed: {0}")]
    Upstream(#[from] GenerationError),

    #[error("unparseable classifier answer: {0:?}")]
    Unparseable(String),

    #[error("classifier score {0} outside 0..=10")]
    OutOfRange(i64),
}

/// Failures of a single generative-language call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Request could not be sent or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status after retries were exhausted.
    #[error("generative API error ({status}): {body}")]
    Status { status: u16, body: String },

    /// Response body did not carry `candidates[0].content.parts[*].text`.
    #[error("malformed generative API response: {0}")]
    Malformed(String),

    /// The API answered with an `error` object.
    #[error("generative API error: {0}")]
    Api(String),

    /// A prompt template failed to render.
    #[error("prompt template error: {0}")]
    Template(String),
}

impl GenerationError {
    pub fn user_message(&self) -> &'static str {
        GENERATION_FAILURE_TEXT
    }
}

/// Failures of a passkey submission followed by the context load it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnlockError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Context(#[from] ContextLoadError),
}

impl UnlockError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Access(e) => e.user_message(),
            Self::Context(e) => e.user_message(),
        }
    }
}

/// Startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("no credentials configured; set CHAT_CREDENTIALS or `credentials` in the config file")]
    NoCredentials,

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_guards() {
        assert!(ContextLoadError::AccessNotGranted.is_noop());
        assert!(ContextLoadError::AlreadyLoading.is_noop());
        assert!(!ContextLoadError::Status { status: 404 }.is_noop());
    }

    #[test]
    fn test_user_messages_are_fixed() {
        let a = GenerationError::Transport("reset".into());
        let b = GenerationError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(a.user_message(), b.user_message());
        assert_ne!(
            AccessError::Missing.user_message(),
            AccessError::Incorrect.user_message()
        );
    }

    #[test]
    fn test_classification_wraps_generation() {
        let err: ClassificationError = GenerationError::Api("quota".into()).into();
        assert!(err.to_string().contains("quota"));
    }
}
