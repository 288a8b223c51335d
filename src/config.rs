//! Runtime configuration.
//!
//! Defaults, then an optional YAML file named by `CHAT_CONFIG`, then
//! environment overrides, then [`ChatConfig::validate`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::access::CredentialPool;
use crate::context::{ContextSource, FileContextSource, HttpContextSource};
use crate::errors::ConfigError;
use crate::llms::providers::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::moderation::{ApologyStrategy, ModerationPolicy};
use crate::utilities::prompts::DEFAULT_PERSONA;

/// SHA-256 of the deployed department passkey.
pub const DEFAULT_PASSKEY_SHA256: &str =
    "2a32f4fe7baa4f2b7179ab0e03037f7a7eec963f43778976e49500d6d68711d3";

/// Where the context document comes from. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSourceConfig {
    pub url: Option<String>,
    pub path: Option<PathBuf>,
}

impl ContextSourceConfig {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            path: None,
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            url: None,
            path: Some(path.into()),
        }
    }

    /// Build the configured source.
    pub fn build(&self, timeout: Duration) -> Result<Arc<dyn ContextSource>, ConfigError> {
        match (&self.url, &self.path) {
            (Some(url), None) => Ok(Arc::new(HttpContextSource::new(url.clone(), timeout)?)),
            (None, Some(path)) => Ok(Arc::new(FileContextSource::new(path.clone()))),
            _ => Err(ConfigError::Invalid {
                key: "context".to_string(),
                message: "set exactly one of `url` or `path`".to_string(),
            }),
        }
    }
}

/// Everything needed to assemble a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Hex SHA-256 of the passkey.
    pub passkey_sha256: String,
    /// Base64-encoded API keys; one is drawn per session.
    pub credentials: Vec<String>,
    pub model: String,
    pub api_base_url: String,
    pub context: ContextSourceConfig,
    pub persona: String,
    pub classifier_timeout_ms: u64,
    pub request_timeout_secs: u64,
    /// Retries for 429 and 5xx answers.
    pub max_retries: u32,
    pub apology_strategy: ApologyStrategy,
    pub moderation: ModerationPolicy,
    pub bind_addr: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            passkey_sha256: DEFAULT_PASSKEY_SHA256.to_string(),
            credentials: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            context: ContextSourceConfig::path("context.txt"),
            persona: DEFAULT_PERSONA.to_string(),
            classifier_timeout_ms: 5_000,
            request_timeout_secs: 120,
            max_retries: 2,
            apology_strategy: ApologyStrategy::default(),
            moderation: ModerationPolicy::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ChatConfig {
    /// Load from `CHAT_CONFIG` (if set) and the environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CHAT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("CHAT_PASSKEY_SHA256") {
            self.passkey_sha256 = v.trim().to_string();
        }
        if let Some(v) = var("CHAT_CREDENTIALS") {
            self.credentials = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = var("CHAT_MODEL") {
            self.model = v;
        }
        if let Some(v) = var("CHAT_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = var("CHAT_CONTEXT_URL") {
            self.context = ContextSourceConfig::url(v);
        } else if let Some(v) = var("CHAT_CONTEXT_PATH") {
            self.context = ContextSourceConfig::path(v);
        }
        if let Some(v) = var("CHAT_CLASSIFIER_TIMEOUT_MS") {
            self.classifier_timeout_ms = parse_number("CHAT_CLASSIFIER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("CHAT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("CHAT_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CHAT_MAX_RETRIES") {
            self.max_retries = parse_number("CHAT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("CHAT_APOLOGY_STRATEGY") {
            self.apology_strategy = v.parse().map_err(|message| ConfigError::Invalid {
                key: "CHAT_APOLOGY_STRATEGY".to_string(),
                message,
            })?;
        }
        if let Some(v) = var("PORT") {
            let port: u16 = parse_number("PORT", &v)?;
            self.bind_addr = format!("0.0.0.0:{}", port);
        }
        Ok(())
    }

    /// Check the assembled configuration before anything is built from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let digest = self.passkey_sha256.trim();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("passkey_sha256", "expected 64 hex characters"));
        }
        CredentialPool::from_encoded(&self.credentials)?;
        if self.context.url.is_some() == self.context.path.is_some() {
            return Err(invalid("context", "set exactly one of `url` or `path`"));
        }
        if self.model.trim().is_empty() {
            return Err(invalid("model", "must not be empty"));
        }
        if self.classifier_timeout_ms == 0 {
            return Err(invalid("classifier_timeout_ms", "must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}
