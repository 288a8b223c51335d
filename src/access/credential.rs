//! Base64-encoded API credentials.

use std::fmt;

use base64::Engine;
use rand::Rng;

use crate::errors::ConfigError;

/// An API credential for the generative-language endpoint.
///
/// `Debug` and `Display` redact the value so it never lands in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for placing on the outgoing request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Small fixed pool of credentials, decoded once at startup.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Decode a list of base64 (standard alphabet) credentials.
    pub fn from_encoded<S: AsRef<str>>(encoded: &[S]) -> Result<Self, ConfigError> {
        let engine = &base64::engine::general_purpose::STANDARD;
        let mut credentials = Vec::with_capacity(encoded.len());
        for (idx, item) in encoded.iter().enumerate() {
            let invalid = |message: String| ConfigError::Invalid {
                key: format!("credentials[{}]", idx),
                message,
            };
            let bytes = engine
                .decode(item.as_ref().trim())
                .map_err(|e| invalid(e.to_string()))?;
            let value = String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
            if value.trim().is_empty() {
                return Err(invalid("decodes to an empty credential".to_string()));
            }
            credentials.push(Credential(value));
        }
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        Ok(Self { credentials })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Pick one credential uniformly at random.
    ///
    /// Spreads load across keys; it adds no security.
    pub fn choose(&self) -> Credential {
        // Construction rejects empty pools.
        let idx = rand::thread_rng().gen_range(0..self.credentials.len());
        self.credentials[idx].clone()
    }
}
