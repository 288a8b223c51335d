//! Passkey gate and API credential pool.
//!
//! The gate compares a SHA-256 digest of the trimmed passkey against a fixed
//! reference digest and, on success, hands the session one credential for the
//! generative-language API.
//!
//! # Not a secret boundary
//!
//! The credential pool ships with the client in base64 form. Base64 is an
//! encoding, not encryption: anyone holding the configuration or inspecting
//! the client can recover every credential. The passkey only decides *whether
//! this session uses* a credential; it does not protect the credential
//! itself. A production deployment must proxy the API call server-side and
//! keep credentials out of the client entirely.

mod credential;

pub use credential::{Credential, CredentialPool};

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::{AccessError, ConfigError};
use crate::session::Session;

/// Hex-encoded SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Validates the shared passkey and grants the session a credential.
///
/// Attempts are not rate-limited.
#[derive(Debug, Clone)]
pub struct AccessGate {
    reference_digest: [u8; 32],
    pool: CredentialPool,
}

impl AccessGate {
    /// Create a gate from a hex SHA-256 reference digest and a credential pool.
    pub fn new(reference_sha256: &str, pool: CredentialPool) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            key: "passkey_sha256".to_string(),
            message,
        };
        let bytes = hex::decode(reference_sha256.trim()).map_err(|e| invalid(e.to_string()))?;
        let reference_digest: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| invalid(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self {
            reference_digest,
            pool,
        })
    }

    /// Check `secret` against the reference digest.
    ///
    /// The whole digest is always compared, whatever the input.
    pub fn matches(&self, secret: &str) -> bool {
        let digest = Sha256::digest(secret.trim().as_bytes());
        digest.as_slice().ct_eq(&self.reference_digest).into()
    }

    /// Verify `secret` and grant access to `session`.
    ///
    /// On the first correct submission one credential is drawn uniformly from
    /// the pool and stored on the session. Later correct submissions keep the
    /// credential already drawn.
    pub fn verify(&self, session: &mut Session, secret: &str) -> Result<(), AccessError> {
        if secret.trim().is_empty() {
            return Err(AccessError::Missing);
        }
        if !self.matches(secret) {
            log::info!("passkey rejected for session {}", session.id());
            return Err(AccessError::Incorrect);
        }
        if session.access_granted() {
            log::debug!("session {} already unlocked", session.id());
            return Ok(());
        }
        session.grant(self.pool.choose());
        log::info!("passkey accepted for session {}", session.id());
        Ok(())
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }
}
