//! Where the encoded context document comes from.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{ConfigError, ContextLoadError};

/// Fetches the raw (still encoded) context document.
#[async_trait]
pub trait ContextSource: Send + Sync + fmt::Debug {
    async fn fetch(&self) -> Result<String, ContextLoadError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Static resource served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpContextSource {
    url: String,
    client: reqwest::Client,
}

impl HttpContextSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ContextSource for HttpContextSource {
    async fn fetch(&self) -> Result<String, ContextLoadError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ContextLoadError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ContextLoadError::Status {
                status: status.as_u16(),
            });
        }
        response
            .text()
            .await
            .map_err(|e| ContextLoadError::Transport(e.to_string()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileContextSource {
    path: PathBuf,
}

impl FileContextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContextSource for FileContextSource {
    async fn fetch(&self) -> Result<String, ContextLoadError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ContextLoadError::Io(format!("{}: {}", self.path.display(), e)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
