//! Google Gemini `generateContent` client.
//!
//! Sends the prompt as a single user part:
//!
//! ```json
//! { "contents": [ { "parts": [ { "text": "<prompt>" } ] } ] }
//! ```
//!
//! and concatenates the text parts of the first candidate. The credential is
//! passed as the `key` query parameter.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::access::Credential;
use crate::errors::{ConfigError, GenerationError};
use crate::llms::base_llm::GenerativeModel;

/// Default public endpoint of the Gemini API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini `generateContent` client.
///
/// Retries transport failures, 429 and 5xx with exponential backoff; other
/// 4xx answers fail immediately.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    model: String,
    base_url: String,
    client: reqwest::Client,
    /// Sampling temperature; omitted from the request when `None`.
    pub temperature: Option<f64>,
    /// Maximum output tokens; omitted when `None`.
    pub max_output_tokens: Option<u32>,
    max_retries: u32,
    retry_delay: Duration,
}

impl GeminiClient {
    /// Create a client for `model` against `base_url`.
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            temperature: None,
            max_output_tokens: None,
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Builder: number of retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder: delay before the first retry (doubles each attempt).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn generation_config(&self) -> Value {
        let mut config = serde_json::Map::new();
        if let Some(temp) = self.temperature {
            config.insert("temperature".to_string(), serde_json::json!(temp));
        }
        if let Some(max_tokens) = self.max_output_tokens {
            config.insert("maxOutputTokens".to_string(), serde_json::json!(max_tokens));
        }
        Value::Object(config)
    }

    /// Request body for a single text prompt.
    pub fn build_request_body(&self, prompt: &str) -> Value {
        let mut body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        let config = self.generation_config();
        if config.as_object().is_some_and(|c| !c.is_empty()) {
            body["generationConfig"] = config;
        }
        body
    }

    /// Pull the reply text out of a `generateContent` response.
    pub fn extract_text(response: &Value) -> Result<String, GenerationError> {
        if let Some(error) = response.get("error") {
            let msg = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown Gemini API error");
            return Err(GenerationError::Api(msg.to_string()));
        }

        let candidate = response
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| GenerationError::Malformed("no candidates".to_string()))?;

        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| GenerationError::Malformed("no content.parts".to_string()))?;

        Ok(parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        credential: &Credential,
    ) -> Result<String, GenerationError> {
        log::debug!(
            "GeminiClient.generate: model={}, prompt_chars={}",
            self.model,
            prompt.chars().count()
        );

        let body = self.build_request_body(prompt);
        let endpoint = self.endpoint();

        let mut last_error: Option<GenerationError> = None;
        let mut retry_delay = self.retry_delay;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!("Gemini API retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self
                .client
                .post(&endpoint)
                .query(&[("key", credential.expose())])
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    // Strip the URL: it carries the credential.
                    last_error = Some(GenerationError::Transport(e.without_url().to_string()));
                    continue;
                }
            };

            let status = response.status();
            let response_text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = Some(GenerationError::Transport(e.without_url().to_string()));
                    continue;
                }
            };

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = Some(GenerationError::Status {
                    status: status.as_u16(),
                    body: truncate(&response_text, 500),
                });
                continue;
            }

            if !status.is_success() {
                return Err(GenerationError::Status {
                    status: status.as_u16(),
                    body: truncate(&response_text, 500),
                });
            }

            let json: Value = serde_json::from_str(&response_text).map_err(|e| {
                GenerationError::Malformed(format!(
                    "{} - body: {}",
                    e,
                    truncate(&response_text, 200)
                ))
            })?;

            if let Some(usage) = json.get("usageMetadata") {
                log::debug!("Gemini usage: {}", usage);
            }

            return Self::extract_text(&json);
        }

        Err(last_error.unwrap_or_else(|| {
            GenerationError::Transport("Gemini API call failed after all retries".to_string())
        }))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::{StatusCode, Uri};
    use axum::{Json, Router};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> GeminiClient {
        GeminiClient::new("gemini-test", base, Duration::from_secs(5))
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_request_body_shape() {
        let client = client("http://localhost");
        let body = client.build_request_body("hello");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert!(body.get("generationConfig").is_none());

        let mut tuned = client.clone();
        tuned.temperature = Some(0.2);
        let body = tuned.build_request_body("hello");
        assert_eq!(body["generationConfig"]["temperature"], 0.2);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] } }]
        });
        assert_eq!(GeminiClient::extract_text(&response).unwrap(), "Hello there");
    }

    #[test]
    fn test_extract_text_errors() {
        let missing = serde_json::json!({ "candidates": [] });
        assert!(matches!(
            GeminiClient::extract_text(&missing),
            Err(GenerationError::Malformed(_))
        ));
        let api = serde_json::json!({ "error": { "message": "API key not valid" } });
        assert_eq!(
            GeminiClient::extract_text(&api),
            Err(GenerationError::Api("API key not valid".to_string()))
        );
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = client("http://localhost:9/v1beta/");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9/v1beta/models/gemini-test:generateContent"
        );
    }

    #[tokio::test]
    async fn test_generate_sends_key_and_prompt() {
        let router = Router::new().fallback(
            |uri: Uri,
             Query(q): Query<std::collections::HashMap<String, String>>,
             Json(body): Json<Value>| async move {
                let prompt = body["contents"][0]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let key = q.get("key").cloned().unwrap_or_default();
                Json(serde_json::json!({
                    "candidates": [{ "content": { "parts": [{
                        "text": format!("{}|{}|{}", uri.path(), key, prompt)
                    }] } }]
                }))
            },
        );
        let base = spawn(router).await;
        let reply = client(&base)
            .generate("ping", &Credential::new("k-1"))
            .await
            .unwrap();
        assert_eq!(reply, "/models/gemini-test:generateContent|k-1|ping");
    }

    #[tokio::test]
    async fn test_generate_retries_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .fallback(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})))
                } else {
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }]
                        })),
                    )
                }
            })
            .with_state(Arc::clone(&hits));
        let base = spawn(router).await;
        let reply = client(&base)
            .generate("x", &Credential::new("k"))
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generate_client_error_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .fallback(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::BAD_REQUEST, "bad key")
            })
            .with_state(Arc::clone(&hits));
        let base = spawn(router).await;
        let err = client(&base)
            .generate("x", &Credential::new("k"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::Status {
                status: 400,
                body: "bad key".to_string()
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
