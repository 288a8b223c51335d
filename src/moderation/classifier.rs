//! Rudeness classifier backed by the generative-language API.
//!
//! Fail-open: a timeout, transport error, API error or unparseable answer
//! all yield a score of 0, which can never count as rude. Moderation is
//! advisory; it never blocks the user.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::access::Credential;
use crate::errors::ClassificationError;
use crate::llms::GenerativeModel;
use crate::utilities::prompts::PromptTemplates;

/// Default budget for one classification call.
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(5);

/// Highest score the classifier may report.
pub const MAX_RUDENESS_SCORE: u8 = 10;

/// Leading integer of the answer, e.g. `"7"`, `" 7/10"`, `"-1"`.
static LEADING_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([+-]?\d+)").unwrap());

/// Parse a model answer into a score in `0..=10`.
pub fn parse_score(answer: &str) -> Result<u8, ClassificationError> {
    let digits = LEADING_INTEGER
        .captures(answer)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ClassificationError::Unparseable(answer.chars().take(40).collect()))?;
    let value: i64 = digits
        .as_str()
        .parse()
        .map_err(|_| ClassificationError::Unparseable(digits.as_str().to_string()))?;
    if !(0..=i64::from(MAX_RUDENESS_SCORE)).contains(&value) {
        return Err(ClassificationError::OutOfRange(value));
    }
    Ok(value as u8)
}

/// Scores a message for rudeness with a bounded external call.
#[derive(Debug, Clone)]
pub struct RudenessClassifier {
    model: Arc<dyn GenerativeModel>,
    templates: Arc<PromptTemplates>,
    timeout: Duration,
}

impl RudenessClassifier {
    pub fn new(model: Arc<dyn GenerativeModel>, templates: Arc<PromptTemplates>) -> Self {
        Self {
            model,
            templates,
            timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        }
    }

    /// Builder: override the per-call budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Score `message` in `0..=10`. Never fails; see module docs.
    pub async fn classify(&self, message: &str, credential: &Credential) -> u8 {
        match self.try_classify(message, credential).await {
            Ok(score) => {
                log::debug!("rudeness score {}", score);
                score
            }
            Err(e) => {
                log::warn!("rudeness classification failed open: {}", e);
                0
            }
        }
    }

    /// Like [`classify`](Self::classify) but reports why a score is missing.
    pub async fn try_classify(
        &self,
        message: &str,
        credential: &Credential,
    ) -> Result<u8, ClassificationError> {
        let prompt = self.templates.rudeness(message)?;
        let answer = tokio::time::timeout(self.timeout, self.model.generate(&prompt, credential))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout.as_millis() as u64))??;
        parse_score(&answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationError;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Fixed(Result<String, GenerationError>, Duration);

    #[async_trait]
    impl GenerativeModel for Fixed {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _: &str, _: &Credential) -> Result<String, GenerationError> {
            tokio::time::sleep(self.1).await;
            self.0.clone()
        }
    }

    fn classifier(answer: Result<&str, GenerationError>, delay_ms: u64) -> RudenessClassifier {
        let model = Fixed(answer.map(str::to_string), Duration::from_millis(delay_ms));
        RudenessClassifier::new(Arc::new(model), Arc::new(PromptTemplates::default()))
            .with_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("7").unwrap(), 7);
        assert_eq!(parse_score(" 10\n").unwrap(), 10);
        assert_eq!(parse_score("3/10").unwrap(), 3);
        assert_eq!(parse_score("0").unwrap(), 0);
        assert!(matches!(parse_score("11"), Err(ClassificationError::OutOfRange(11))));
        assert!(matches!(parse_score("-2"), Err(ClassificationError::OutOfRange(-2))));
        assert!(matches!(parse_score("very rude"), Err(ClassificationError::Unparseable(_))));
        assert!(parse_score("").is_err());
        assert!(parse_score("99999999999999999999999").is_err());
    }

    #[tokio::test]
    async fn test_classify_returns_score() {
        let c = classifier(Ok("8"), 0);
        assert_eq!(c.classify("you fool", &Credential::new("k")).await, 8);
    }

    #[tokio::test]
    async fn test_malformed_answer_fails_open() {
        let c = classifier(Ok("I'd say fairly rude"), 0);
        assert_eq!(c.classify("hmm", &Credential::new("k")).await, 0);
    }

    #[tokio::test]
    async fn test_upstream_error_fails_open() {
        let c = classifier(Err(GenerationError::Transport("refused".into())), 0);
        let cred = Credential::new("k");
        assert_eq!(c.classify("hmm", &cred).await, 0);
        assert!(matches!(
            c.try_classify("hmm", &cred).await,
            Err(ClassificationError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_fails_open() {
        let c = classifier(Ok("9"), 2_000);
        let cred = Credential::new("k");
        let started = std::time::Instant::now();
        assert_eq!(c.classify("slow", &cred).await, 0);
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert!(matches!(
            c.try_classify("slow", &cred).await,
            Err(ClassificationError::Timeout(100))
        ));
    }
}
