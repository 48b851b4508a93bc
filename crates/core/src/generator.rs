//! Structured Generation
//!
//! Turns a prompt pair into a typed record: the target record's JSON Schema
//! is appended to the system prompt, the backend's reply is parsed as JSON,
//! list-wrapped replies are unwrapped, and the result is deserialized into
//! the requested type. Transient failures are retried with a fixed pause,
//! longer when the backend reports rate limiting.

use crate::llm_client::LLMClient;
use backon::{ConstantBuilder, Retryable};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Substrings that mark a backend error as rate limiting.
const RATE_LIMIT_MARKERS: [&str; 2] = ["rate_limit", "rate limit"];

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("backend request failed: {0}")]
    Backend(String),
    #[error("backend reply is not valid JSON: {0}")]
    Parse(String),
    #[error("backend reply does not match the {record} schema: {message}")]
    Schema {
        record: &'static str,
        message: String,
    },
    #[error("expected a JSON object, got {0}")]
    NotARecord(String),
}

impl GenerationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::NotARecord(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        let message = self.to_string().to_lowercase();
        RATE_LIMIT_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

/// How many times to ask, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
    pub error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_delay: Duration::from_secs(10),
            error_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Constant pauses between attempts, `max_attempts` calls in total.
    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.error_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// The pause before the next attempt after `error`.
    fn delay_after(&self, error: &GenerationError) -> Duration {
        if error.is_rate_limit() {
            self.rate_limit_delay
        } else {
            self.error_delay
        }
    }

    /// Same attempt budget, no waiting. Used by tests.
    pub fn immediate() -> Self {
        Self {
            rate_limit_delay: Duration::ZERO,
            error_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Generates typed records from a text backend.
#[derive(Clone)]
pub struct StructuredGenerator {
    backend: Arc<dyn LLMClient>,
    retry: RetryPolicy,
}

impl StructuredGenerator {
    pub fn new(backend: Arc<dyn LLMClient>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A generator with the same retry policy talking to another backend.
    pub fn with_backend(&self, backend: Arc<dyn LLMClient>) -> Self {
        Self {
            backend,
            retry: self.retry,
        }
    }

    /// Asks the backend for a `T`, retrying up to the policy's attempt limit.
    ///
    /// Exhausting the attempts returns the last failure. A reply that is not
    /// a JSON object at all fails immediately.
    pub async fn generate<T>(&self, system_prompt: &str, user_prompt: &str) -> Result<T, GenerationError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let system_prompt = with_schema::<T>(system_prompt);
        let policy = self.retry;
        (|| self.attempt::<T>(&system_prompt, user_prompt))
            .retry(policy.backoff())
            .sleep(tokio::time::sleep)
            .when(GenerationError::is_retryable)
            .adjust(move |e: &GenerationError, next: Option<Duration>| {
                next.map(|_| policy.delay_after(e))
            })
            .notify(|e: &GenerationError, delay: Duration| {
                if e.is_rate_limit() {
                    warn!("Rate limit hit, backing off for {:.0}s", delay.as_secs_f64());
                } else {
                    warn!(error = %e, "Generation failed, retrying after {:.0}s", delay.as_secs_f64());
                }
            })
            .await
    }

    async fn attempt<T>(&self, system_prompt: &str, user_prompt: &str) -> Result<T, GenerationError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let reply = self
            .backend
            .complete(system_prompt.to_string(), user_prompt.to_string())
            .await
            .map_err(|e| GenerationError::Backend(format!("{e:#}")))?;
        let value = parse_reply(&reply)?;
        let record = normalize(value)?;
        serde_json::from_value(record).map_err(|e| GenerationError::Schema {
            record: record_name::<T>(),
            message: e.to_string(),
        })
    }
}

fn record_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

fn with_schema<T: JsonSchema>(system_prompt: &str) -> String {
    let schema = schemars::schema_for!(T);
    let rendered = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        "{}\n\nRespond with a single JSON object that validates against this JSON Schema:\n```json\n{}\n```",
        system_prompt.trim_end(),
        rendered
    )
}

/// Parses the backend's reply, tolerating a Markdown code fence around it.
pub fn parse_reply(reply: &str) -> Result<Value, GenerationError> {
    let body = strip_code_fence(reply);
    serde_json::from_str(body).map_err(|e| GenerationError::Parse(e.to_string()))
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Reduces a reply to a single JSON object.
///
/// A one-element list is unwrapped; a longer list yields its first element
/// (lossy, logged). Anything that is not an object after
/// that is a type failure.
pub fn normalize(value: Value) -> Result<Value, GenerationError> {
    let value = match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(GenerationError::NotARecord("an empty list".to_string()));
            }
            if items.len() == 1 {
                warn!("Backend returned a single-item list, unwrapping");
            } else {
                warn!(items = items.len(), "Backend returned a list, using the first item");
            }
            items.swap_remove(0)
        }
        other => other,
    };
    match value {
        Value::Object(_) => Ok(value),
        Value::Array(_) => Err(GenerationError::NotARecord("a nested list".to_string())),
        Value::String(_) => Err(GenerationError::NotARecord("a string".to_string())),
        Value::Number(_) => Err(GenerationError::NotARecord("a number".to_string())),
        Value::Bool(_) => Err(GenerationError::NotARecord("a boolean".to_string())),
        Value::Null => Err(GenerationError::NotARecord("null".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::Verdict;
    use crate::llm_client::MockLLMClient;
    use anyhow::anyhow;
    use serde_json::json;

    fn generator(mock: MockLLMClient) -> StructuredGenerator {
        StructuredGenerator::new(Arc::new(mock)).with_retry(RetryPolicy::immediate())
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1]\n```\n"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_normalize_unwraps_lists() {
        assert_eq!(normalize(json!([{"a": 1}])).unwrap(), json!({"a": 1}));
        assert_eq!(
            normalize(json!([{"a": 1}, {"a": 2}])).unwrap(),
            json!({"a": 1})
        );
        assert!(matches!(
            normalize(json!([])),
            Err(GenerationError::NotARecord(_))
        ));
        assert!(matches!(
            normalize(json!(["text", {"a": 1}])),
            Err(GenerationError::NotARecord(_))
        ));
        assert!(matches!(
            normalize(json!("text")),
            Err(GenerationError::NotARecord(_))
        ));
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(GenerationError::Backend("Rate_Limit_Exceeded".into()).is_rate_limit());
        assert!(!GenerationError::Backend("connection reset".into()).is_rate_limit());
    }

    #[tokio::test]
    async fn test_generate_parses_fenced_reply_and_sends_schema() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|system, user| system.contains("\"approved\"") && user == "review this")
            .times(1)
            .returning(|_, _| Ok("```json\n{\"approved\": true, \"feedback\": \"ok\"}\n```".to_string()));

        let verdict: Verdict = generator(mock)
            .generate("You are a reviewer.", "review this")
            .await
            .unwrap();
        assert!(verdict.approved);
        assert_eq!(verdict.feedback, "ok");
    }

    #[tokio::test]
    async fn test_generate_retries_then_succeeds() {
        let mut mock = MockLLMClient::new();
        let mut calls = 0;
        mock.expect_complete().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(anyhow!("connection reset"))
            } else {
                Ok("[{\"approved\": false, \"feedback\": \"redo\"}]".to_string())
            }
        });

        let verdict: Verdict = generator(mock).generate("sys", "user").await.unwrap();
        assert!(!verdict.approved);
    }

    #[tokio::test]
    async fn test_generate_gives_up_after_three_attempts() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .times(3)
            .returning(|_, _| Ok("not json at all".to_string()));

        let err = generator(mock)
            .generate::<Verdict>("sys", "user")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Parse(_)));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_retried_and_surfaced() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .times(3)
            .returning(|_, _| Ok("{\"approved\": \"maybe\"}".to_string()));

        let err = generator(mock)
            .generate::<Verdict>("sys", "user")
            .await
            .unwrap_err();
        match err {
            GenerationError::Schema { record, .. } => assert_eq!(record, "Verdict"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_longer_than_other_errors() {
        let mut mock = MockLLMClient::new();
        let mut calls = 0;
        mock.expect_complete().times(3).returning(move |_, _| {
            calls += 1;
            match calls {
                1 => Err(anyhow!("429: rate limit exceeded")),
                2 => Err(anyhow!("connection reset")),
                _ => Ok("{\"approved\": true, \"feedback\": \"\"}".to_string()),
            }
        });

        let started = tokio::time::Instant::now();
        let verdict: Verdict = StructuredGenerator::new(Arc::new(mock))
            .generate("sys", "user")
            .await
            .unwrap();

        assert!(verdict.approved);
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_after_the_last_attempt() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .times(3)
            .returning(|_, _| Err(anyhow!("connection reset")));

        let started = tokio::time::Instant::now();
        let err = StructuredGenerator::new(Arc::new(mock))
            .generate::<Verdict>("sys", "user")
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Backend(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_non_record_reply_fails_without_retry() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_, _| Ok("42".to_string()));

        let err = generator(mock)
            .generate::<Verdict>("sys", "user")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NotARecord(_)));
    }
}
