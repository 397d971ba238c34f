//! Structured error reports and retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{AgentError, ErrorSeverity};

/// Envelope returned to callers when an agent task fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub success: bool,
    pub error_type: String,
    pub message: String,
    pub context: Value,
    pub error_code: String,
    pub severity: ErrorSeverity,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorReport {
    /// Build the report and log it at the level matching its severity.
    pub fn from_error(err: &AgentError, context: Value) -> Self {
        let report = Self {
            success: false,
            error_type: error_type(err).to_string(),
            message: err.to_string(),
            context,
            error_code: err.code().to_string(),
            severity: err.severity(),
            details: details(err),
            retry_after: err.retry_after().map(|d| d.as_secs()),
        };

        match report.severity {
            ErrorSeverity::Low => tracing::info!(
                code = %report.error_code,
                context = %report.context,
                "{}", report.message
            ),
            ErrorSeverity::Medium => tracing::warn!(
                code = %report.error_code,
                context = %report.context,
                "{}", report.message
            ),
            ErrorSeverity::High | ErrorSeverity::Critical => tracing::error!(
                code = %report.error_code,
                context = %report.context,
                "{}", report.message
            ),
        }
        report
    }
}

fn error_type(err: &AgentError) -> &'static str {
    match err {
        AgentError::Validation { .. } => "ValidationError",
        AgentError::Network(_) => "NetworkError",
        AgentError::Api { .. } => "ApiError",
        AgentError::RateLimited { .. } => "RateLimitError",
        AgentError::Config(_) => "ConfigError",
        AgentError::UnknownAgent(_)
        | AgentError::UnknownAgentType(_)
        | AgentError::DuplicateAgent(_) => "AgentError",
        AgentError::Internal(_) => "InternalError",
    }
}

fn details(err: &AgentError) -> Value {
    match err {
        AgentError::Validation { field, .. } => json!({ "field": field }),
        AgentError::Api { api, status, .. } => json!({ "api": api, "status_code": status }),
        AgentError::RateLimited { api, .. } => json!({ "api": api }),
        _ => json!({}),
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (must be >= 1).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out of attempts.
///
/// Rate-limit errors that carry a `retry_after` wait that long instead of the
/// current backoff delay.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let wait = e.retry_after().unwrap_or(delay);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = delay.mul_f64(policy.backoff_factor);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(operation, attempts = attempt, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::integrations::SpeechService;
    use crate::testing::FakeSpeech;

    fn fast() -> RetryPolicy {
        RetryPolicy::default().with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn report_carries_code_and_severity() {
        let report = ErrorReport::from_error(
            &AgentError::validation("text", "nothing to say"),
            json!({"agent_id": "voice_1"}),
        );
        assert!(!report.success);
        assert_eq!(report.error_type, "ValidationError");
        assert_eq!(report.error_code, "VALIDATION_ERROR");
        assert_eq!(report.severity, ErrorSeverity::Low);
        assert_eq!(report.details["field"], "text");
        assert_eq!(report.context["agent_id"], "voice_1");
        assert!(report.retry_after.is_none());

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["severity"], "low");
        assert!(value.get("retry_after").is_none());
    }

    #[test]
    fn rate_limit_report_includes_retry_after() {
        let report = ErrorReport::from_error(
            &AgentError::RateLimited {
                api: "openai".into(),
                retry_after: Some(Duration::from_secs(7)),
            },
            json!({}),
        );
        assert_eq!(report.error_code, "API_RATE_LIMIT");
        assert_eq!(report.severity, ErrorSeverity::Medium);
        assert_eq!(report.retry_after, Some(7));
        assert_eq!(report.details["api"], "openai");
    }

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff_factor, 2.0);
    }

    #[tokio::test]
    async fn recovers_from_transient_speech_failures() {
        let speech = Arc::new(FakeSpeech::flaky(2));
        let audio = retry_with_backoff(&fast(), "synthesize", || {
            let speech = speech.clone();
            async move { Ok(speech.synthesize("안녕하세요", 1.0).await?) }
        })
        .await
        .unwrap();
        assert_eq!(audio, "안녕하세요".as_bytes());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(), "flaky", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::Network("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(), "validate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::validation("email_id", "required")) }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_waits_retry_after() {
        let calls = AtomicU32::new(0);
        let started = std::time::Instant::now();
        let result = retry_with_backoff(&fast(), "rate_limited", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AgentError::RateLimited {
                        api: "openai".into(),
                        retry_after: Some(Duration::from_millis(30)),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
