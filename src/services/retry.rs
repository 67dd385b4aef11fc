use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

/// Typed transport-level error surfaced by the vision backend and the image
/// resolver, carrying enough detail for the error classifier.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub code: Option<String>,
}

impl HttpError {
    pub fn status(status: u16, message: impl Into<String>, body: Option<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            body,
            code: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            body: None,
            code: Some("network".to_string()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            body: None,
            code: Some("timeout".to_string()),
        }
    }

    /// Transient failures worth retrying: request timeout, rate limiting,
    /// upstream 5xx, or a network/timeout condition with no status at all.
    pub fn is_transient(&self) -> bool {
        match self.status {
            Some(status) => status == 408 || status == 429 || (500..=599).contains(&status),
            None => matches!(self.code.as_deref(), Some("network") | Some("timeout")),
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::timeout(err.to_string())
        } else if let Some(status) = err.status() {
            HttpError::status(status.as_u16(), err.to_string(), None)
        } else {
            HttpError::network(err.to_string())
        }
    }
}

/// Bounded-retry policy with capped exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Ceiling on a single attempt, enforced with tokio's timeout.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (1-based), with jitter up to half the
    /// computed delay.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter_ms = fastrand::u64(0..=exp.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` under the policy, retrying only transient failures. Each attempt
/// is bounded by the policy's attempt timeout; non-transient errors propagate
/// immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, HttpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let mut attempt = 1u32;
    loop {
        let result = match timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::timeout(format!(
                "{label}: attempt timed out after {}s",
                policy.attempt_timeout.as_secs()
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off before retry"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_transient_predicate() {
        assert!(HttpError::status(429, "rate limited", None).is_transient());
        assert!(HttpError::status(503, "unavailable", None).is_transient());
        assert!(HttpError::status(408, "timeout", None).is_transient());
        assert!(HttpError::network("connection reset").is_transient());
        assert!(HttpError::timeout("deadline").is_transient());
        assert!(!HttpError::status(400, "bad request", None).is_transient());
        assert!(!HttpError::status(401, "unauthorized", None).is_transient());
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&quick_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HttpError::status(503, "unavailable", None))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&quick_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HttpError::status(401, "unauthorized", None)) }
        })
        .await;

        assert_eq!(result.unwrap_err().status, Some(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&quick_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HttpError::status(500, "boom", None)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
