use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::models::api::ApiError;
use crate::services::retry::HttpError;
use crate::services::vision::VisionError;

/// Failure taxonomy every surfaced error maps into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    ApiError,
    ValidationError,
    ImageQuality,
    QuotaExceeded,
    InvalidInput,
    UnknownError,
}

/// Recommended next action once an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FallbackMode {
    Retry,
    ManualEntry,
}

/// A classified failure: taxonomy entry, retryability, and user guidance.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackMode>,
    pub message: String,
    pub guidance: Vec<String>,
}

impl ClassifiedError {
    /// The {title, message, actions} tuple shown to users. Raw internal
    /// messages never leave through this path.
    pub fn user_response(&self) -> ApiError {
        let title = match self.category {
            ErrorCategory::ApiError => "Extraction service unavailable",
            ErrorCategory::ValidationError => "Extraction needs another pass",
            ErrorCategory::ImageQuality => "Image quality too low",
            ErrorCategory::QuotaExceeded => "Limit reached",
            ErrorCategory::InvalidInput => "Image could not be processed",
            ErrorCategory::UnknownError => "Something went wrong",
        };
        ApiError {
            code: self.category.to_string().to_uppercase(),
            title: title.to_string(),
            message: self.message.clone(),
            actions: self.guidance.clone(),
            retry_after: self.retry_after,
            resets_at: None,
        }
    }
}

/// Map an HTTP-layer failure from the vision backend into the taxonomy.
pub fn classify_http(err: &HttpError) -> ClassifiedError {
    match err.status {
        Some(429) => ClassifiedError {
            category: ErrorCategory::ApiError,
            retryable: true,
            retry_after: Some(retry_after_hint(err).unwrap_or(60)),
            fallback: Some(FallbackMode::Retry),
            message: "The extraction service is busy. Your menu will be retried shortly."
                .to_string(),
            guidance: vec![
                "Wait a minute and retry the extraction".to_string(),
                "Your photo is saved; no need to re-upload".to_string(),
            ],
        },
        Some(500) | Some(502) | Some(503) | Some(504) => ClassifiedError {
            category: ErrorCategory::ApiError,
            retryable: true,
            retry_after: Some(30),
            fallback: Some(FallbackMode::Retry),
            message: "The extraction service had a temporary problem.".to_string(),
            guidance: vec!["Retry the extraction in about half a minute".to_string()],
        },
        Some(400) if mentions_size_limit(err) => ClassifiedError {
            category: ErrorCategory::InvalidInput,
            retryable: false,
            retry_after: None,
            fallback: Some(FallbackMode::ManualEntry),
            message: "This menu image is too large or dense to process automatically."
                .to_string(),
            guidance: vec![
                "Split the menu into several photos and submit them separately".to_string(),
                "Or enter the menu manually".to_string(),
            ],
        },
        Some(400) => ClassifiedError {
            category: ErrorCategory::InvalidInput,
            retryable: false,
            retry_after: None,
            fallback: None,
            message: "The extraction request was rejected as malformed.".to_string(),
            guidance: vec!["Re-upload the photo and try again".to_string()],
        },
        Some(401) | Some(403) => ClassifiedError {
            category: ErrorCategory::ApiError,
            retryable: false,
            retry_after: None,
            fallback: Some(FallbackMode::ManualEntry),
            message: "The extraction service rejected our credentials.".to_string(),
            guidance: vec![
                "This is a configuration problem on our side".to_string(),
                "Enter the menu manually while we fix it".to_string(),
            ],
        },
        None if err.is_transient() => ClassifiedError {
            category: ErrorCategory::ApiError,
            retryable: true,
            retry_after: Some(30),
            fallback: Some(FallbackMode::Retry),
            message: "We could not reach the extraction service.".to_string(),
            guidance: vec!["Check your connection and retry".to_string()],
        },
        _ => unknown_error(),
    }
}

/// Map a vision-client failure (transport, parse, or image resolution).
pub fn classify_vision(err: &VisionError) -> ClassifiedError {
    match err {
        VisionError::Http(http) => classify_http(http),
        VisionError::Parse(_) => ClassifiedError {
            category: ErrorCategory::ValidationError,
            retryable: true,
            retry_after: None,
            fallback: Some(FallbackMode::Retry),
            message: "The model's reply could not be read as menu data.".to_string(),
            guidance: vec!["Retry the extraction".to_string()],
        },
        VisionError::Image(_) => ClassifiedError {
            category: ErrorCategory::InvalidInput,
            retryable: false,
            retry_after: None,
            fallback: Some(FallbackMode::ManualEntry),
            message: "The uploaded photo could not be read.".to_string(),
            guidance: vec!["Re-upload the photo and try again".to_string()],
        },
    }
}

/// Classify the outcome of a failed validation given how much salvage
/// recovered. Any recovery is treated as a partial success rather than a
/// failure, so usable data is never discarded.
pub fn classify_validation(items_recovered: usize) -> ClassifiedError {
    if items_recovered > 0 {
        ClassifiedError {
            category: ErrorCategory::ValidationError,
            retryable: false,
            retry_after: None,
            fallback: None,
            message: format!(
                "Extraction finished with partial results ({items_recovered} items recovered). \
                 Please review them."
            ),
            guidance: vec![
                "Review the recovered items".to_string(),
                "Add anything that was missed".to_string(),
            ],
        }
    } else {
        ClassifiedError {
            category: ErrorCategory::ValidationError,
            retryable: true,
            retry_after: None,
            fallback: Some(FallbackMode::Retry),
            message: "The extraction result did not match the expected structure.".to_string(),
            guidance: vec!["Retry the extraction, possibly with a clearer photo".to_string()],
        }
    }
}

/// Confidence too low to trust the extraction at all.
pub fn image_quality(message: impl Into<String>) -> ClassifiedError {
    ClassifiedError {
        category: ErrorCategory::ImageQuality,
        retryable: false,
        retry_after: None,
        fallback: Some(FallbackMode::ManualEntry),
        message: message.into(),
        guidance: vec![
            "Retake the photo with better lighting and focus".to_string(),
            "Or enter the menu manually".to_string(),
        ],
    }
}

/// Plan-quota denial.
pub fn quota_exceeded(used: u64, limit: i64) -> ClassifiedError {
    ClassifiedError {
        category: ErrorCategory::QuotaExceeded,
        retryable: false,
        retry_after: None,
        fallback: Some(FallbackMode::ManualEntry),
        message: format!("You have used {used} of {limit} extractions this month."),
        guidance: vec![
            "Upgrade your plan for more extractions".to_string(),
            "Or enter the menu manually".to_string(),
        ],
    }
}

/// Hourly rate-limit denial, with the moment the window resets.
pub fn rate_limited(resets_at: DateTime<Utc>) -> ClassifiedError {
    let wait = (resets_at - Utc::now()).num_seconds().max(0) as u64;
    ClassifiedError {
        category: ErrorCategory::QuotaExceeded,
        retryable: true,
        retry_after: Some(wait),
        fallback: Some(FallbackMode::Retry),
        message: "Too many extractions in the last hour.".to_string(),
        guidance: vec!["Wait for the rate limit window to reset".to_string()],
    }
}

/// Spend-cap denial from the cost monitor.
pub fn budget_denied(reason: &str) -> ClassifiedError {
    ClassifiedError {
        category: ErrorCategory::QuotaExceeded,
        retryable: false,
        retry_after: None,
        fallback: Some(FallbackMode::ManualEntry),
        message: reason.to_string(),
        guidance: vec![
            "Extractions resume when the spending window rolls over".to_string(),
            "Or enter the menu manually".to_string(),
        ],
    }
}

fn unknown_error() -> ClassifiedError {
    ClassifiedError {
        category: ErrorCategory::UnknownError,
        retryable: false,
        retry_after: None,
        fallback: Some(FallbackMode::ManualEntry),
        message: "An unexpected error interrupted the extraction.".to_string(),
        guidance: vec![
            "Try again later".to_string(),
            "Enter the menu manually if the problem persists".to_string(),
        ],
    }
}

/// Pull a backoff hint out of a 429 response body, if the provider sent one.
fn retry_after_hint(err: &HttpError) -> Option<u64> {
    let body = err.body.as_deref()?;
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after")
        .or_else(|| value.get("error").and_then(|e| e.get("retry_after")))
        .and_then(Value::as_f64)
        .filter(|s| *s > 0.0)
        .map(|s| s.ceil() as u64)
}

fn mentions_size_limit(err: &HttpError) -> bool {
    let haystack = format!(
        "{} {}",
        err.message.to_lowercase(),
        err.body.as_deref().unwrap_or("").to_lowercase()
    );
    ["token", "too large", "size limit", "maximum context"]
        .iter()
        .any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_retryable_with_hint() {
        let err = HttpError::status(429, "rate limited", Some(r#"{"retry_after": 12}"#.into()));
        let classified = classify_http(&err);
        assert_eq!(classified.category, ErrorCategory::ApiError);
        assert!(classified.retryable);
        assert_eq!(classified.retry_after, Some(12));
    }

    #[test]
    fn test_429_defaults_to_sixty_seconds() {
        let err = HttpError::status(429, "rate limited", None);
        assert_eq!(classify_http(&err).retry_after, Some(60));
    }

    #[test]
    fn test_5xx_is_retryable() {
        for status in [500, 502, 503, 504] {
            let classified = classify_http(&HttpError::status(status, "upstream", None));
            assert_eq!(classified.category, ErrorCategory::ApiError);
            assert!(classified.retryable);
            assert_eq!(classified.retry_after, Some(30));
        }
    }

    #[test]
    fn test_auth_errors_route_to_manual_entry() {
        for status in [401, 403] {
            let classified = classify_http(&HttpError::status(status, "denied", None));
            assert_eq!(classified.category, ErrorCategory::ApiError);
            assert!(!classified.retryable);
            assert_eq!(classified.fallback, Some(FallbackMode::ManualEntry));
        }
    }

    #[test]
    fn test_400_token_limit_is_invalid_input() {
        let err = HttpError::status(400, "bad request", Some("maximum context length".into()));
        let classified = classify_http(&err);
        assert_eq!(classified.category, ErrorCategory::InvalidInput);
        assert!(!classified.retryable);
        assert_eq!(classified.fallback, Some(FallbackMode::ManualEntry));

        let plain = classify_http(&HttpError::status(400, "bad request", None));
        assert_eq!(plain.category, ErrorCategory::InvalidInput);
        assert_eq!(plain.fallback, None);
    }

    #[test]
    fn test_network_errors_are_transient_api_errors() {
        let classified = classify_http(&HttpError::network("connection reset"));
        assert_eq!(classified.category, ErrorCategory::ApiError);
        assert!(classified.retryable);
    }

    #[test]
    fn test_validation_with_recovery_is_partial_success() {
        let partial = classify_validation(3);
        assert!(!partial.retryable);
        assert!(partial.message.contains("partial results"));

        let empty = classify_validation(0);
        assert!(empty.retryable);
        assert_eq!(empty.fallback, Some(FallbackMode::Retry));
    }

    #[test]
    fn test_user_response_shape() {
        let response = classify_http(&HttpError::status(429, "busy", None)).user_response();
        assert_eq!(response.code, "API_ERROR");
        assert!(!response.title.is_empty());
        assert!(!response.actions.is_empty());
    }
}
