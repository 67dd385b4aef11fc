use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{ExtractionJob, SchemaVersion};

/// Request to submit a menu photo for extraction.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitExtractionRequest {
    #[garde(length(min = 1, max = 128))]
    pub user_id: String,

    /// Storage key or URL of the uploaded menu photo.
    #[garde(length(min = 1, max = 2048))]
    pub image_ref: String,

    /// Deterministic digest of the image bytes, used as the idempotency key.
    #[garde(length(min = 16, max = 128))]
    pub content_hash: String,

    #[garde(skip)]
    pub schema_version: Option<SchemaVersion>,

    #[garde(length(max = 64))]
    pub prompt_version: Option<String>,

    /// Bypass the idempotency cache lookup.
    #[garde(skip)]
    #[serde(default)]
    pub force: bool,
}

/// Response after submitting a menu for extraction.
#[derive(Debug, Serialize)]
pub struct SubmitExtractionResponse {
    pub job: ExtractionJob,
    /// True when an earlier completed job for the same image was returned
    /// instead of running a new extraction.
    pub cached: bool,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job: ExtractionJob,
}

/// Error envelope returned to API clients. Always derived from a classified
/// error, never a raw internal message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}
