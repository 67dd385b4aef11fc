use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::menu::{MenuExtraction, SuperfluousText, UncertainItem};

/// Status of an extraction job. Transitions are monotonic:
/// queued → processing → {completed, failed}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Structural contract the extraction result must satisfy. Stored on the job
/// at submission time; validation always uses this discriminant, never shape
/// sniffing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    V2,
}

/// Per-million-token prices for the vision model.
const INPUT_PRICE_PER_MILLION: f64 = 2.50;
const OUTPUT_PRICE_PER_MILLION: f64 = 10.00;

/// Token counts and the cost derived from them. Immutable once attached to a
/// job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
}

impl TokenUsage {
    /// Derive usage from raw counts using the fixed price table, rounding the
    /// cost to 4 decimals.
    pub fn from_counts(input_tokens: u32, output_tokens: u32) -> Self {
        let cost = f64::from(input_tokens) * INPUT_PRICE_PER_MILLION / 1_000_000.0
            + f64::from(output_tokens) * OUTPUT_PRICE_PER_MILLION / 1_000_000.0;
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated_cost: (cost * 10_000.0).round() / 10_000.0,
        }
    }
}

/// A menu extraction job.
///
/// Created by the job manager at submission, mutated only by the manager
/// (status, result, error, retry count), never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub user_id: String,
    pub image_ref: String,
    /// Deterministic digest of the uploaded image, used as the idempotency key.
    pub content_hash: String,
    pub status: JobStatus,
    pub schema_version: SchemaVersion,
    pub prompt_version: String,
    pub result: Option<MenuExtraction>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_ms: Option<i64>,
    pub token_usage: Option<TokenUsage>,
    pub overall_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncertain_items: Vec<UncertainItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superfluous_text: Vec<SuperfluousText>,
}

impl ExtractionJob {
    /// Fresh job in the queued state.
    pub fn new(
        user_id: impl Into<String>,
        image_ref: impl Into<String>,
        content_hash: impl Into<String>,
        schema_version: SchemaVersion,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            image_ref: image_ref.into(),
            content_hash: content_hash.into(),
            status: JobStatus::Queued,
            schema_version,
            prompt_version: prompt_version.into(),
            result: None,
            error: None,
            retry_count: 0,
            created_at: Utc::now(),
            completed_at: None,
            processing_ms: None,
            token_usage: None,
            overall_confidence: None,
            uncertain_items: Vec::new(),
            superfluous_text: Vec::new(),
        }
    }

    /// Whether the stored result is well-formed enough to serve from cache.
    pub fn has_usable_result(&self) -> bool {
        self.status == JobStatus::Completed
            && self.result.as_ref().is_some_and(MenuExtraction::has_categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_cost_rounding() {
        // 1000 input + 500 output: 0.0025 + 0.0050
        let usage = TokenUsage::from_counts(1000, 500);
        assert_eq!(usage.total_tokens, 1500);
        assert!((usage.estimated_cost - 0.0075).abs() < 1e-9);

        // Sub-4-decimal costs round away
        let usage = TokenUsage::from_counts(1, 1);
        assert!((usage.estimated_cost - 0.0000).abs() < 1e-9);
    }

    #[test]
    fn test_new_job_defaults() {
        let job = ExtractionJob::new("user-1", "menus/a.jpg", "abc123", SchemaVersion::V2, "v2.3");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert!(job.result.is_none());
        assert!(!job.has_usable_result());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!(serde_json::to_string(&SchemaVersion::V2).unwrap(), "\"v2\"");
    }
}
