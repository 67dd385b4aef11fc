use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::job::{ExtractionJob, JobStatus, TokenUsage};
use crate::models::menu::{MenuExtraction, SuperfluousText, UncertainItem};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// Field bundle persisted when a job completes.
#[derive(Debug, Clone)]
pub struct CompletedUpdate {
    pub result: MenuExtraction,
    pub processing_ms: i64,
    pub token_usage: TokenUsage,
    pub overall_confidence: f64,
    pub uncertain_items: Vec<UncertainItem>,
    pub superfluous_text: Vec<SuperfluousText>,
}

/// Row slice the metrics collector aggregates over.
#[derive(Debug, Clone)]
pub struct JobMetricsRow {
    pub status: JobStatus,
    pub processing_ms: Option<i64>,
    pub overall_confidence: Option<f64>,
    pub cost: Option<f64>,
    pub uncertain_count: usize,
}

/// Completed-job slice used for spending summaries.
#[derive(Debug, Clone)]
pub struct CompletedJobRow {
    pub cost: f64,
    pub completed_at: DateTime<Utc>,
}

/// One completed extraction folded into the per-version daily aggregate.
#[derive(Debug, Clone)]
pub struct DailyMetricsUpdate {
    pub prompt_version: String,
    pub schema_version: String,
    pub date: NaiveDate,
    pub confidence: f64,
    pub processing_ms: i64,
    pub total_tokens: u32,
    pub cost: f64,
}

/// Narrow persistence seam for extraction jobs and their aggregates.
///
/// The core never depends on a specific backend's query shape; production
/// uses [`postgres::PgStore`](crate::db::postgres::PgStore), tests and dev
/// use [`memory::MemoryStore`](crate::db::memory::MemoryStore).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ExtractionJob) -> Result<(), StoreError>;

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError>;

    async fn update_completed(
        &self,
        job_id: Uuid,
        update: &CompletedUpdate,
    ) -> Result<(), StoreError>;

    async fn update_failed(
        &self,
        job_id: Uuid,
        error: &str,
        increment_retry: bool,
    ) -> Result<(), StoreError>;

    /// Reset a completed-but-unusable job for a fresh run on the same row,
    /// clearing its result and error.
    async fn requeue_stale(&self, job_id: Uuid) -> Result<ExtractionJob, StoreError>;

    /// Most recent job for the (user, content hash) idempotency key.
    async fn find_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<ExtractionJob>, StoreError>;

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExtractionJob>, StoreError>;

    /// Jobs created by the user at or after `since` (quota and rate limiting).
    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Plan limit on extractions per calendar month; −1 means unlimited.
    async fn monthly_limit(&self, user_id: &str) -> Result<i64, StoreError>;

    /// Sum of completed-job cost in a window, per user or globally.
    async fn completed_cost_since(
        &self,
        user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    /// Completed jobs for one user since `since`, for spending summaries.
    async fn completed_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletedJobRow>, StoreError>;

    /// All jobs created in [start, end], for overall metrics.
    async fn jobs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobMetricsRow>, StoreError>;

    /// Fold one completed extraction into the per-(prompt, schema, date)
    /// aggregate row.
    async fn upsert_daily_metrics(&self, update: &DailyMetricsUpdate) -> Result<(), StoreError>;
}
