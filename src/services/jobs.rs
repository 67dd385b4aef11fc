use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::repository::{CompletedUpdate, JobStore, StoreError};
use crate::models::job::{ExtractionJob, JobStatus, SchemaVersion};
use crate::services::cost::start_of_month;
use crate::services::prompt::CURRENT_PROMPT_VERSION;

/// A job may be retried this many times before manual entry is the only path.
pub const MAX_RETRY_COUNT: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found")]
    NotFound,

    #[error("job is not in a retryable state (status: {0})")]
    InvalidStatus(JobStatus),

    #[error("retry limit of {MAX_RETRY_COUNT} reached")]
    MaxRetriesExceeded,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Stable code exposed through the API.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::NotFound => "JOB_NOT_FOUND",
            JobError::InvalidStatus(_) => "INVALID_STATUS",
            JobError::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            JobError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub schema_version: Option<SchemaVersion>,
    pub prompt_version: Option<String>,
    /// Bypass the idempotency cache lookup.
    pub force: bool,
}

/// Result of a submission: the job plus whether it was served from cache.
#[derive(Debug)]
pub struct Submission {
    pub job: ExtractionJob,
    pub cached: bool,
}

#[derive(Debug)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u64,
    /// −1 means unlimited.
    pub limit: i64,
}

#[derive(Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u32,
    pub resets_at: Option<DateTime<Utc>>,
}

/// What `mark_job_completed` actually did with the proposed result.
#[derive(Debug, PartialEq)]
pub enum CompletionOutcome {
    Completed,
    /// The proposed result had no usable category tree; the job stays in
    /// processing instead of being marked done with garbage.
    DowngradedIncomplete,
}

/// Owns the job lifecycle: idempotent submission, status transitions, retry
/// creation, and the quota/rate-limit gates.
pub struct JobManager {
    store: Arc<dyn JobStore>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Submit an extraction. A prior completed job for the same
    /// (user, content hash) with a usable result is returned as a cache hit;
    /// a completed job with a missing or unrecognized result is re-queued on
    /// its own row; anything else gets a fresh job.
    pub async fn submit_job(
        &self,
        user_id: &str,
        image_ref: &str,
        content_hash: &str,
        options: SubmitOptions,
    ) -> Result<Submission, JobError> {
        if !options.force {
            if let Some(prior) = self.store.find_by_hash(user_id, content_hash).await? {
                if prior.has_usable_result() {
                    tracing::info!(
                        job_id = %prior.id,
                        user_id,
                        "Returning cached extraction for known content hash"
                    );
                    return Ok(Submission {
                        job: prior,
                        cached: true,
                    });
                }
                if prior.status == JobStatus::Completed {
                    // Completed but the stored result is unusable: re-run on
                    // the same row rather than creating a duplicate.
                    tracing::warn!(
                        job_id = %prior.id,
                        user_id,
                        "Completed job has a stale result, re-queueing it"
                    );
                    let job = self.store.requeue_stale(prior.id).await?;
                    return Ok(Submission { job, cached: false });
                }
            }
        }

        let job = ExtractionJob::new(
            user_id,
            image_ref,
            content_hash,
            options.schema_version.unwrap_or(SchemaVersion::V2),
            options
                .prompt_version
                .unwrap_or_else(|| CURRENT_PROMPT_VERSION.to_string()),
        );
        self.store.insert_job(&job).await?;
        tracing::info!(job_id = %job.id, user_id, "Created extraction job");
        Ok(Submission { job, cached: false })
    }

    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
    ) -> Result<(), JobError> {
        self.store.update_status(job_id, status).await?;
        Ok(())
    }

    /// Look up a job, optionally scoped to its owner.
    pub async fn get_job(
        &self,
        job_id: Uuid,
        user_id: Option<&str>,
    ) -> Result<ExtractionJob, JobError> {
        self.store
            .find_by_id(job_id)
            .await?
            .filter(|j| user_id.is_none_or(|u| j.user_id == u))
            .ok_or(JobError::NotFound)
    }

    /// Persist a finished extraction. A result without a usable category
    /// tree is not accepted as completion.
    pub async fn mark_job_completed(
        &self,
        job_id: Uuid,
        update: CompletedUpdate,
    ) -> Result<CompletionOutcome, JobError> {
        if !update.result.has_categories() {
            tracing::warn!(
                job_id = %job_id,
                "Refusing to complete job with an empty category tree"
            );
            self.store.update_status(job_id, JobStatus::Processing).await?;
            return Ok(CompletionOutcome::DowngradedIncomplete);
        }

        self.store.update_completed(job_id, &update).await?;
        Ok(CompletionOutcome::Completed)
    }

    pub async fn mark_job_failed(
        &self,
        job_id: Uuid,
        message: &str,
        increment_retry: bool,
    ) -> Result<(), JobError> {
        self.store
            .update_failed(job_id, message, increment_retry)
            .await?;
        Ok(())
    }

    /// Create a fresh job row for a failed extraction, carrying the image
    /// reference, hash, and versions forward with an incremented retry count.
    pub async fn retry_job(&self, job_id: Uuid, user_id: &str) -> Result<ExtractionJob, JobError> {
        let prior = self
            .store
            .find_by_id(job_id)
            .await?
            .filter(|j| j.user_id == user_id)
            .ok_or(JobError::NotFound)?;

        if prior.status != JobStatus::Failed {
            return Err(JobError::InvalidStatus(prior.status));
        }
        if prior.retry_count >= MAX_RETRY_COUNT {
            return Err(JobError::MaxRetriesExceeded);
        }

        let mut job = ExtractionJob::new(
            &prior.user_id,
            &prior.image_ref,
            &prior.content_hash,
            prior.schema_version,
            &prior.prompt_version,
        );
        job.retry_count = prior.retry_count + 1;
        self.store.insert_job(&job).await?;

        tracing::info!(
            job_id = %job.id,
            previous = %prior.id,
            retry_count = job.retry_count,
            "Created retry job"
        );
        Ok(job)
    }

    /// Plan-quota gate: jobs created since the start of the calendar month
    /// against the user's plan limit (−1 means unlimited).
    pub async fn check_quota(&self, user_id: &str) -> Result<QuotaDecision, JobError> {
        let limit = self.store.monthly_limit(user_id).await?;
        if limit < 0 {
            return Ok(QuotaDecision {
                allowed: true,
                used: 0,
                limit,
            });
        }
        let used = self
            .store
            .count_created_since(user_id, start_of_month())
            .await?;
        Ok(QuotaDecision {
            allowed: used < limit as u64,
            used,
            limit,
        })
    }

    /// Trailing-hour rate limit. A denial includes the moment the window
    /// resets.
    pub async fn check_rate_limit(
        &self,
        user_id: &str,
        limit_per_hour: u32,
    ) -> Result<RateLimitDecision, JobError> {
        let now = Utc::now();
        let count = self
            .store
            .count_created_since(user_id, now - Duration::hours(1))
            .await?;
        let allowed = count < u64::from(limit_per_hour);
        Ok(RateLimitDecision {
            allowed,
            count,
            limit: limit_per_hour,
            resets_at: (!allowed).then(|| now + Duration::hours(1)),
        })
    }
}
