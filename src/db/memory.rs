//! In-memory store implementation for tests and development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::repository::{
    CompletedJobRow, CompletedUpdate, DailyMetricsUpdate, JobMetricsRow, JobStore, StoreError,
};
use crate::models::job::{ExtractionJob, JobStatus};

/// Running aggregate for one (prompt version, schema version, date) cell.
#[derive(Debug, Clone, Default)]
pub struct DailyAggregate {
    pub extraction_count: u64,
    pub avg_confidence: f64,
    pub avg_processing_ms: f64,
    pub avg_total_tokens: f64,
    pub avg_cost: f64,
}

impl DailyAggregate {
    fn fold(&mut self, update: &DailyMetricsUpdate) {
        let n = self.extraction_count as f64;
        self.avg_confidence = (self.avg_confidence * n + update.confidence) / (n + 1.0);
        self.avg_processing_ms =
            (self.avg_processing_ms * n + update.processing_ms as f64) / (n + 1.0);
        self.avg_total_tokens =
            (self.avg_total_tokens * n + f64::from(update.total_tokens)) / (n + 1.0);
        self.avg_cost = (self.avg_cost * n + update.cost) / (n + 1.0);
        self.extraction_count += 1;
    }
}

/// In-memory job store. Data is lost on restart; not for production.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<Uuid, ExtractionJob>>,
    plan_limits: RwLock<HashMap<String, i64>>,
    metrics: RwLock<HashMap<(String, String, NaiveDate), DailyAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a user's monthly plan limit (default is unlimited).
    pub fn set_monthly_limit(&self, user_id: &str, limit: i64) {
        self.plan_limits
            .write()
            .unwrap()
            .insert(user_id.to_string(), limit);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    /// Aggregate cell for assertions in tests.
    pub fn metrics_cell(
        &self,
        prompt_version: &str,
        schema_version: &str,
        date: NaiveDate,
    ) -> Option<DailyAggregate> {
        self.metrics
            .read()
            .unwrap()
            .get(&(prompt_version.to_string(), schema_version.to_string(), date))
            .cloned()
    }

    fn with_job<T>(
        &self,
        job_id: Uuid,
        f: impl FnOnce(&mut ExtractionJob) -> T,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Other(format!("job {job_id} not found")))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &ExtractionJob) -> Result<(), StoreError> {
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        self.with_job(job_id, |job| job.status = status)
    }

    async fn update_completed(
        &self,
        job_id: Uuid,
        update: &CompletedUpdate,
    ) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(update.result.clone());
            job.error = None;
            job.processing_ms = Some(update.processing_ms);
            job.token_usage = Some(update.token_usage);
            job.overall_confidence = Some(update.overall_confidence);
            job.uncertain_items = update.uncertain_items.clone();
            job.superfluous_text = update.superfluous_text.clone();
            job.completed_at = Some(Utc::now());
        })
    }

    async fn update_failed(
        &self,
        job_id: Uuid,
        error: &str,
        increment_retry: bool,
    ) -> Result<(), StoreError> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            if increment_retry {
                job.retry_count += 1;
            }
            job.completed_at = Some(Utc::now());
        })
    }

    async fn requeue_stale(&self, job_id: Uuid) -> Result<ExtractionJob, StoreError> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Queued;
            job.result = None;
            job.error = None;
            job.completed_at = None;
            job.processing_ms = None;
            job.clone()
        })
    }

    async fn find_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<ExtractionJob>, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.user_id == user_id && j.content_hash == content_hash)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExtractionJob>, StoreError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.user_id == user_id && j.created_at >= since)
            .count() as u64)
    }

    async fn monthly_limit(&self, user_id: &str) -> Result<i64, StoreError> {
        Ok(*self.plan_limits.read().unwrap().get(user_id).unwrap_or(&-1))
    }

    async fn completed_cost_since(
        &self,
        user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .filter(|j| user_id.is_none_or(|u| j.user_id == u))
            .filter(|j| j.completed_at.is_some_and(|t| t >= since))
            .filter_map(|j| j.token_usage.map(|u| u.estimated_cost))
            .sum())
    }

    async fn completed_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletedJobRow>, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.user_id == user_id && j.status == JobStatus::Completed)
            .filter_map(|j| {
                let completed_at = j.completed_at.filter(|t| *t >= since)?;
                Some(CompletedJobRow {
                    cost: j.token_usage.map(|u| u.estimated_cost).unwrap_or(0.0),
                    completed_at,
                })
            })
            .collect())
    }

    async fn jobs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobMetricsRow>, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.created_at >= start && j.created_at <= end)
            .map(|j| JobMetricsRow {
                status: j.status,
                processing_ms: j.processing_ms,
                overall_confidence: j.overall_confidence,
                cost: j.token_usage.map(|u| u.estimated_cost),
                uncertain_count: j.uncertain_items.len(),
            })
            .collect())
    }

    async fn upsert_daily_metrics(&self, update: &DailyMetricsUpdate) -> Result<(), StoreError> {
        let key = (
            update.prompt_version.clone(),
            update.schema_version.clone(),
            update.date,
        );
        self.metrics
            .write()
            .unwrap()
            .entry(key)
            .or_default()
            .fold(update);
        Ok(())
    }
}
