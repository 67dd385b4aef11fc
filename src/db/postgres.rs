//! Postgres implementation of the job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::repository::{
    CompletedJobRow, CompletedUpdate, DailyMetricsUpdate, JobMetricsRow, JobStore, StoreError,
};
use crate::models::job::{ExtractionJob, JobStatus, SchemaVersion, TokenUsage};

const JOB_COLUMNS: &str = "id, user_id, image_ref, content_hash, status, schema_version, \
     prompt_version, result, error, retry_count, input_tokens, output_tokens, total_tokens, \
     estimated_cost, overall_confidence, uncertain_items, superfluous_text, created_at, \
     completed_at, processing_ms";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<ExtractionJob, sqlx::Error> {
    let status = match row.try_get::<String, _>("status")?.as_str() {
        "processing" => JobStatus::Processing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Queued,
    };
    let schema_version = match row.try_get::<String, _>("schema_version")?.as_str() {
        "v1" => SchemaVersion::V1,
        _ => SchemaVersion::V2,
    };

    // A result that no longer deserializes against the menu shape reads as
    // absent, which the manager treats as reusable-but-stale.
    let result = row
        .try_get::<Option<serde_json::Value>, _>("result")?
        .and_then(|v| serde_json::from_value(v).ok());

    let token_usage = match (
        row.try_get::<Option<i64>, _>("input_tokens")?,
        row.try_get::<Option<i64>, _>("output_tokens")?,
        row.try_get::<Option<i64>, _>("total_tokens")?,
        row.try_get::<Option<f64>, _>("estimated_cost")?,
    ) {
        (Some(input), Some(output), Some(total), Some(cost)) => Some(TokenUsage {
            input_tokens: input as u32,
            output_tokens: output as u32,
            total_tokens: total as u32,
            estimated_cost: cost,
        }),
        _ => None,
    };

    Ok(ExtractionJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        image_ref: row.try_get("image_ref")?,
        content_hash: row.try_get("content_hash")?,
        status,
        schema_version,
        prompt_version: row.try_get("prompt_version")?,
        result,
        error: row.try_get("error")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        processing_ms: row.try_get("processing_ms")?,
        token_usage,
        overall_confidence: row.try_get("overall_confidence")?,
        uncertain_items: row
            .try_get::<Option<serde_json::Value>, _>("uncertain_items")?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        superfluous_text: row
            .try_get::<Option<serde_json::Value>, _>("superfluous_text")?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
    })
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &ExtractionJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO extraction_jobs
                (id, user_id, image_ref, content_hash, status, schema_version, prompt_version,
                 retry_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(&job.user_id)
        .bind(&job.image_ref)
        .bind(&job.content_hash)
        .bind(status_str(job.status))
        .bind(job.schema_version.to_string())
        .bind(&job.prompt_version)
        .bind(job.retry_count)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE extraction_jobs SET status = $1 WHERE id = $2")
            .bind(status_str(status))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_completed(
        &self,
        job_id: Uuid,
        update: &CompletedUpdate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'completed',
                result = $1,
                error = NULL,
                processing_ms = $2,
                input_tokens = $3,
                output_tokens = $4,
                total_tokens = $5,
                estimated_cost = $6,
                overall_confidence = $7,
                uncertain_items = $8,
                superfluous_text = $9,
                completed_at = NOW()
            WHERE id = $10
            "#,
        )
        .bind(serde_json::to_value(&update.result).map_err(|e| StoreError::Other(e.to_string()))?)
        .bind(update.processing_ms)
        .bind(i64::from(update.token_usage.input_tokens))
        .bind(i64::from(update.token_usage.output_tokens))
        .bind(i64::from(update.token_usage.total_tokens))
        .bind(update.token_usage.estimated_cost)
        .bind(update.overall_confidence)
        .bind(
            serde_json::to_value(&update.uncertain_items)
                .map_err(|e| StoreError::Other(e.to_string()))?,
        )
        .bind(
            serde_json::to_value(&update.superfluous_text)
                .map_err(|e| StoreError::Other(e.to_string()))?,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_failed(
        &self,
        job_id: Uuid,
        error: &str,
        increment_retry: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'failed',
                error = $1,
                retry_count = retry_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                completed_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(error)
        .bind(increment_retry)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_stale(&self, job_id: Uuid) -> Result<ExtractionJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE extraction_jobs
            SET status = 'queued',
                result = NULL,
                error = NULL,
                completed_at = NULL,
                processing_ms = NULL
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(job_from_row(&row)?)
    }

    async fn find_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<ExtractionJob>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM extraction_jobs
            WHERE user_id = $1 AND content_hash = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        ))
        .bind(user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose().map_err(Into::into)
    }

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExtractionJob>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs WHERE id = $1",
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose().map_err(Into::into)
    }

    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM extraction_jobs WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn monthly_limit(&self, user_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT monthly_extraction_limit FROM user_plans WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => i64::from(r.try_get::<i32, _>("monthly_extraction_limit")?),
            None => -1,
        })
    }

    async fn completed_cost_since(
        &self,
        user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let row = match user_id {
            Some(user) => {
                sqlx::query(
                    r#"
                    SELECT COALESCE(SUM(estimated_cost), 0) AS total
                    FROM extraction_jobs
                    WHERE status = 'completed' AND user_id = $1 AND completed_at >= $2
                    "#,
                )
                .bind(user)
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT COALESCE(SUM(estimated_cost), 0) AS total
                    FROM extraction_jobs
                    WHERE status = 'completed' AND completed_at >= $1
                    "#,
                )
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(row.try_get("total")?)
    }

    async fn completed_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletedJobRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(estimated_cost, 0) AS cost, completed_at
            FROM extraction_jobs
            WHERE status = 'completed' AND user_id = $1 AND completed_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(CompletedJobRow {
                    cost: r.try_get("cost")?,
                    completed_at: r.try_get("completed_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn jobs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobMetricsRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, processing_ms, overall_confidence, estimated_cost,
                   COALESCE(jsonb_array_length(uncertain_items), 0) AS uncertain_count
            FROM extraction_jobs
            WHERE created_at >= $1 AND created_at <= $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let status = match r.try_get::<String, _>("status")?.as_str() {
                    "processing" => JobStatus::Processing,
                    "completed" => JobStatus::Completed,
                    "failed" => JobStatus::Failed,
                    _ => JobStatus::Queued,
                };
                Ok(JobMetricsRow {
                    status,
                    processing_ms: r.try_get("processing_ms")?,
                    overall_confidence: r.try_get("overall_confidence")?,
                    cost: r.try_get("estimated_cost")?,
                    uncertain_count: r.try_get::<i32, _>("uncertain_count")? as usize,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn upsert_daily_metrics(&self, update: &DailyMetricsUpdate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO extraction_metrics
                (prompt_version, schema_version, date, extraction_count,
                 avg_confidence, avg_processing_ms, avg_total_tokens, avg_cost)
            VALUES ($1, $2, $3, 1, $4, $5, $6, $7)
            ON CONFLICT (prompt_version, schema_version, date) DO UPDATE SET
                avg_confidence = (extraction_metrics.avg_confidence
                    * extraction_metrics.extraction_count + EXCLUDED.avg_confidence)
                    / (extraction_metrics.extraction_count + 1),
                avg_processing_ms = (extraction_metrics.avg_processing_ms
                    * extraction_metrics.extraction_count + EXCLUDED.avg_processing_ms)
                    / (extraction_metrics.extraction_count + 1),
                avg_total_tokens = (extraction_metrics.avg_total_tokens
                    * extraction_metrics.extraction_count + EXCLUDED.avg_total_tokens)
                    / (extraction_metrics.extraction_count + 1),
                avg_cost = (extraction_metrics.avg_cost
                    * extraction_metrics.extraction_count + EXCLUDED.avg_cost)
                    / (extraction_metrics.extraction_count + 1),
                extraction_count = extraction_metrics.extraction_count + 1
            "#,
        )
        .bind(&update.prompt_version)
        .bind(&update.schema_version)
        .bind(update.date)
        .bind(update.confidence)
        .bind(update.processing_ms as f64)
        .bind(f64::from(update.total_tokens))
        .bind(update.cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
