use std::sync::Arc;
use std::time::Instant;

use crate::db::repository::CompletedUpdate;
use crate::models::job::{ExtractionJob, JobStatus};
use crate::services::classify::{self, ClassifiedError};
use crate::services::jobs::{CompletionOutcome, JobError, JobManager};
use crate::services::metrics::MetricsCollector;
use crate::services::quality::{self, QualityTier};
use crate::services::schema;
use crate::services::vision::VisionClient;

/// What processing one job came to.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed {
        tier: QualityTier,
        /// True when the result came out of salvage rather than a clean
        /// validation.
        partial: bool,
        requires_review: bool,
    },
    /// The model produced an empty tree; the job was not marked completed.
    DowngradedIncomplete,
    Failed {
        classified: ClassifiedError,
    },
}

/// Worker-side orchestration of one extraction job: model call, validation
/// or salvage, quality gate, completion, metrics. The job row is the error
/// sink; classified failures are persisted there rather than thrown past the
/// job boundary.
pub struct ExtractionPipeline {
    manager: Arc<JobManager>,
    vision: Arc<VisionClient>,
    metrics: Arc<MetricsCollector>,
}

impl ExtractionPipeline {
    pub fn new(
        manager: Arc<JobManager>,
        vision: Arc<VisionClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            manager,
            vision,
            metrics,
        }
    }

    pub async fn process(&self, job: &ExtractionJob) -> Result<PipelineOutcome, JobError> {
        self.manager
            .update_job_status(job.id, JobStatus::Processing)
            .await?;
        let started = Instant::now();

        let raw = match self.vision.invoke(&job.image_ref, job.schema_version).await {
            Ok(raw) => raw,
            Err(err) => {
                let classified = classify::classify_vision(&err);
                tracing::error!(
                    job_id = %job.id,
                    category = %classified.category,
                    error = %err,
                    "Extraction call failed"
                );
                return self.fail(job, classified).await;
            }
        };

        tracing::debug!(
            job_id = %job.id,
            profile = raw.profile,
            total_tokens = raw.usage.total_tokens,
            "Model returned a candidate result"
        );

        let (menu, partial) = match schema::validate(&raw.value, job.schema_version) {
            Ok(menu) => (menu, false),
            Err(issues) => {
                tracing::warn!(
                    job_id = %job.id,
                    issue_count = issues.len(),
                    first_issue = %issues[0],
                    "Validation failed, attempting salvage"
                );
                let report = schema::salvage(&raw.value, job.schema_version);
                if report.items_recovered == 0 {
                    return self.fail(job, classify::classify_validation(0)).await;
                }
                tracing::info!(
                    job_id = %job.id,
                    items_recovered = report.items_recovered,
                    categories_recovered = report.categories_recovered,
                    "Salvage recovered a partial result"
                );
                (report.menu, true)
            }
        };

        for warning in schema::warnings(&menu) {
            tracing::info!(job_id = %job.id, warning, "Extraction warning");
        }

        let assessment = quality::assess(&menu);
        let mut requires_review = partial;
        if let Some(issue) = quality::handle_image_quality_issue(&assessment) {
            if !issue.success {
                return self.fail(job, classify::image_quality(issue.message)).await;
            }
            requires_review = true;
        }

        let processing_ms = started.elapsed().as_millis() as i64;
        let outcome = self
            .manager
            .mark_job_completed(
                job.id,
                CompletedUpdate {
                    uncertain_items: menu.uncertain_items.clone(),
                    superfluous_text: menu.superfluous_text.clone(),
                    result: menu,
                    processing_ms,
                    token_usage: raw.usage,
                    overall_confidence: assessment.overall_confidence,
                },
            )
            .await?;

        if outcome == CompletionOutcome::DowngradedIncomplete {
            return Ok(PipelineOutcome::DowngradedIncomplete);
        }

        let completed = self.manager.get_job(job.id, None).await?;
        self.metrics.track_extraction(&completed).await;

        metrics::counter!("extraction_jobs_completed").increment(1);
        metrics::histogram!("extraction_processing_seconds")
            .record(processing_ms as f64 / 1000.0);

        tracing::info!(
            job_id = %job.id,
            confidence = assessment.overall_confidence,
            tier = %assessment.tier,
            partial,
            processing_ms,
            "Extraction job completed"
        );

        Ok(PipelineOutcome::Completed {
            tier: assessment.tier,
            partial,
            requires_review,
        })
    }

    async fn fail(
        &self,
        job: &ExtractionJob,
        classified: ClassifiedError,
    ) -> Result<PipelineOutcome, JobError> {
        self.manager
            .mark_job_failed(job.id, &classified.message, false)
            .await?;
        metrics::counter!("extraction_jobs_failed").increment(1);
        Ok(PipelineOutcome::Failed { classified })
    }
}
