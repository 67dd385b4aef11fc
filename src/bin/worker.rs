use menu_extract::{
    config::AppConfig,
    db::{self, postgres::PgStore, repository::JobStore},
    services::{
        jobs::JobManager,
        metrics::MetricsCollector,
        pipeline::{ExtractionPipeline, PipelineOutcome},
        queue::JobQueue,
        storage::ImageStore,
        vision::{ImageResolver, OpenAiBackend, VisionClient},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

struct Worker {
    queue: JobQueue,
    jobs: Arc<JobManager>,
    pipeline: ExtractionPipeline,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting menu extraction worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    let store: Arc<dyn JobStore> = Arc::new(PgStore::new(db_pool));

    // Initialize services
    tracing::info!("Initializing services");
    let storage = ImageStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize image storage client");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let backend = OpenAiBackend::new(
        &config.openai_api_key,
        &config.openai_base_url,
        &config.vision_model,
    );
    let vision = Arc::new(VisionClient::new(
        Arc::new(backend),
        ImageResolver::new(Some(Arc::new(storage))),
    ));

    let jobs = Arc::new(JobManager::new(store.clone()));
    let collector = Arc::new(MetricsCollector::new(store));
    let pipeline = ExtractionPipeline::new(jobs.clone(), vision, collector);

    let worker = Worker {
        queue,
        jobs,
        pipeline,
    };

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop: one job at a time, to completion.
    loop {
        match process_next_job(&worker).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next job from the dispatch queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(worker: &Worker) -> Result<bool, Box<dyn std::error::Error>> {
    let queued = match worker.queue.dequeue().await? {
        Some(q) => q,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %queued.job_id,
        user_id = %queued.user_id,
        "Processing extraction job"
    );

    let job = match worker.jobs.get_job(queued.job_id, None).await {
        Ok(job) => job,
        Err(e) => {
            // A dispatch entry without a row is dropped; the row is the
            // source of truth.
            tracing::error!(job_id = %queued.job_id, error = %e, "Dequeued job has no row");
            worker.queue.complete(&queued).await?;
            return Ok(true);
        }
    };

    match worker.pipeline.process(&job).await {
        Ok(PipelineOutcome::Completed { tier, partial, .. }) => {
            tracing::info!(
                job_id = %job.id,
                tier = %tier,
                partial,
                "Job completed"
            );
        }
        Ok(PipelineOutcome::DowngradedIncomplete) => {
            tracing::warn!(job_id = %job.id, "Job produced no usable tree, left in processing");
        }
        Ok(PipelineOutcome::Failed { classified }) => {
            tracing::warn!(
                job_id = %job.id,
                category = %classified.category,
                retryable = classified.retryable,
                "Job failed"
            );
        }
        Err(e) => {
            // Repository failure mid-pipeline: the job row could not be
            // settled. Surface it, leave the row as-is.
            tracing::error!(job_id = %job.id, error = %e, "Pipeline could not settle job row");
        }
    }

    worker.queue.complete(&queued).await?;

    if let Ok(depth) = worker.queue.queue_depth().await {
        metrics::gauge!("extraction_queue_depth").set(depth as f64);
    }

    Ok(true)
}
