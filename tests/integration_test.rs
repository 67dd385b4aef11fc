//! Integration test against live PostgreSQL and Redis instances.
//!
//! Requires DATABASE_URL and REDIS_URL (and the rest of the app config) in
//! the environment. Run with: cargo test --test integration_test -- --ignored

use std::sync::Arc;

use menu_extract::{
    config::AppConfig,
    db::{self, postgres::PgStore, repository::JobStore},
    models::job::{JobStatus, SchemaVersion},
    services::{
        jobs::{JobManager, SubmitOptions},
        queue::{JobQueue, QueuedExtraction},
    },
};
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let store: Arc<dyn JobStore> = Arc::new(PgStore::new(db_pool));
    let manager = JobManager::new(store.clone());
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");

    let content_hash = format!("it-{}", Uuid::new_v4());

    // 1. Submission creates a queued row
    let submission = manager
        .submit_job(
            "integration-test-user",
            "menus/integration.jpg",
            &content_hash,
            SubmitOptions {
                schema_version: Some(SchemaVersion::V2),
                ..SubmitOptions::default()
            },
        )
        .await
        .expect("Failed to submit job");

    assert!(!submission.cached);
    assert_eq!(submission.job.status, JobStatus::Queued);
    assert_eq!(submission.job.retry_count, 0);

    // 2. Row round-trips through the store
    let fetched = store
        .find_by_id(submission.job.id)
        .await
        .expect("Failed to fetch job")
        .expect("Job not found");
    assert_eq!(fetched.content_hash, content_hash);
    assert_eq!(fetched.schema_version, SchemaVersion::V2);

    // 3. Idempotency lookup sees it
    let by_hash = store
        .find_by_hash("integration-test-user", &content_hash)
        .await
        .expect("Failed to look up by hash")
        .expect("Hash lookup came back empty");
    assert_eq!(by_hash.id, submission.job.id);

    // 4. Status transition persists
    store
        .update_status(submission.job.id, JobStatus::Processing)
        .await
        .expect("Failed to update status");
    let processing = store
        .find_by_id(submission.job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processing.status, JobStatus::Processing);

    // 5. Dispatch queue round-trip
    let queued = QueuedExtraction {
        job_id: submission.job.id,
        user_id: submission.job.user_id.clone(),
        image_ref: submission.job.image_ref.clone(),
        schema_version: submission.job.schema_version,
        prompt_version: submission.job.prompt_version.clone(),
    };
    queue.enqueue(&queued).await.expect("Failed to enqueue");

    let dequeued = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No job in queue");
    assert_eq!(dequeued.job_id, submission.job.id);

    // 6. Failure persists on the row and retry creates a new one
    store
        .update_failed(submission.job.id, "integration test failure", false)
        .await
        .expect("Failed to mark failed");

    let retried = manager
        .retry_job(submission.job.id, "integration-test-user")
        .await
        .expect("Failed to retry job");
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.content_hash, content_hash);

    // Cleanup the queue entry
    queue.complete(&dequeued).await.expect("Failed to complete");

    println!("integration test passed");
}
