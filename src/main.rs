mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use db::postgres::PgStore;
use db::repository::JobStore;
use services::cost::CostMonitor;
use services::jobs::JobManager;
use services::metrics::MetricsCollector;
use services::queue::JobQueue;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing menu-extract server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "extraction_processing_seconds",
        "Time to process a menu extraction job"
    );
    metrics::describe_counter!(
        "extraction_jobs_submitted",
        "Total extraction jobs submitted"
    );
    metrics::describe_counter!(
        "extraction_jobs_completed",
        "Total extraction jobs completed"
    );
    metrics::describe_counter!("extraction_jobs_failed", "Total extraction jobs that failed");
    metrics::describe_counter!(
        "extraction_cost_alerts_warning",
        "Spend-cap warning alerts raised"
    );
    metrics::describe_counter!(
        "extraction_cost_alerts_critical",
        "Spend-cap critical alerts raised"
    );
    metrics::describe_gauge!(
        "extraction_queue_depth",
        "Current number of queued extraction jobs"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis dispatch queue
    tracing::info!("Connecting to Redis dispatch queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    // Wire the job store and services
    let store: Arc<dyn JobStore> = Arc::new(PgStore::new(db_pool.clone()));
    let jobs = JobManager::new(store.clone());
    let cost = CostMonitor::new(store.clone(), config.spending_caps());
    let collector = MetricsCollector::new(store.clone());

    let state = AppState::new(
        db_pool,
        queue,
        jobs,
        cost,
        collector,
        config.rate_limit_per_hour,
        config.estimated_extraction_cost,
    );

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/extractions",
            post(routes::extract::submit_extraction),
        )
        .route(
            "/api/v1/extractions/{job_id}",
            get(routes::extract::get_extraction),
        )
        .route(
            "/api/v1/extractions/{job_id}/retry",
            post(routes::extract::retry_extraction),
        )
        .route(
            "/api/v1/metrics/overview",
            get(routes::metrics::metrics_overview),
        )
        .route(
            "/api/v1/users/{user_id}/spending",
            get(routes::metrics::user_spending),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit; submissions are JSON

    tracing::info!("Starting menu-extract on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
