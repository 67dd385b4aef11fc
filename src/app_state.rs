use sqlx::PgPool;
use std::sync::Arc;

use crate::services::cost::CostMonitor;
use crate::services::jobs::JobManager;
use crate::services::metrics::MetricsCollector;
use crate::services::queue::JobQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
    pub jobs: Arc<JobManager>,
    pub cost: Arc<CostMonitor>,
    pub metrics: Arc<MetricsCollector>,
    pub rate_limit_per_hour: u32,
    pub estimated_extraction_cost: f64,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: PgPool,
        queue: JobQueue,
        jobs: JobManager,
        cost: CostMonitor,
        metrics: MetricsCollector,
        rate_limit_per_hour: u32,
        estimated_extraction_cost: f64,
    ) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            jobs: Arc::new(jobs),
            cost: Arc::new(cost),
            metrics: Arc::new(metrics),
            rate_limit_per_hour,
            estimated_extraction_cost,
        }
    }
}
