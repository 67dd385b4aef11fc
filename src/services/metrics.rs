use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::repository::{DailyMetricsUpdate, JobStore, StoreError};
use crate::models::job::{ExtractionJob, JobStatus};
use crate::services::cost::{start_of_month, start_of_today};

/// Aggregated view over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct OverallMetrics {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub p50_processing_ms: i64,
    pub p95_processing_ms: i64,
    pub p99_processing_ms: i64,
    pub avg_confidence: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    /// failed / all jobs in range.
    pub failure_rate: f64,
    /// Fraction of completed jobs with at least one uncertain item.
    pub uncertain_item_rate: f64,
}

/// Spending summary for one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserSpending {
    pub today: f64,
    pub this_month: f64,
    pub extractions_this_month: u64,
    pub last_extraction_at: Option<DateTime<Utc>>,
}

/// Aggregates completed-job statistics by prompt/schema version and date.
pub struct MetricsCollector {
    store: Arc<dyn JobStore>,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Fold a completed job into its (prompt version, schema version, date)
    /// aggregate. Persistence failures are logged and swallowed; metrics must
    /// never fail the job they describe.
    pub async fn track_extraction(&self, job: &ExtractionJob) {
        let completed_at = job.completed_at.unwrap_or_else(Utc::now);
        let update = DailyMetricsUpdate {
            prompt_version: job.prompt_version.clone(),
            schema_version: job.schema_version.to_string(),
            date: completed_at.date_naive(),
            confidence: job.overall_confidence.unwrap_or(0.0),
            processing_ms: job.processing_ms.unwrap_or(0),
            total_tokens: job.token_usage.map(|u| u.total_tokens).unwrap_or(0),
            cost: job.token_usage.map(|u| u.estimated_cost).unwrap_or(0.0),
        };

        if let Err(e) = self.store.upsert_daily_metrics(&update).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to persist extraction metrics");
        }
    }

    /// Percentiles, averages, and rates over every job created in the range.
    pub async fn overall_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<OverallMetrics, StoreError> {
        let rows = self.store.jobs_between(start, end).await?;

        let total_jobs = rows.len();
        let failed_jobs = rows
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
            .count();
        let completed: Vec<_> = rows
            .iter()
            .filter(|r| r.status == JobStatus::Completed)
            .collect();

        let mut times: Vec<i64> = completed.iter().filter_map(|r| r.processing_ms).collect();
        times.sort_unstable();

        let confidences: Vec<f64> = completed
            .iter()
            .filter_map(|r| r.overall_confidence)
            .collect();
        let total_cost: f64 = completed.iter().filter_map(|r| r.cost).sum();
        let with_uncertain = completed.iter().filter(|r| r.uncertain_count > 0).count();

        Ok(OverallMetrics {
            total_jobs,
            completed_jobs: completed.len(),
            failed_jobs,
            p50_processing_ms: percentile(&times, 0.50),
            p95_processing_ms: percentile(&times, 0.95),
            p99_processing_ms: percentile(&times, 0.99),
            avg_confidence: mean(&confidences),
            total_cost,
            avg_cost: if completed.is_empty() {
                0.0
            } else {
                total_cost / completed.len() as f64
            },
            failure_rate: if total_jobs == 0 {
                0.0
            } else {
                failed_jobs as f64 / total_jobs as f64
            },
            uncertain_item_rate: if completed.is_empty() {
                0.0
            } else {
                with_uncertain as f64 / completed.len() as f64
            },
        })
    }

    /// Today's and this month's completed-job cost for a user, plus activity.
    pub async fn user_spending(&self, user_id: &str) -> Result<UserSpending, StoreError> {
        let month = self.store.completed_since(user_id, start_of_month()).await?;
        let today_start = start_of_today();

        let today: f64 = month
            .iter()
            .filter(|r| r.completed_at >= today_start)
            .map(|r| r.cost)
            .sum();

        Ok(UserSpending {
            today,
            this_month: month.iter().map(|r| r.cost).sum(),
            extractions_this_month: month.len() as u64,
            last_extraction_at: month.iter().map(|r| r.completed_at).max(),
        })
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::repository::CompletedUpdate;
    use crate::models::job::{SchemaVersion, TokenUsage};
    use crate::models::menu::{MenuCategory, MenuExtraction, UncertainItem};

    fn menu() -> MenuExtraction {
        MenuExtraction {
            categories: vec![MenuCategory {
                name: "Mains".to_string(),
                confidence: 0.9,
                items: Vec::new(),
                subcategories: Vec::new(),
            }],
            currency: "USD".to_string(),
            uncertain_items: Vec::new(),
            superfluous_text: Vec::new(),
        }
    }

    async fn seed_completed(
        store: &MemoryStore,
        user: &str,
        processing_ms: i64,
        confidence: f64,
        uncertain: usize,
    ) -> ExtractionJob {
        let job = ExtractionJob::new(
            user,
            "menus/a.jpg",
            format!("hash-{processing_ms}-{confidence}-{uncertain}"),
            SchemaVersion::V2,
            "menu-v2.3",
        );
        store.insert_job(&job).await.unwrap();
        store
            .update_completed(
                job.id,
                &CompletedUpdate {
                    result: menu(),
                    processing_ms,
                    token_usage: TokenUsage::from_counts(1000, 500),
                    overall_confidence: confidence,
                    uncertain_items: (0..uncertain)
                        .map(|i| UncertainItem {
                            text: format!("u{i}"),
                            reason: "blur".to_string(),
                            confidence: 0.3,
                            suggested_category: None,
                            suggested_price: None,
                        })
                        .collect(),
                    superfluous_text: Vec::new(),
                },
            )
            .await
            .unwrap();
        store.find_by_id(job.id).await.unwrap().unwrap()
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let times: Vec<i64> = (1..=100).collect();
        assert_eq!(percentile(&times, 0.50), 50);
        assert_eq!(percentile(&times, 0.95), 95);
        assert_eq!(percentile(&times, 0.99), 99);
        assert_eq!(percentile(&[], 0.5), 0);
        assert_eq!(percentile(&[7], 0.99), 7);
    }

    #[tokio::test]
    async fn test_overall_metrics() {
        let store = Arc::new(MemoryStore::new());
        seed_completed(&store, "user-1", 1000, 0.9, 0).await;
        seed_completed(&store, "user-1", 3000, 0.8, 2).await;

        let failed = ExtractionJob::new("user-1", "menus/b.jpg", "hash-f", SchemaVersion::V2, "p");
        store.insert_job(&failed).await.unwrap();
        store.update_failed(failed.id, "boom", false).await.unwrap();

        let collector = MetricsCollector::new(store);
        let window = chrono::Duration::hours(1);
        let metrics = collector
            .overall_metrics(Utc::now() - window, Utc::now() + window)
            .await
            .unwrap();

        assert_eq!(metrics.total_jobs, 3);
        assert_eq!(metrics.completed_jobs, 2);
        assert_eq!(metrics.failed_jobs, 1);
        assert!((metrics.failure_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((metrics.uncertain_item_rate - 0.5).abs() < 1e-9);
        assert!((metrics.avg_confidence - 0.85).abs() < 1e-9);
        assert_eq!(metrics.p50_processing_ms, 1000);
        assert_eq!(metrics.p99_processing_ms, 3000);
    }

    #[tokio::test]
    async fn test_track_extraction_upserts_aggregate() {
        let store = Arc::new(MemoryStore::new());
        let job = seed_completed(&store, "user-1", 2000, 0.92, 0).await;

        let collector = MetricsCollector::new(store.clone());
        collector.track_extraction(&job).await;
        collector.track_extraction(&job).await;

        let cell = store
            .metrics_cell("menu-v2.3", "v2", Utc::now().date_naive())
            .unwrap();
        assert_eq!(cell.extraction_count, 2);
        assert!((cell.avg_confidence - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_user_spending_windows() {
        let store = Arc::new(MemoryStore::new());
        seed_completed(&store, "user-1", 1000, 0.9, 0).await;
        seed_completed(&store, "user-1", 2000, 0.9, 0).await;
        seed_completed(&store, "someone-else", 1000, 0.9, 0).await;

        let collector = MetricsCollector::new(store);
        let spending = collector.user_spending("user-1").await.unwrap();

        assert_eq!(spending.extractions_this_month, 2);
        // Each seeded job costs 1000/1M*2.5 + 500/1M*10 = 0.0075
        assert!((spending.this_month - 0.015).abs() < 1e-9);
        assert!((spending.today - 0.015).abs() < 1e-9);
        assert!(spending.last_extraction_at.is_some());
    }
}
