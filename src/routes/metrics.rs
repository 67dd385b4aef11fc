use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::services::metrics::{OverallMetrics, UserSpending};

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(
    State(handle): State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}

#[derive(Debug, Deserialize)]
pub struct OverviewParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// GET /api/v1/metrics/overview — aggregated extraction metrics for a date
/// range (defaults to the trailing 7 days).
pub async fn metrics_overview(
    State(state): State<AppState>,
    Query(params): Query<OverviewParams>,
) -> Result<Json<OverallMetrics>, StatusCode> {
    let end = params.end.unwrap_or_else(Utc::now);
    let start = params.start.unwrap_or(end - Duration::days(7));

    state
        .metrics
        .overall_metrics(start, end)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to compute overall metrics");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// GET /api/v1/users/{user_id}/spending — today/this-month spend summary.
pub async fn user_spending(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserSpending>, StatusCode> {
    state
        .metrics
        .user_spending(&user_id)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, user_id, "Failed to compute user spending");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
