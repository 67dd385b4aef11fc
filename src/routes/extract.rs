use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    ApiError, JobStatusResponse, SubmitExtractionRequest, SubmitExtractionResponse,
};
use crate::models::job::JobStatus;
use crate::services::classify;
use crate::services::jobs::{JobError, SubmitOptions};
use crate::services::queue::QueuedExtraction;

type ErrorResponse = (StatusCode, Json<ApiError>);

/// POST /api/v1/extractions — submit a menu photo for extraction.
pub async fn submit_extraction(
    State(state): State<AppState>,
    Json(request): Json<SubmitExtractionRequest>,
) -> Result<Json<SubmitExtractionResponse>, ErrorResponse> {
    if let Err(report) = request.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                code: "INVALID_INPUT".to_string(),
                title: "Invalid request".to_string(),
                message: report.to_string(),
                actions: vec!["Correct the request and resubmit".to_string()],
                retry_after: None,
                resets_at: None,
            }),
        ));
    }

    let quota = state
        .jobs
        .check_quota(&request.user_id)
        .await
        .map_err(internal_error)?;
    if !quota.allowed {
        let response = classify::quota_exceeded(quota.used, quota.limit).user_response();
        return Err((StatusCode::TOO_MANY_REQUESTS, Json(response)));
    }

    let rate = state
        .jobs
        .check_rate_limit(&request.user_id, state.rate_limit_per_hour)
        .await
        .map_err(internal_error)?;
    if !rate.allowed {
        let resets_at = rate.resets_at.unwrap_or_else(chrono::Utc::now);
        let mut response = classify::rate_limited(resets_at).user_response();
        response.resets_at = rate.resets_at;
        return Err((StatusCode::TOO_MANY_REQUESTS, Json(response)));
    }

    let budget = state
        .cost
        .can_perform_extraction(&request.user_id, state.estimated_extraction_cost)
        .await
        .map_err(internal_error)?;
    if !budget.allowed {
        let reason = budget.reason.as_deref().unwrap_or("Spending cap reached");
        let response = classify::budget_denied(reason).user_response();
        return Err((StatusCode::TOO_MANY_REQUESTS, Json(response)));
    }
    state.cost.process_alerts(&budget.alerts);

    let submission = state
        .jobs
        .submit_job(
            &request.user_id,
            &request.image_ref,
            &request.content_hash,
            SubmitOptions {
                schema_version: request.schema_version,
                prompt_version: request.prompt_version.clone(),
                force: request.force,
            },
        )
        .await
        .map_err(job_error_response)?;

    metrics::counter!("extraction_jobs_submitted").increment(1);

    if !submission.cached && submission.job.status == JobStatus::Queued {
        state
            .queue
            .enqueue(&QueuedExtraction {
                job_id: submission.job.id,
                user_id: submission.job.user_id.clone(),
                image_ref: submission.job.image_ref.clone(),
                schema_version: submission.job.schema_version,
                prompt_version: submission.job.prompt_version.clone(),
            })
            .await
            .map_err(internal_error)?;
    }

    Ok(Json(SubmitExtractionResponse {
        job: submission.job,
        cached: submission.cached,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub user_id: Option<String>,
}

/// GET /api/v1/extractions/{job_id} — job status.
pub async fn get_extraction(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<StatusParams>,
) -> Result<Json<JobStatusResponse>, ErrorResponse> {
    let job = state
        .jobs
        .get_job(job_id, params.user_id.as_deref())
        .await
        .map_err(job_error_response)?;
    Ok(Json(JobStatusResponse { job }))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub user_id: String,
}

/// POST /api/v1/extractions/{job_id}/retry — retry a failed extraction.
pub async fn retry_extraction(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<SubmitExtractionResponse>, ErrorResponse> {
    let job = state
        .jobs
        .retry_job(job_id, &request.user_id)
        .await
        .map_err(job_error_response)?;

    state
        .queue
        .enqueue(&QueuedExtraction {
            job_id: job.id,
            user_id: job.user_id.clone(),
            image_ref: job.image_ref.clone(),
            schema_version: job.schema_version,
            prompt_version: job.prompt_version.clone(),
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(SubmitExtractionResponse { job, cached: false }))
}

fn job_error_response(err: JobError) -> ErrorResponse {
    let status = match &err {
        JobError::NotFound => StatusCode::NOT_FOUND,
        JobError::InvalidStatus(_) => StatusCode::CONFLICT,
        JobError::MaxRetriesExceeded => StatusCode::UNPROCESSABLE_ENTITY,
        JobError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let (title, message, actions) = match &err {
        JobError::NotFound => (
            "Job not found",
            "No extraction job matches that id for this user.".to_string(),
            vec!["Check the job id and try again".to_string()],
        ),
        JobError::InvalidStatus(current) => (
            "Job cannot be retried",
            format!("Only failed jobs can be retried; this one is {current}."),
            vec!["Wait for the job to finish before retrying".to_string()],
        ),
        JobError::MaxRetriesExceeded => (
            "Retry limit reached",
            "This menu has already been retried the maximum number of times.".to_string(),
            vec!["Enter the menu manually".to_string()],
        ),
        JobError::Store(e) => {
            tracing::error!(error = %e, "Repository error in extraction API");
            (
                "Something went wrong",
                "We could not process the request. Please try again.".to_string(),
                vec!["Try again in a moment".to_string()],
            )
        }
    };

    (
        status,
        Json(ApiError {
            code: err.code().to_string(),
            title: title.to_string(),
            message,
            actions,
            retry_after: None,
            resets_at: None,
        }),
    )
}

fn internal_error(err: impl std::fmt::Display) -> ErrorResponse {
    tracing::error!(error = %err, "Internal error in extraction API");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            code: "INTERNAL_ERROR".to_string(),
            title: "Something went wrong".to_string(),
            message: "We could not process the request. Please try again.".to_string(),
            actions: vec!["Try again in a moment".to_string()],
            retry_after: None,
            resets_at: None,
        }),
    )
}
