use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::api::{
    SubmitScanRequest, SubmitScanResponse, UploadUrlRequest, UploadUrlResponse,
};
use crate::models::submission::{StatusCounts, Submission};

/// POST /api/generate-upload-url — issue a signed URL for direct upload.
pub async fn generate_upload_url(
    State(state): State<AppState>,
    Json(req): Json<UploadUrlRequest>,
) -> Result<Json<UploadUrlResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let response = state.workflow.request_upload_url(&req).await?;
    Ok(Json(response))
}

/// POST /api/submit-scan — create a pending submission and schedule analysis.
pub async fn submit_scan(
    State(state): State<AppState>,
    Json(req): Json<SubmitScanRequest>,
) -> Result<Json<SubmitScanResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let submission = state.workflow.submit_scan(&req).await?;
    Ok(Json(SubmitScanResponse {
        submission_id: submission.id,
        status: submission.status,
    }))
}

/// GET /api/result/{submission_id} — full submission record, 404 if unknown.
pub async fn get_result(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
) -> Result<Json<Submission>, AppError> {
    let submission = state.workflow.get_result(submission_id).await?;
    Ok(Json(submission))
}

/// GET /api/submissions — submissions, newest first.
pub async fn list_submissions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Submission>>, AppError> {
    let submissions = state.workflow.list_submissions().await?;
    Ok(Json(submissions))
}

/// GET /api/stats — aggregate counts by status.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatusCounts>, AppError> {
    let counts = state.workflow.get_stats().await?;
    Ok(Json(counts))
}
