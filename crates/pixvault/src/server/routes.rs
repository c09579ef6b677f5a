//! Jobs API handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use pixvault_core::pipeline::Validator;
use pixvault_core::{
    CancelOutcome, ImageId, ImageRecord, ImportRequest, JobId, JobSnapshot, OutcomeEntry,
};

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    job_id: JobId,
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

fn parse_image_id(raw: &str) -> Result<ImageId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid image id: {raw}")))
}

/// `POST /jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job_id = state.pixvault.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id })))
}

/// `GET /jobs`
pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobSnapshot>>, ApiError> {
    Ok(Json(state.pixvault.list_jobs().await?))
}

/// `GET /jobs/:id`
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.pixvault.status(job_id).await?))
}

/// `POST /jobs/:id/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&id)?;
    match state.pixvault.cancel(job_id).await? {
        CancelOutcome::Requested => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "jobId": job_id, "cancelRequested": true })),
        )),
        CancelOutcome::AlreadyFinished(job_state) => Err(ApiError::Conflict(format!(
            "job {job_id} already finished as {job_state}"
        ))),
    }
}

/// `GET /jobs/:id/outcomes`
pub async fn job_outcomes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OutcomeEntry>>, ApiError> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.pixvault.outcomes(job_id).await?))
}

/// `GET /images/:id`
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImageRecord>, ApiError> {
    let image_id = parse_image_id(&id)?;
    state
        .pixvault
        .image(image_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("image {image_id} not found")))
}

/// `GET /images/:id/thumbnail`
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let image_id = parse_image_id(&id)?;
    let bytes = state
        .pixvault
        .thumbnail(image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thumbnail for {image_id} not found")))?;
    let content_type = Validator::sniff(&bytes)
        .map(|mime| mime.as_str())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.pixvault.executor_stats();
    Json(json!({
        "status": "ok",
        "version": pixvault_core::VERSION,
        "activeJobs": state.pixvault.coordinator().active_jobs(),
        "inFlight": stats.in_flight,
        "poolSize": state.pixvault.config().workers.pool_size,
    }))
}
