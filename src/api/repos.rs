use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::JobStatus;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub repo_url: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRepoResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// POST /repository - Register a repository and start ingesting it.
///
/// Returns 202 immediately; poll GET /repository/{job_id} for progress.
pub async fn create_repo(
    State(state): State<AppState>,
    Json(req): Json<CreateRepoRequest>,
) -> Result<(StatusCode, Json<CreateRepoResponse>)> {
    let job = state.orchestrator.create_job(&req.repo_url).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRepoResponse { job_id: job.id }),
    ))
}

/// GET /repository - List the ids of every known ingest job.
pub async fn list_repos(State(state): State<AppState>) -> Result<Json<Vec<Uuid>>> {
    let jobs = state.orchestrator.list_jobs().await?;
    Ok(Json(jobs.into_iter().map(|job| job.id).collect()))
}

/// GET /repository/{job_id} - Poll the status of one ingest job.
pub async fn get_repo(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>> {
    let job = state.orchestrator.get_job(job_id).await?;
    Ok(Json(JobStatusResponse {
        status: job.status,
        error_message: job.error_message,
    }))
}
