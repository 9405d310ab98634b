use axum::{extract::{Path, State}, http::StatusCode, Json};
use dataset::RecordId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestrator_job::JobError;
use crate::state::SharedState;
use crate::types_jobs::{JobConfigOverrides, JobMode, JobStatus};

#[derive(Deserialize)]
pub struct CreateJobRequest {
    /// Records to process; every non-discarded record when absent.
    #[serde(default)]
    pub ids: Option<Vec<RecordId>>,
    #[serde(flatten)]
    pub mode: JobMode,
    #[serde(default)]
    pub config: JobConfigOverrides,
}

#[derive(Serialize)]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
    pub total: usize,
}

pub async fn create_job(
    State(state): State<SharedState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), (StatusCode, String)> {
    let ids = match req.ids {
        Some(ids) => ids,
        None => state
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|r| !r.is_discarded)
            .map(|r| r.id)
            .collect(),
    };
    let config = req.config.apply(&state.config.job);

    let handle = state
        .orchestrator
        .run(ids, req.mode, config)
        .await
        .map_err(|e| match e {
            JobError::InvalidConfig(msg) => (StatusCode::BAD_REQUEST, msg),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(JobCreatedResponse { job_id: handle.job_id, total: handle.progress().total }),
    ))
}

/// Job status with its completion percentage.
#[derive(Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub status: JobStatus,
    pub percent: f32,
}

impl From<JobStatus> for JobView {
    fn from(status: JobStatus) -> Self {
        let percent = status.progress.percent();
        Self { status, percent }
    }
}

pub async fn get_jobs(State(state): State<SharedState>) -> Json<Vec<JobView>> {
    Json(state.orchestrator.list_jobs().await.into_iter().map(JobView::from).collect())
}

pub async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    state
        .orchestrator
        .job_status(id)
        .await
        .map(|s| Json(s.into()))
        .ok_or((StatusCode::NOT_FOUND, "Job not found".to_string()))
}

pub async fn cancel_job(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.orchestrator.cancel_job(id).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((StatusCode::NOT_FOUND, "Job not found".to_string()))
    }
}
