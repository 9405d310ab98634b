use axum::{extract::{Path, Query, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::live::{LivePreview, PreviewKey, RewriteKey};
use crate::orchestrator_job::{RewriteOutcome, UnitError};
use crate::rewrite::{RewriteError, RewriteTarget};
use crate::state::SharedState;

pub async fn rewrite_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(target): Json<RewriteTarget>,
) -> Result<Json<RewriteOutcome>, (StatusCode, String)> {
    state
        .orchestrator
        .rewrite_one(&id, target)
        .await
        .map(Json)
        .map_err(|e| {
            let status = match &e {
                UnitError::NotFound(_) => StatusCode::NOT_FOUND,
                UnitError::Rewrite(RewriteError::Cancelled) => StatusCode::CONFLICT,
                UnitError::Rewrite(RewriteError::InvalidTarget(_)) => StatusCode::BAD_REQUEST,
                UnitError::Rewrite(_) => StatusCode::BAD_GATEWAY,
            };
            (status, e.to_string())
        })
}

#[derive(Deserialize)]
pub struct KeyQuery {
    pub message_index: Option<usize>,
}

pub async fn cancel_rewrite(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<KeyQuery>,
) -> StatusCode {
    if state.orchestrator.cancel_rewrite(&RewriteKey::new(id, q.message_index)) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub message_index: Option<usize>,
    /// Reads the unit of this job instead of a single-item rewrite.
    pub job_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct PreviewResponse {
    pub running: bool,
    pub preview: Option<LivePreview>,
}

pub async fn get_preview(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, (StatusCode, String)> {
    let rewrite = RewriteKey::new(id, q.message_index);
    let (running, preview) = match q.job_id {
        Some(job_id) => {
            let preview = state.orchestrator.previews().get(&PreviewKey::job(job_id, rewrite));
            (preview.is_some(), preview)
        }
        None => (
            state.orchestrator.is_rewriting(&rewrite),
            state.orchestrator.previews().get(&PreviewKey::single(rewrite)),
        ),
    };
    if !running && preview.is_none() {
        return Err((StatusCode::NOT_FOUND, "No rewrite in flight".to_string()));
    }
    Ok(Json(PreviewResponse { running, preview }))
}
