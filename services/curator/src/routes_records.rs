use axum::{extract::{Path, State}, http::StatusCode, Json};
use dataset::{DuplicateReport, Record, RecordPatch, SessionInfo};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::SharedState;

type ApiError = (StatusCode, String);

fn not_found(id: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("Record not found: {id}"))
}

pub async fn list_records(State(state): State<SharedState>) -> Json<Vec<Record>> {
    Json(state.store.snapshot().await)
}

pub async fn get_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    state.store.get(&id).await.map(Json).ok_or_else(|| not_found(&id))
}

#[derive(Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub duplicates: DuplicateReport,
}

/// Adds already-normalized records and rescans duplicates.
pub async fn import_records(
    State(state): State<SharedState>,
    Json(records): Json<Vec<Record>>,
) -> Json<ImportResponse> {
    let imported = records.len();
    for mut rec in records {
        rec.has_unsaved_changes = true;
        state.store.insert(rec).await;
    }
    let duplicates = state.store.analyze_duplicates().await;
    info!(imported, groups = duplicates.groups, "records imported");
    Json(ImportResponse { imported, duplicates })
}

pub async fn patch_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> Result<Json<Record>, ApiError> {
    if !state.store.merge(&id, &patch).await {
        return Err(not_found(&id));
    }
    state.store.get(&id).await.map(Json).ok_or_else(|| not_found(&id))
}

pub async fn delete_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete(&id).await.is_none() {
        return Err(not_found(&id));
    }
    state
        .storage
        .delete(state.session(), &id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DiscardReq {
    #[serde(default = "default_true")]
    pub discarded: bool,
}

fn default_true() -> bool {
    true
}

pub async fn discard_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<DiscardReq>,
) -> Result<StatusCode, ApiError> {
    if state.store.set_discarded(&id, req.discarded).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

#[derive(Serialize)]
pub struct SaveResponse {
    pub session: String,
    pub saved: usize,
}

pub async fn save(State(state): State<SharedState>) -> Result<Json<SaveResponse>, ApiError> {
    let saved = state
        .store
        .save_dirty(state.storage.as_ref(), state.session())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(SaveResponse { session: state.session().to_string(), saved }))
}

pub async fn list_sessions(State(state): State<SharedState>) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    state
        .storage
        .list_sessions()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub discarded: usize,
}

pub async fn scan_duplicates(State(state): State<SharedState>) -> Json<DuplicateReport> {
    Json(state.store.analyze_duplicates().await)
}

pub async fn resolve_duplicates(State(state): State<SharedState>) -> Json<ResolveResponse> {
    let discarded = state.store.auto_resolve_duplicates().await;
    info!(discarded, "duplicates auto-resolved");
    Json(ResolveResponse { discarded })
}
