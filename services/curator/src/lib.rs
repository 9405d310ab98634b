pub mod config;
pub mod live;
pub mod orchestrator_job;
pub mod prompts;
pub mod provider;
pub mod provider_openai;
pub mod rewrite;
pub mod routes_jobs;
pub mod routes_records;
pub mod routes_rewrite;
pub mod scoring;
pub mod state;
pub mod types_jobs;
mod worker_loop;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/records",
            get(routes_records::list_records).post(routes_records::import_records),
        )
        .route(
            "/records/:id",
            get(routes_records::get_record)
                .patch(routes_records::patch_record)
                .delete(routes_records::delete_record),
        )
        .route("/records/:id/discard", post(routes_records::discard_record))
        .route("/records/:id/rewrite", post(routes_rewrite::rewrite_record))
        .route("/rewrites/:id", axum::routing::delete(routes_rewrite::cancel_rewrite))
        .route("/rewrites/:id/preview", get(routes_rewrite::get_preview))
        .route("/jobs", post(routes_jobs::create_job).get(routes_jobs::get_jobs))
        .route("/jobs/:id", get(routes_jobs::get_job))
        .route("/jobs/:id/cancel", post(routes_jobs::cancel_job))
        .route("/duplicates/scan", post(routes_records::scan_duplicates))
        .route("/duplicates/resolve", post(routes_records::resolve_duplicates))
        .route("/save", post(routes_records::save))
        .route("/sessions", get(routes_records::list_sessions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
