//! Router assembly (spec §6 operation table → HTTP routes).
//!
//! Grounded on `ferrex-server/src/routes/mod.rs` / `v1.rs`'s
//! `Router::new().route(...)` composition and `create_app`'s middleware
//! layering.

use crate::handlers::{artifacts, capabilities, jobs, ws};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/{job_id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{job_id}/touch", post(jobs::touch_job))
        .route("/jobs/{job_id}/progress", get(ws::subscribe_progress))
        .route("/capabilities", get(capabilities::get_capabilities))
        .route("/advertisement", get(capabilities::get_advertisement))
        .route("/stats", get(jobs::get_stats))
        .route("/cleanup/stats", get(jobs::cleanup_stats))
        .route("/cleanup/run", post(jobs::run_cleanup))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .route("/stream/{job_id}/{filename}", get(artifacts::stream_artifact))
        .route("/download/{job_id}", get(artifacts::download_artifact))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}
