//! Frontend Glue operations over the Job Manager (spec §6): `create_job`,
//! `get_job`, `cancel_job`, `delete_job`, `touch_job`, `get_stats`,
//! `cleanup_stats`, `run_cleanup`. Each is a thin adapter — all decisions
//! about retry, fallback, and validation already happened in
//! `ghoststream_core::manager`.

use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use ghoststream_core::job::{Job, JobId, JobState, OutputMode, Request};
use ghoststream_core::JobView;
use serde::Serialize;

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<Request>,
) -> AppResult<Json<JobView>> {
    let job_id = state.jobs.create_job(request).await?;
    let job = state.jobs.get_job(job_id, false).ok_or_else(|| AppError::internal("job vanished immediately after creation"))?;
    Ok(Json(job_view(&state, &job).await))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<JobView>> {
    let job = state
        .jobs
        .get_job(job_id, true)
        .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;
    Ok(Json(job_view(&state, &job).await))
}

pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<JobId>) -> AppResult<Json<JobView>> {
    state.jobs.cancel_job(job_id).await?;
    let job = state.jobs.get_job(job_id, false).ok_or_else(|| AppError::internal("job vanished after cancel"))?;
    Ok(Json(job_view(&state, &job).await))
}

#[derive(Serialize)]
pub struct DeleteAck {
    pub job_id: JobId,
    pub deleted: bool,
}

pub async fn delete_job(State(state): State<AppState>, Path(job_id): Path<JobId>) -> AppResult<Json<DeleteAck>> {
    state.jobs.delete_job(job_id).await?;
    Ok(Json(DeleteAck { job_id, deleted: true }))
}

pub async fn touch_job(State(state): State<AppState>, Path(job_id): Path<JobId>) -> AppResult<()> {
    state.jobs.touch_job(job_id);
    Ok(())
}

#[derive(Serialize)]
pub struct StatsView {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub ready: usize,
    pub error: usize,
    pub cancelled: usize,
    pub active_workers: usize,
    pub queue_length: usize,
    pub uptime_secs: u64,
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsView> {
    let stats = state.jobs.stats();
    Json(StatsView {
        total: stats.total,
        queued: stats.queued,
        processing: stats.processing,
        ready: stats.ready,
        error: stats.error,
        cancelled: stats.cancelled,
        active_workers: state.jobs.active_count(),
        queue_length: state.jobs.queue_length(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn cleanup_stats(State(state): State<AppState>) -> Json<ghoststream_core::cleanup::CleanupStats> {
    Json(state.cleanup.stats())
}

#[derive(Serialize)]
pub struct RunCleanupResult {
    pub reclaimed: usize,
}

pub async fn run_cleanup(State(state): State<AppState>) -> Json<RunCleanupResult> {
    let reclaimed = state.cleanup.sweep().await;
    Json(RunCleanupResult { reclaimed })
}

/// Builds the external view of a job (spec §6 "Views"). Playlist URLs
/// appear once READY, or once PROCESSING with at least one segment already
/// written — checked against the filesystem directly since `Job::artifacts`
/// is only populated at READY.
pub(crate) async fn job_view(state: &AppState, job: &Job) -> JobView {
    let base_url = &state.config.service.base_url;

    let (playlist_url, download_url) = match &job.state {
        JobState::Ready => (
            job.artifacts
                .playlist_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|name| format!("{base_url}/stream/{}/{}", job.id, name.to_string_lossy())),
            job.artifacts
                .file_path
                .as_ref()
                .map(|_| format!("{base_url}/download/{}", job.id)),
        ),
        JobState::Processing => {
            let candidate = match job.request.mode {
                OutputMode::SingleStream => Some("playlist.m3u8"),
                OutputMode::AdaptiveStream => Some("master.m3u8"),
                OutputMode::Batch => None,
            };
            let playlist_url = match candidate {
                Some(name) if tokio::fs::try_exists(job.output_dir.join(name)).await.unwrap_or(false) => {
                    Some(format!("{base_url}/stream/{}/{}", job.id, name))
                }
                _ => None,
            };
            (playlist_url, None)
        }
        _ => (None, None),
    };

    let error = match &job.state {
        JobState::Error { reason } => Some(reason.clone()),
        _ => None,
    };

    JobView {
        id: job.id,
        state: job.state.label().to_string(),
        percent: job.progress.percent,
        current_time_secs: job.progress.current_time_secs,
        duration_secs: job.duration_secs,
        playlist_url,
        download_url,
        eta_secs: job.progress.eta_secs,
        hw_family_used: job.hw_family_used.map(|f| f.as_str().to_string()),
        error,
        created_at_unix_ms: state.to_unix_ms(job.created_at),
    }
}
