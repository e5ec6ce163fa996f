//! Artifact-serving handlers (spec §6 "Artifact URLs"): streaming playlists
//! and segments under `…/stream/<job-id>/<filename>`, and the single batch
//! file under `…/download/<job-id>`. The one piece of domain logic living
//! here rather than in `ghoststream-core` is the "end-list injection"
//! rewrite — it only makes sense at the point bytes leave the process, and
//! spec §9 explicitly leaves its exact semantics to the implementer.
//!
//! Grounded on `ferrex-server/src/stream/stream_handlers.rs`'s range-request
//! handling and content-type table.

use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use ghoststream_core::job::{JobId, JobState, OutputMode};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Appends `#EXT-X-ENDLIST` if the playlist doesn't already carry one.
/// Idempotent at the text level (spec §8 round-trip property).
fn inject_end_list(playlist_text: &str) -> String {
    if playlist_text.contains("#EXT-X-ENDLIST") {
        return playlist_text.to_string();
    }
    let mut text = playlist_text.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

pub async fn stream_artifact(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(JobId, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let job = state
        .jobs
        .get_job(job_id, true)
        .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;

    let safe_name = sanitize_filename(&filename)?;
    let path = job.output_dir.join(&safe_name);

    if safe_name.ends_with(".m3u8") {
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| AppError::not_found(format!("artifact {safe_name} not found")))?;
        let body = if matches!(job.state, JobState::Processing) {
            inject_end_list(&text)
        } else {
            text
        };
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(&safe_name))
            .body(Body::from(body))
            .expect("static headers always build"));
    }

    serve_file(&path, content_type_for(&safe_name), &headers).await
}

pub async fn download_artifact(State(state): State<AppState>, Path(job_id): Path<JobId>) -> AppResult<Response> {
    let job = state
        .jobs
        .get_job(job_id, true)
        .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;

    if job.request.mode != OutputMode::Batch || !matches!(job.state, JobState::Ready) {
        return Err(AppError::bad_request("job has no completed batch file"));
    }
    let path = job
        .artifacts
        .file_path
        .clone()
        .ok_or_else(|| AppError::internal("ready batch job missing file_path"))?;

    let filename = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    serve_file(&path, content_type_for(&filename), &HeaderMap::new()).await
}

/// Rejects path traversal — `<filename>` comes straight from the URL.
fn sanitize_filename(name: &str) -> AppResult<String> {
    if name.contains('/') || name.contains("..") || name.is_empty() {
        return Err(AppError::bad_request("invalid artifact filename"));
    }
    Ok(name.to_string())
}

async fn serve_file(path: &std::path::Path, content_type: &'static str, headers: &HeaderMap) -> AppResult<Response> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| AppError::not_found("artifact not found on disk"))?;
    let file_size = metadata.len();

    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()).and_then(|r| parse_range(r, file_size)) {
        if range.start >= file_size || range.end >= file_size || range.start > range.end {
            return Err(AppError::range_not_satisfiable(format!("range out of bounds for {file_size}-byte file")));
        }
        let mut file = tokio::fs::File::open(path).await.map_err(AppError::from)?;
        file.seek(std::io::SeekFrom::Start(range.start)).await.map_err(AppError::from)?;
        let content_length = range.end - range.start + 1;
        let stream = ReaderStream::new(file.take(content_length));
        return Ok(Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, content_length.to_string())
            .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", range.start, range.end, file_size))
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from_stream(stream))
            .expect("static headers always build"));
    }

    let file = tokio::fs::File::open(path).await.map_err(AppError::from)?;
    let stream = ReaderStream::new(file);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::from_stream(stream))
        .expect("static headers always build"))
}

struct ByteRange {
    start: u64,
    end: u64,
}

fn parse_range(header_value: &str, file_size: u64) -> Option<ByteRange> {
    let spec = header_value.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    let start: u64 = if start_s.is_empty() { 0 } else { start_s.parse().ok()? };
    let end: u64 = if end_s.is_empty() { file_size.saturating_sub(1) } else { end_s.parse().ok()? };
    Some(ByteRange { start, end })
}
