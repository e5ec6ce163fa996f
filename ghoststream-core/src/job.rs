//! Job data model (spec §3): `Request`, `Job`, the state machine, and the
//! ephemeral `ProgressSample`.
//!
//! Grounded on `ferrex-server/src/transcoding/job.rs`'s `TranscodingJob` /
//! `TranscodingStatus` shape and `original_source/ghoststream/jobs.py`'s
//! `Job` dataclass (state names, `last_accessed` touch semantics).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque, process-unique job identifier.
pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Single-variant HLS playlist.
    SingleStream,
    /// Multi-variant adaptive HLS.
    AdaptiveStream,
    /// Single completed file.
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwFamily {
    Nvenc,
    Qsv,
    Vaapi,
    Amf,
    VideoToolbox,
    Software,
}

impl HwFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwFamily::Nvenc => "nvenc",
            HwFamily::Qsv => "qsv",
            HwFamily::Vaapi => "vaapi",
            HwFamily::Amf => "amf",
            HwFamily::VideoToolbox => "videotoolbox",
            HwFamily::Software => "software",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Source,
    Target(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bitrate {
    Auto,
    Explicit(u64),
}

/// Immutable submitted request (spec §3 "Request").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub source_uri: String,
    pub mode: OutputMode,
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub resolution: Resolution,
    pub bitrate: Bitrate,
    pub hw_family: Option<HwFamily>,
    pub start_offset_secs: f64,
    pub tone_map: bool,
    pub two_pass: bool,
    pub callback_url: Option<String>,
}

impl Request {
    /// Minimal shape validation (§6 `create_job` "invalid request shape").
    pub fn validate(&self) -> Result<(), String> {
        if self.source_uri.trim().is_empty() {
            return Err("source_uri must not be empty".to_string());
        }
        if self.two_pass && self.mode != OutputMode::Batch {
            return Err("two_pass is only valid for batch mode".to_string());
        }
        if let Resolution::Target(w, h) = self.resolution {
            if w == 0 || h == 0 {
                return Err("target resolution must be non-zero".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Processing,
    Ready,
    Error { reason: String },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Ready | JobState::Error { .. } | JobState::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Ready => "ready",
            JobState::Error { .. } => "error",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Ephemeral, latest-per-job progress sample (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSample {
    pub percent: f32,
    pub current_time_secs: f64,
    pub frame: Option<u64>,
    pub fps: Option<f32>,
    pub bitrate: Option<String>,
    pub speed: Option<f32>,
    pub bytes_emitted: Option<u64>,
    pub eta_secs: Option<u64>,
}

impl ProgressSample {
    /// Clamp percent to the invariant in spec.md §8.5: `<= 99.9` while
    /// non-terminal, `100` only once READY.
    pub fn clamp_non_terminal(mut self) -> Self {
        self.percent = self.percent.min(99.9);
        self
    }
}

/// Artifact references recorded once a job reaches READY.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub playlist_path: Option<PathBuf>,
    pub file_path: Option<PathBuf>,
}

/// One job. The Job Manager is the sole writer; every other component sees
/// a cloned snapshot (`Job` is cheap to clone: `Arc<Request>` + plain data).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub request: Arc<Request>,
    pub state: JobState,
    pub progress: ProgressSample,
    /// Populated once the Media Probe returns (spec §3 Job "duration").
    pub duration_secs: Option<f64>,
    pub output_dir: PathBuf,
    pub artifacts: Artifacts,
    pub encoder_used: Option<String>,
    pub hw_family_used: Option<HwFamily>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub last_access: Instant,
    /// Consumable only by the worker owning this job (spec §3 invariant).
    pub cancel: CancellationToken,
    pub reclaimed: bool,
}

impl Job {
    pub fn new(request: Request, work_dir: &std::path::Path) -> Self {
        let id = Uuid::new_v4();
        let now = Instant::now();
        Self {
            id,
            request: Arc::new(request),
            state: JobState::Queued,
            progress: ProgressSample::default(),
            duration_secs: None,
            output_dir: work_dir.join(id.to_string()),
            artifacts: Artifacts::default(),
            encoder_used: None,
            hw_family_used: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_access: now,
            cancel: CancellationToken::new(),
            reclaimed: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// §3 invariant: READY implies `percent == 100`, non-READY implies
    /// `percent <= 99.9`.
    pub fn set_ready(&mut self, artifacts: Artifacts, encoder_used: String, hw: HwFamily) {
        self.progress.percent = 100.0;
        self.state = JobState::Ready;
        self.artifacts = artifacts;
        self.encoder_used = Some(encoder_used);
        self.hw_family_used = Some(hw);
        self.completed_at = Some(Instant::now());
    }

    pub fn set_error(&mut self, reason: impl Into<String>) {
        self.state = JobState::Error {
            reason: reason.into(),
        };
        self.completed_at = Some(Instant::now());
    }

    pub fn set_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.completed_at = Some(Instant::now());
        self.cancel.cancel();
    }
}

/// External, read-only view of a job (spec §6 "Views").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub state: String,
    pub percent: f32,
    pub current_time_secs: f64,
    pub duration_secs: Option<f64>,
    pub playlist_url: Option<String>,
    pub download_url: Option<String>,
    pub eta_secs: Option<u64>,
    pub hw_family_used: Option<String>,
    pub error: Option<String>,
    pub created_at_unix_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Request {
        Request {
            source_uri: "http://h/1080p.mp4".to_string(),
            mode: OutputMode::SingleStream,
            container: "mpegts".to_string(),
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            resolution: Resolution::Target(1280, 720),
            bitrate: Bitrate::Auto,
            hw_family: None,
            start_offset_secs: 0.0,
            tone_map: false,
            two_pass: false,
            callback_url: None,
        }
    }

    #[test]
    fn rejects_empty_source() {
        let mut req = sample_request();
        req.source_uri = "".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_two_pass_outside_batch() {
        let mut req = sample_request();
        req.two_pass = true;
        assert!(req.validate().is_err());
    }

    #[test]
    fn new_job_starts_queued_with_clamped_progress() {
        let job = Job::new(sample_request(), std::path::Path::new("/tmp/gs"));
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress.percent, 0.0);
    }

    #[test]
    fn ready_sets_percent_to_100() {
        let mut job = Job::new(sample_request(), std::path::Path::new("/tmp/gs"));
        job.set_ready(Artifacts::default(), "libx264".to_string(), HwFamily::Software);
        assert_eq!(job.progress.percent, 100.0);
        assert!(matches!(job.state, JobState::Ready));
    }
}
