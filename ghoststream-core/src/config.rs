//! Service-wide configuration for the orchestration subsystem.
//!
//! Grounded on `ferrex-server/src/stream/transcoding/config.rs`'s
//! `TranscodingConfig`/`ToneMappingConfig`, generalized to the three output
//! shapes and stall-deadline parameters spec.md §4.6 names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path (or bare name resolved via PATH) to the encoder binary.
    pub encoder_path: String,
    /// Path (or bare name resolved via PATH) to the probe binary. The
    /// teacher keeps `ffmpeg`/`ffprobe` as separate configured paths rather
    /// than deriving one from the other; this mirrors that split.
    pub probe_path: String,
    /// Root directory under which each job gets its own subdirectory.
    pub work_dir: PathBuf,
    /// Worker pool size (spec §4.8 dispatch).
    pub concurrency: usize,
    /// Bound on the priority-less FIFO queue (mirrors the teacher's
    /// `max_queue_size` check in `JobQueue::submit_job`).
    pub max_queue_size: usize,
    /// Default HLS segment duration in seconds (spec §4.5).
    pub segment_duration_secs: u32,
    /// Max retries for transient failures (spec §7).
    pub max_retries: u32,
    /// Base retry delay; actual sleep scales linearly with attempt number
    /// (see SPEC_FULL.md "exponential backoff on transient retry" — the
    /// per-attempt multiplier lives in the job manager, this is the unit).
    pub retry_delay: Duration,
    /// Minimum stall deadline floor (spec §4.6, "configured minimum ~120s").
    pub stall_deadline_min: Duration,
    /// Base component of the stall deadline before the segment/resolution
    /// factors are applied.
    pub stall_deadline_base: Duration,
    /// Per-segment contribution to the stall deadline.
    pub stall_deadline_per_segment_factor: f64,
    /// TTL for terminal streaming-mode jobs before artifact reclamation.
    pub streaming_ttl: Duration,
    /// TTL for terminal batch-mode jobs before artifact reclamation.
    pub batch_ttl: Duration,
    /// How long a reclaimed job's metadata lingers before the record itself
    /// is removed.
    pub record_ttl_after_cleanup: Duration,
    /// Periodic sweep interval for the Cleanup Scheduler.
    pub cleanup_sweep_interval: Duration,
    /// Base URL used to build artifact/stream/download URLs in Job Views.
    pub base_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            encoder_path: "ffmpeg".to_string(),
            probe_path: "ffprobe".to_string(),
            work_dir: PathBuf::from("./work/ghoststream"),
            concurrency: 2,
            max_queue_size: 256,
            segment_duration_secs: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            stall_deadline_min: Duration::from_secs(120),
            stall_deadline_base: Duration::from_secs(60),
            stall_deadline_per_segment_factor: 3.0,
            streaming_ttl: Duration::from_secs(3600),
            batch_ttl: Duration::from_secs(24 * 3600),
            record_ttl_after_cleanup: Duration::from_secs(24 * 3600),
            cleanup_sweep_interval: Duration::from_secs(300),
            base_url: "http://localhost:8765".to_string(),
        }
    }
}

/// Tone-mapping parameters (spec §4.3) — kept as its own struct so a future
/// caller-selectable algorithm doesn't widen `ServiceConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneMapConfig {
    pub algorithm: String,
    pub target_nits: f32,
    pub desaturate: f32,
}

impl Default for ToneMapConfig {
    fn default() -> Self {
        Self {
            algorithm: "mobius".to_string(),
            target_nits: 100.0,
            desaturate: 0.0,
        }
    }
}
