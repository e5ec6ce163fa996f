//! Job Manager (spec §4.8): the single writer of job state, owner of the
//! worker pool, and the component that runs each job's probe → select →
//! build → supervise → validate pipeline with retry and hardware fallback.
//!
//! Grounded on `ferrex-server/src/transcoding/queue.rs`'s `JobQueue`
//! (mpsc-fed worker loop, `Arc<RwLock<HashMap>>` job table, `QueueStats`)
//! and `original_source/ghoststream/jobs.py`'s `JobManager._worker`/
//! `_process_job`, with the retry-then-one-software-fallback policy from
//! `original_source/ghoststream/transcoding/engine.py`'s `transcode`.

use crate::broadcaster::ProgressBroadcaster;
use crate::capability::CapabilitySnapshot;
use crate::classify;
use crate::command;
use crate::config::ServiceConfig;
use crate::error::GhostError;
use crate::filters::SourceVideoInfo;
use crate::job::{Artifacts, HwFamily, Job, JobId, JobState, OutputMode, Request};
use crate::probe::MediaProbe;
use crate::selector::EncoderSelector;
use crate::supervisor::{self, RunOutcome, SupervisorConfig};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub ready: usize,
    pub error: usize,
    pub cancelled: usize,
}

pub struct JobManager {
    jobs: Arc<DashMap<JobId, Job>>,
    dispatch_tx: mpsc::Sender<JobId>,
    config: ServiceConfig,
    selector: Arc<EncoderSelector>,
    probe: Arc<MediaProbe>,
    broadcaster: Arc<ProgressBroadcaster>,
    active_count: Arc<AtomicUsize>,
}

impl JobManager {
    pub fn new(config: ServiceConfig, capabilities: CapabilitySnapshot) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.max_queue_size);
        let jobs = Arc::new(DashMap::new());
        let selector = Arc::new(EncoderSelector::new(capabilities));
        let probe = Arc::new(MediaProbe::new(config.probe_path.clone()));
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let active_count = Arc::new(AtomicUsize::new(0));

        let manager = Arc::new(Self {
            jobs,
            dispatch_tx,
            config: config.clone(),
            selector,
            probe,
            broadcaster,
            active_count,
        });

        let receiver = Arc::new(Mutex::new(dispatch_rx));
        for worker_id in 0..config.concurrency {
            let manager = manager.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                manager.worker_loop(worker_id, receiver).await;
            });
        }

        manager
    }

    pub fn broadcaster(&self) -> Arc<ProgressBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn capabilities(&self) -> &CapabilitySnapshot {
        self.selector.snapshot()
    }

    pub async fn create_job(&self, request: Request) -> Result<JobId, GhostError> {
        request
            .validate()
            .map_err(GhostError::InvalidRequest)?;

        let job = Job::new(request, &self.config.work_dir);
        let job_id = job.id;
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(GhostError::Io)?;
        self.jobs.insert(job_id, job);

        self.dispatch_tx.try_send(job_id).map_err(|_| {
            self.jobs.remove(&job_id);
            GhostError::Fatal("queue is full".to_string())
        })?;

        Ok(job_id)
    }

    pub fn get_job(&self, job_id: JobId, touch: bool) -> Option<Job> {
        let mut entry = self.jobs.get_mut(&job_id)?;
        if touch {
            entry.touch();
        }
        Some(entry.clone())
    }

    pub fn touch_job(&self, job_id: JobId) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.touch();
        }
    }

    /// spec §4.8 `cancel` "triggers cleanup": the job's work directory is
    /// reclaimed before the state flips to CANCELLED (spec §8 scenario 4),
    /// not left for the periodic sweep.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), GhostError> {
        let output_dir = {
            let mut entry = self.jobs.get_mut(&job_id).ok_or_else(|| GhostError::NotFound(job_id.to_string()))?;
            if entry.state.is_terminal() {
                return Err(GhostError::NotCancellable);
            }
            entry.set_cancelled();
            entry.output_dir.clone()
        };
        reclaim_dir(&output_dir).await;
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.reclaimed = true;
        }
        self.broadcaster.publish_status(job_id, JobState::Cancelled);
        Ok(())
    }

    /// Marks a job's artifacts as reclaimed without deleting its metadata
    /// record — the Cleanup Scheduler still needs `completed_at` to decide
    /// when the record itself can go.
    pub fn mark_reclaimed(&self, job_id: JobId) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.reclaimed = true;
        }
    }

    pub async fn delete_job(&self, job_id: JobId) -> Result<(), GhostError> {
        let (_, job) = self.jobs.remove(&job_id).ok_or_else(|| GhostError::NotFound(job_id.to_string()))?;
        let _ = tokio::fs::remove_dir_all(&job.output_dir).await;
        self.broadcaster.forget(job_id);
        Ok(())
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.iter().map(|e| e.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub fn queue_length(&self) -> usize {
        self.jobs
            .iter()
            .filter(|e| matches!(e.state, JobState::Queued))
            .count()
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        for entry in self.jobs.iter() {
            stats.total += 1;
            match entry.state {
                JobState::Queued => stats.queued += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Ready => stats.ready += 1,
                JobState::Error { .. } => stats.error += 1,
                JobState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, receiver: Arc<Mutex<mpsc::Receiver<JobId>>>) {
        info!(worker_id, "transcoding worker started");
        loop {
            let job_id = {
                let mut rx = receiver.lock().await;
                match rx.recv().await {
                    Some(id) => id,
                    None => break,
                }
            };

            if !self.jobs.contains_key(&job_id) {
                continue;
            }

            self.active_count.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.process(job_id).await {
                warn!(%job_id, error = %e, "job processing pipeline returned an error");
                // spec §7/§8 invariant 4: the work directory is reclaimed
                // before the ERROR transition, not left for the sweep.
                let output_dir = self.jobs.get(&job_id).map(|j| j.output_dir.clone());
                if let Some(dir) = &output_dir {
                    reclaim_dir(dir).await;
                }
                if let Some(mut job) = self.jobs.get_mut(&job_id) {
                    if !job.state.is_terminal() {
                        job.set_error(e.to_string());
                    }
                    job.reclaimed = true;
                }
                self.broadcaster.publish_status(job_id, JobState::Error { reason: e.to_string() });
            }
            self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
        info!(worker_id, "transcoding worker stopped");
    }

    /// Runs one job end to end: probe, then retry loop with at most one
    /// hardware→software fallback and `max_retries` transient retries,
    /// mirroring the original's `attempt in range(MAX_RETRIES + 1)` loop.
    async fn process(&self, job_id: JobId) -> Result<(), GhostError> {
        let request = {
            let mut job = self.jobs.get_mut(&job_id).ok_or_else(|| GhostError::NotFound(job_id.to_string()))?;
            job.state = JobState::Processing;
            job.started_at = Some(std::time::Instant::now());
            job.request.clone()
        };
        self.broadcaster.publish_status(job_id, JobState::Processing);

        let media_info = self.probe.get_media_info(&request.source_uri).await?;
        let source = SourceVideoInfo { width: media_info.width, height: media_info.height, is_hdr: media_info.is_hdr };
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.duration_secs = Some(media_info.duration_secs);
        }

        let cancel = self.jobs.get(&job_id).map(|j| j.cancel.clone()).ok_or_else(|| GhostError::NotFound(job_id.to_string()))?;
        let output_dir = self.jobs.get(&job_id).map(|j| j.output_dir.clone()).unwrap();

        let mut fallback_used = false;
        let mut family = self.selector.choose(request.hw_family);
        let mut last_err: Option<GhostError> = None;

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                self.finish_cancelled(job_id).await;
                return Ok(());
            }

            let stall_deadline = self.compute_stall_deadline(media_info.duration_secs, media_info.height);
            let run_result = self
                .run_once(&job_id, &request, source, media_info.audio_channels, family, &output_dir, media_info.duration_secs, cancel.clone(), stall_deadline)
                .await;

            match run_result {
                Ok(artifacts) => {
                    self.selector.mark_succeeded(family);
                    self.finish_ready(job_id, artifacts, family);
                    if let Some(callback_url) = &request.callback_url {
                        self.fire_callback(job_id, callback_url.clone());
                    }
                    return Ok(());
                }
                Err(e) if matches!(e, GhostError::Hardware(_)) && !fallback_used && family != HwFamily::Software => {
                    warn!(%job_id, family = family.as_str(), "hardware encoder failed, falling back to software");
                    self.selector.mark_failed(family);
                    fallback_used = true;
                    family = HwFamily::Software;
                    let _ = clear_dir(&output_dir).await;
                    continue;
                }
                Err(e) if e.is_retryable_category() && attempt < e.max_retry_attempts(self.config.max_retries) => {
                    let delay = self.config.retry_delay * (attempt + 1);
                    info!(%job_id, attempt, ?delay, "transient failure, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            self.finish_cancelled(job_id).await;
            return Ok(());
        }

        Err(last_err.unwrap_or_else(|| GhostError::Unknown("exhausted retries with no diagnostic".to_string())))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_once(
        &self,
        job_id: &JobId,
        request: &Request,
        source: SourceVideoInfo,
        audio_channels: u32,
        family: HwFamily,
        output_dir: &std::path::Path,
        duration_secs: f64,
        cancel: tokio_util::sync::CancellationToken,
        stall_deadline: Duration,
    ) -> Result<Artifacts, GhostError> {
        let device_path = self
            .selector
            .snapshot()
            .hw_accels
            .iter()
            .find(|h| h.family == family)
            .and_then(|h| h.device_path.as_deref());

        if request.mode == OutputMode::Batch && request.two_pass {
            let passlog = output_dir.join("pass");
            let pass1_args = command::build_batch(request, source, audio_channels, family, device_path, output_dir, Some((1, &passlog)));
            self.run_supervised(job_id, &pass1_args, duration_secs, cancel.clone(), stall_deadline, false).await?;

            let pass2_args = command::build_batch(request, source, audio_channels, family, device_path, output_dir, Some((2, &passlog)));
            self.run_supervised(job_id, &pass2_args, duration_secs, cancel, stall_deadline, true).await?;
            return self.finalize_artifacts(request, output_dir, &[]).await;
        }

        let (args, variants) = match request.mode {
            OutputMode::SingleStream => (
                command::build_single_stream(request, source, audio_channels, family, device_path, self.config.segment_duration_secs, output_dir),
                vec![],
            ),
            OutputMode::Batch => (
                command::build_batch(request, source, audio_channels, family, device_path, output_dir, None),
                vec![],
            ),
            OutputMode::AdaptiveStream => {
                let (args, variants) = command::build_adaptive_stream(request, source, audio_channels, family, device_path, self.config.segment_duration_secs, output_dir);
                (args, variants)
            }
        };

        self.run_supervised(job_id, &args, duration_secs, cancel, stall_deadline, true).await?;
        self.finalize_artifacts(request, output_dir, &variants).await
    }

    /// Runs one encoder invocation through the Supervisor, forwarding
    /// progress samples only when `report_progress` is set — pass 1 of a
    /// two-pass batch encodes to `/dev/null` and has no meaningful progress
    /// to report, so pass 2 is the one that drives the broadcaster.
    async fn run_supervised(
        &self,
        job_id: &JobId,
        args: &[String],
        duration_secs: f64,
        cancel: tokio_util::sync::CancellationToken,
        stall_deadline: Duration,
        report_progress: bool,
    ) -> Result<(), GhostError> {
        let (progress_tx, mut progress_rx) = mpsc::channel(32);
        let job_id_for_task = *job_id;
        let broadcaster = self.broadcaster.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(sample) = progress_rx.recv().await {
                if report_progress {
                    broadcaster.publish_progress(job_id_for_task, sample);
                }
            }
        });

        let outcome = supervisor::run(
            &self.config.encoder_path,
            args,
            Some(duration_secs),
            cancel,
            progress_tx,
            SupervisorConfig { stall_deadline, ..Default::default() },
        )
        .await
        .map_err(|e| GhostError::Unknown(e.to_string()))?;
        forward_task.abort();

        match outcome {
            RunOutcome::Success => Ok(()),
            RunOutcome::Failed { stderr_tail } => Err(classify::to_ghost_error(&stderr_tail)),
            RunOutcome::Cancelled => Err(GhostError::Unknown("cancelled".to_string())),
            RunOutcome::Stalled => Err(GhostError::Transient("encoder stalled".to_string())),
        }
    }

    async fn finalize_artifacts(
        &self,
        request: &Request,
        output_dir: &std::path::Path,
        variants: &[crate::profiles::Variant],
    ) -> Result<Artifacts, GhostError> {
        match request.mode {
            OutputMode::SingleStream => {
                let playlist = output_dir.join("playlist.m3u8");
                crate::validator::validate_hls(&playlist).await?;
                Ok(Artifacts { playlist_path: Some(playlist), file_path: None })
            }
            OutputMode::AdaptiveStream => {
                let master = output_dir.join("master.m3u8");
                for (i, _variant) in variants.iter().enumerate() {
                    crate::validator::validate_hls(&output_dir.join(format!("variant_{i}.m3u8"))).await?;
                }
                Ok(Artifacts { playlist_path: Some(master), file_path: None })
            }
            OutputMode::Batch => {
                let container_ext = match request.container.as_str() {
                    "mkv" => "mkv",
                    "webm" => "webm",
                    _ => "mp4",
                };
                let file = output_dir.join(format!("output.{container_ext}"));
                crate::validator::validate_batch(&file).await?;
                Ok(Artifacts { playlist_path: None, file_path: Some(file) })
            }
        }
    }

    fn finish_ready(&self, job_id: JobId, artifacts: Artifacts, family: HwFamily) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            let encoder_used = format!("{}", family.as_str());
            job.set_ready(artifacts, encoder_used, family);
        }
        self.broadcaster.publish_status(job_id, JobState::Ready);
    }

    /// spec §8 scenario 4 (cancel) and scenario 6 (stall): the work
    /// directory is reclaimed once the worker has actually stopped touching
    /// it, before the CANCELLED transition is finalized.
    async fn finish_cancelled(&self, job_id: JobId) {
        let output_dir = self.jobs.get(&job_id).map(|j| j.output_dir.clone());
        if let Some(dir) = &output_dir {
            reclaim_dir(dir).await;
        }
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.set_cancelled();
            job.reclaimed = true;
        }
        self.broadcaster.publish_status(job_id, JobState::Cancelled);
    }

    /// spec §4.6: `max(stall_deadline_min, base + segments * per_segment_factor
    /// * resolution_factor)`, where resolution_factor is 2.0 for >=4K content,
    /// 1.5 for >=1080p, else 1.0 — larger content gets more no-progress slack.
    fn compute_stall_deadline(&self, duration_secs: f64, source_height: u32) -> Duration {
        let segments = (duration_secs / self.config.segment_duration_secs.max(1) as f64).ceil().max(1.0);
        let resolution_factor = if source_height >= 2160 {
            2.0
        } else if source_height >= 1080 {
            1.5
        } else {
            1.0
        };
        let scaled = self.config.stall_deadline_base.as_secs_f64()
            + segments * self.config.stall_deadline_per_segment_factor * resolution_factor;
        Duration::from_secs_f64(scaled).max(self.config.stall_deadline_min)
    }

    #[cfg(feature = "callback")]
    fn fire_callback(&self, job_id: JobId, url: String) {
        let job = self.jobs.get(&job_id).map(|j| j.clone());
        tokio::spawn(async move {
            let Some(job) = job else { return };
            let client = reqwest::Client::new();
            let body = serde_json::json!({
                "job_id": job.id.to_string(),
                "state": job.state.label(),
            });
            if let Err(e) = client.post(&url).json(&body).send().await {
                warn!(%job_id, error = %e, "completion callback failed");
            }
        });
    }

    #[cfg(not(feature = "callback"))]
    fn fire_callback(&self, _job_id: JobId, _url: String) {}
}

async fn reclaim_dir(dir: &std::path::Path) {
    let _ = tokio::fs::remove_dir_all(dir).await;
}

async fn clear_dir(dir: &std::path::Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let _ = tokio::fs::remove_file(entry.path()).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::HwAccelCapability;

    fn config() -> ServiceConfig {
        let mut c = ServiceConfig::default();
        c.work_dir = std::env::temp_dir().join(format!("ghoststream-test-{}", uuid::Uuid::new_v4()));
        c
    }

    fn capabilities() -> CapabilitySnapshot {
        CapabilitySnapshot {
            hw_accels: vec![HwAccelCapability { family: HwFamily::Nvenc, available: false, encoders: vec![], device_path: None }],
            video_codecs: vec!["h264".into()],
            audio_codecs: vec!["aac".into()],
            container_formats: vec!["hls".into(), "mp4".into()],
            encoder_version: "ffmpeg version test".into(),
            platform: "linux".into(),
            max_concurrent_jobs: 2,
        }
    }

    #[tokio::test]
    async fn create_job_rejects_invalid_request() {
        let manager = JobManager::new(config(), capabilities());
        let mut request = sample_request();
        request.source_uri = "".to_string();
        let err = manager.create_job(request).await.unwrap_err();
        assert!(matches!(err, GhostError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let manager = JobManager::new(config(), capabilities());
        let stats = manager.stats();
        assert_eq!(stats.total, 0);
    }

    fn sample_request() -> Request {
        Request {
            source_uri: "http://h/1080p.mp4".to_string(),
            mode: OutputMode::SingleStream,
            container: "mpegts".to_string(),
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            resolution: crate::job::Resolution::Source,
            bitrate: crate::job::Bitrate::Auto,
            hw_family: None,
            start_offset_secs: 0.0,
            tone_map: false,
            two_pass: false,
            callback_url: None,
        }
    }
}
