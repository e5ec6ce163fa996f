//! Cleanup Scheduler (spec §4.10): periodically reclaims artifacts for
//! stale terminal jobs, removes orphaned job directories left behind by a
//! crash, and drops job metadata entirely some time after reclamation.
//!
//! Grounded on `original_source/ghoststream/jobs.py`'s `_cleanup_loop` /
//! `_cleanup_stale_jobs` / `_cleanup_orphaned_dirs` / `get_cleanup_stats`
//! (streaming vs batch TTL split, 24h metadata grace period after
//! reclamation, "nearly stale" = age past 80% of TTL).

use crate::job::{JobId, JobState, OutputMode};
use crate::manager::JobManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct CleanupStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub ready_jobs: usize,
    pub cleaned_jobs: usize,
    pub nearly_stale: usize,
}

pub struct CleanupScheduler {
    manager: Arc<JobManager>,
    streaming_ttl: Duration,
    batch_ttl: Duration,
    record_ttl_after_cleanup: Duration,
    sweep_interval: Duration,
}

impl CleanupScheduler {
    pub fn new(
        manager: Arc<JobManager>,
        streaming_ttl: Duration,
        batch_ttl: Duration,
        record_ttl_after_cleanup: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self { manager, streaming_ttl, batch_ttl, record_ttl_after_cleanup, sweep_interval }
    }

    fn ttl_for(&self, mode: OutputMode) -> Duration {
        match mode {
            OutputMode::SingleStream | OutputMode::AdaptiveStream => self.streaming_ttl,
            OutputMode::Batch => self.batch_ttl,
        }
    }

    /// Spawns the periodic sweep task. Call once at startup alongside
    /// [`Self::reclaim_orphans`].
    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.sweep_interval).await;
                let cleaned = self.sweep().await;
                if cleaned > 0 {
                    info!(cleaned, "cleanup sweep reclaimed stale job artifacts");
                }
            }
        });
    }

    /// One sweep: reclaim artifacts for terminal jobs past their TTL, then
    /// drop metadata for jobs reclaimed more than `record_ttl_after_cleanup`
    /// ago. Two phases, matching the original's order — artifacts go first
    /// so a crash between phases never leaves an unreachable-but-undeleted
    /// directory.
    pub async fn sweep(&self) -> usize {
        let mut cleaned = 0;
        let now = Instant::now();

        for job in self.manager.all_jobs() {
            if !job.state.is_terminal() || job.reclaimed {
                continue;
            }
            let Some(_completed_at) = job.completed_at else { continue };
            let ttl = self.ttl_for(job.request.mode);
            if now.duration_since(job.last_access) > ttl {
                if let Err(e) = self.reclaim_artifacts(job.id).await {
                    warn!(job_id = %job.id, error = %e, "failed to reclaim job artifacts");
                    continue;
                }
                cleaned += 1;
            }
        }

        for job in self.manager.all_jobs() {
            if job.reclaimed {
                if let Some(completed_at) = job.completed_at {
                    if now.duration_since(completed_at) > self.record_ttl_after_cleanup {
                        let _ = self.manager.delete_job(job.id).await;
                    }
                }
            }
        }

        cleaned
    }

    async fn reclaim_artifacts(&self, job_id: JobId) -> std::io::Result<()> {
        if let Some(job) = self.manager.get_job(job_id, false) {
            let _ = tokio::fs::remove_dir_all(&job.output_dir).await;
        }
        self.manager.mark_reclaimed(job_id);
        Ok(())
    }

    /// Startup-time sweep of the work directory for subdirectories with no
    /// matching job record — artifacts from a crash mid-job.
    pub async fn reclaim_orphans(&self, work_dir: &std::path::Path) -> usize {
        let known: std::collections::HashSet<String> =
            self.manager.all_jobs().iter().map(|j| j.id.to_string()).collect();

        let mut cleaned = 0;
        let mut entries = match tokio::fs::read_dir(work_dir).await {
            Ok(e) => e,
            Err(_) => return 0,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else { continue };
            if known.contains(&name) {
                continue;
            }
            if tokio::fs::remove_dir_all(entry.path()).await.is_ok() {
                cleaned += 1;
                info!(dir = %name, "removed orphaned job directory");
            }
        }
        cleaned
    }

    /// spec §6 `cleanup_stats`: counts plus "nearly stale" — ready jobs past
    /// 80% of their TTL but not yet reclaimed.
    pub fn stats(&self) -> CleanupStats {
        let now = Instant::now();
        let mut stats = CleanupStats::default();
        for job in self.manager.all_jobs() {
            stats.total_jobs += 1;
            match job.state {
                JobState::Queued | JobState::Processing => stats.active_jobs += 1,
                _ if job.reclaimed => stats.cleaned_jobs += 1,
                JobState::Ready => {
                    stats.ready_jobs += 1;
                    let ttl = self.ttl_for(job.request.mode);
                    if now.duration_since(job.last_access).as_secs_f64() > ttl.as_secs_f64() * 0.8 {
                        stats.nearly_stale += 1;
                    }
                }
                _ => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySnapshot;
    use crate::config::ServiceConfig;

    fn manager() -> Arc<JobManager> {
        let mut config = ServiceConfig::default();
        config.work_dir = std::env::temp_dir().join(format!("ghoststream-cleanup-{}", uuid::Uuid::new_v4()));
        let capabilities = CapabilitySnapshot {
            hw_accels: vec![],
            video_codecs: vec!["h264".into()],
            audio_codecs: vec!["aac".into()],
            container_formats: vec!["hls".into(), "mp4".into()],
            encoder_version: "ffmpeg version test".into(),
            platform: "linux".into(),
            max_concurrent_jobs: 2,
        };
        JobManager::new(config, capabilities)
    }

    #[tokio::test]
    async fn sweep_on_empty_manager_is_a_noop() {
        let manager = manager();
        let scheduler = CleanupScheduler::new(manager, Duration::from_secs(60), Duration::from_secs(3600), Duration::from_secs(86400), Duration::from_secs(300));
        assert_eq!(scheduler.sweep().await, 0);
    }

    #[tokio::test]
    async fn stats_on_empty_manager_are_zero() {
        let manager = manager();
        let scheduler = CleanupScheduler::new(manager, Duration::from_secs(60), Duration::from_secs(3600), Duration::from_secs(86400), Duration::from_secs(300));
        let stats = scheduler.stats();
        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.nearly_stale, 0);
    }
}
