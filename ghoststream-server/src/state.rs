//! Composition root (spec §9: "an explicit `Service` composition root
//! holding owned sub-components ... no hidden singletons"). `AppState` is
//! the axum-visible handle into it; everything else a handler needs hangs
//! off this one `Clone`-able struct.
//!
//! Grounded on `ferrex-server/src/infra/app_state.rs`'s `AppState`.

use crate::config::Config;
use ghoststream_core::cleanup::CleanupScheduler;
use ghoststream_core::JobManager;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobManager>,
    pub cleanup: Arc<CleanupScheduler>,
    pub config: Arc<Config>,
    pub started_at: Instant,
    /// `Instant`/wall-clock pair captured together at startup so job
    /// timestamps (stored as monotonic `Instant`s, spec §3) can be rendered
    /// as unix milliseconds for external views without the core crate
    /// depending on a wall clock anywhere on its hot path.
    wall_anchor_instant: Instant,
    wall_anchor_unix_ms: u128,
}

impl AppState {
    pub fn new(jobs: Arc<JobManager>, cleanup: Arc<CleanupScheduler>, config: Arc<Config>) -> Self {
        Self {
            jobs,
            cleanup,
            config,
            started_at: Instant::now(),
            wall_anchor_instant: Instant::now(),
            wall_anchor_unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
        }
    }

    pub fn to_unix_ms(&self, instant: Instant) -> u128 {
        if instant >= self.wall_anchor_instant {
            self.wall_anchor_unix_ms + instant.duration_since(self.wall_anchor_instant).as_millis()
        } else {
            self.wall_anchor_unix_ms
                .saturating_sub(self.wall_anchor_instant.duration_since(instant).as_millis())
        }
    }
}
