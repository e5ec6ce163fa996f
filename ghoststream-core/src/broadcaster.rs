//! Progress Broadcaster (spec §4.9): fans a job's progress out to any
//! number of subscribers (WebSocket handlers in `ghoststream-server`)
//! without letting one slow subscriber hold up the others or the worker
//! producing the updates.
//!
//! Two channels per job, grounded on the split already present in the
//! teacher's `JobQueue`/`JobMessage` split between status commands and
//! progress updates (`ferrex-server/src/transcoding/queue.rs`,
//! `stream/transcoding/worker.rs`'s `progress_tx`): a `watch` channel for
//! the high-rate, droppable progress sample (only the latest value matters)
//! and a `broadcast` channel for the low-rate, must-not-miss state
//! transitions.

use crate::job::{JobId, JobState, ProgressSample};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::warn;

const STATUS_CHANNEL_CAPACITY: usize = 16;

struct JobChannels {
    progress: watch::Sender<ProgressSample>,
    status: broadcast::Sender<JobState>,
}

/// Subscription handle: drop it to unsubscribe.
pub struct Subscription {
    pub progress: watch::Receiver<ProgressSample>,
    pub status: broadcast::Receiver<JobState>,
}

#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: DashMap<JobId, Arc<JobChannels>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    fn channels_for(&self, job_id: JobId) -> Arc<JobChannels> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| {
                let (progress, _) = watch::channel(ProgressSample::default());
                let (status, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
                Arc::new(JobChannels { progress, status })
            })
            .clone()
    }

    /// Publishes a new progress sample. Slow or absent subscribers never
    /// block this call — `watch` always keeps only the latest value.
    pub fn publish_progress(&self, job_id: JobId, sample: ProgressSample) {
        let channels = self.channels_for(job_id);
        let _ = channels.progress.send(sample);
    }

    /// Publishes a state transition. If a subscriber's buffer is full it
    /// will observe a `Lagged` error on its next `recv` rather than stalling
    /// the publisher or other subscribers — isolation is per-subscriber.
    pub fn publish_status(&self, job_id: JobId, state: JobState) {
        let channels = self.channels_for(job_id);
        if channels.status.send(state).is_err() {
            warn!(%job_id, "no subscribers for status transition");
        }
    }

    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        let channels = self.channels_for(job_id);
        Subscription {
            progress: channels.progress.subscribe(),
            status: channels.status.subscribe(),
        }
    }

    /// Drops the per-job channel pair once a job's artifacts are reclaimed;
    /// any outstanding subscriptions keep working off their own clone, they
    /// just won't see anything new.
    pub fn forget(&self, job_id: JobId) {
        self.channels.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscriber_sees_latest_progress_only() {
        let broadcaster = ProgressBroadcaster::new();
        let job_id = Uuid::new_v4();
        let mut sub = broadcaster.subscribe(job_id);

        broadcaster.publish_progress(job_id, ProgressSample { percent: 10.0, ..Default::default() });
        broadcaster.publish_progress(job_id, ProgressSample { percent: 50.0, ..Default::default() });

        sub.progress.changed().await.unwrap();
        assert_eq!(sub.progress.borrow().percent, 50.0);
    }

    #[tokio::test]
    async fn status_publish_without_subscribers_does_not_panic() {
        let broadcaster = ProgressBroadcaster::new();
        let job_id = Uuid::new_v4();
        broadcaster.publish_status(job_id, JobState::Queued);
    }

    #[tokio::test]
    async fn two_subscribers_both_receive_status_transition() {
        let broadcaster = ProgressBroadcaster::new();
        let job_id = Uuid::new_v4();
        let mut sub1 = broadcaster.subscribe(job_id);
        let mut sub2 = broadcaster.subscribe(job_id);

        broadcaster.publish_status(job_id, JobState::Processing);

        assert_eq!(sub1.status.recv().await.unwrap(), JobState::Processing);
        assert_eq!(sub2.status.recv().await.unwrap(), JobState::Processing);
    }
}
