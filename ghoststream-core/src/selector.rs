//! Encoder Selector (spec §4.2): picks a hardware family for a job, tracks
//! per-family failure history, and backs a failing family off exponentially
//! before retrying it.
//!
//! Grounded on `ferrex-server/src/transcoding/hardware.rs`'s
//! `HardwareSelector` (fixed preference list, `select_encoder` by codec) and
//! `original_source/ghoststream/hardware/models.py`'s
//! `Capabilities::get_best_hw_accel` (platform-dependent ladder: macOS is
//! VideoToolbox-only, Windows prefers NVENC>AMF>QSV, Linux prefers
//! NVENC>VAAPI>QSV).

use crate::capability::CapabilitySnapshot;
use crate::job::HwFamily;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Platform-dependent preference ladder, most preferred first, ending in
/// software as the universal fallback.
fn preference_ladder(platform: &str) -> &'static [HwFamily] {
    match platform {
        "macos" => &[HwFamily::VideoToolbox, HwFamily::Software],
        "windows" => &[HwFamily::Nvenc, HwFamily::Amf, HwFamily::Qsv, HwFamily::Software],
        _ => &[HwFamily::Nvenc, HwFamily::Vaapi, HwFamily::Qsv, HwFamily::Software],
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

const MAX_COOLDOWN: Duration = Duration::from_secs(3600);
/// Spec §4.2: a family is disabled only once it reaches this many
/// consecutive failures; below it, `choose` still offers it.
const DISABLE_THRESHOLD: u32 = 3;

impl FailureRecord {
    fn new() -> Self {
        Self { consecutive_failures: 0, last_failure: None }
    }

    /// `min(1h, 5min * 2^(failures - 3))`, defined for `failures >=
    /// DISABLE_THRESHOLD`.
    fn cooldown_for(failures: u32) -> Duration {
        let exp = failures.saturating_sub(DISABLE_THRESHOLD);
        let secs = 300u64.saturating_mul(1u64 << exp.min(10));
        Duration::from_secs(secs).min(MAX_COOLDOWN)
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure = None;
    }

    /// Disabled once `consecutive_failures >= DISABLE_THRESHOLD`, and the
    /// cooldown window computed at the failure count that tripped it hasn't
    /// elapsed yet. Auto-reenables (resetting the count) once it has.
    fn is_cooling_down(&mut self) -> bool {
        if self.consecutive_failures < DISABLE_THRESHOLD {
            return false;
        }
        let Some(last_failure) = self.last_failure else { return false };
        let cooldown = Self::cooldown_for(self.consecutive_failures);
        if Instant::now().duration_since(last_failure) >= cooldown {
            self.consecutive_failures = 0;
            self.last_failure = None;
            false
        } else {
            true
        }
    }
}

/// Tracks per-(family) failure state across jobs, protected by a single
/// mutex since updates are infrequent relative to job throughput.
pub struct EncoderSelector {
    snapshot: CapabilitySnapshot,
    failures: Mutex<HashMap<HwFamily, FailureRecord>>,
}

impl EncoderSelector {
    pub fn new(snapshot: CapabilitySnapshot) -> Self {
        Self { snapshot, failures: Mutex::new(HashMap::new()) }
    }

    /// Choose a hardware family for `codec`. `requested` pins a specific
    /// family (spec §3 Request "hw family: auto | name"); `None` means let
    /// the platform ladder decide. Returns `Software` if nothing else
    /// qualifies — the universal fallback never needs probing.
    pub fn choose(&self, requested: Option<HwFamily>) -> HwFamily {
        if let Some(family) = requested {
            if family == HwFamily::Software || self.is_usable(family) {
                return family;
            }
            // Requested family unavailable or cooling down: fall through to
            // automatic selection rather than failing the job outright.
        }

        for family in preference_ladder(&self.snapshot.platform) {
            if *family == HwFamily::Software {
                return HwFamily::Software;
            }
            if self.is_usable(*family) {
                return *family;
            }
        }
        HwFamily::Software
    }

    fn is_usable(&self, family: HwFamily) -> bool {
        let available = self
            .snapshot
            .available_families()
            .iter()
            .any(|f| *f == family);
        if !available {
            return false;
        }
        !self
            .failures
            .lock()
            .get_mut(&family)
            .is_some_and(|r| r.is_cooling_down())
    }

    pub fn mark_failed(&self, family: HwFamily) {
        if family == HwFamily::Software {
            return;
        }
        self.failures
            .lock()
            .entry(family)
            .or_insert_with(FailureRecord::new)
            .record_failure();
    }

    pub fn mark_succeeded(&self, family: HwFamily) {
        if let Some(record) = self.failures.lock().get_mut(&family) {
            record.record_success();
        }
    }

    pub fn snapshot(&self) -> &CapabilitySnapshot {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::HwAccelCapability;

    fn snapshot(platform: &str, families: &[HwFamily]) -> CapabilitySnapshot {
        CapabilitySnapshot {
            hw_accels: families
                .iter()
                .map(|f| HwAccelCapability { family: *f, available: true, encoders: vec![], device_path: None })
                .collect(),
            video_codecs: vec!["h264".into()],
            audio_codecs: vec!["aac".into()],
            container_formats: vec!["hls".into(), "mp4".into()],
            encoder_version: "ffmpeg version test".into(),
            platform: platform.to_string(),
            max_concurrent_jobs: 2,
        }
    }

    #[test]
    fn macos_prefers_videotoolbox_only() {
        let sel = EncoderSelector::new(snapshot("macos", &[HwFamily::VideoToolbox]));
        assert_eq!(sel.choose(None), HwFamily::VideoToolbox);
    }

    #[test]
    fn linux_prefers_nvenc_over_vaapi() {
        let sel = EncoderSelector::new(snapshot("linux", &[HwFamily::Vaapi, HwFamily::Nvenc]));
        assert_eq!(sel.choose(None), HwFamily::Nvenc);
    }

    #[test]
    fn falls_back_to_software_with_no_hardware() {
        let sel = EncoderSelector::new(snapshot("linux", &[]));
        assert_eq!(sel.choose(None), HwFamily::Software);
    }

    #[test]
    fn single_failure_does_not_disable_family() {
        let sel = EncoderSelector::new(snapshot("linux", &[HwFamily::Nvenc]));
        sel.mark_failed(HwFamily::Nvenc);
        assert_eq!(sel.choose(None), HwFamily::Nvenc);
    }

    #[test]
    fn third_consecutive_failure_disables_family() {
        let sel = EncoderSelector::new(snapshot("linux", &[HwFamily::Nvenc]));
        sel.mark_failed(HwFamily::Nvenc);
        sel.mark_failed(HwFamily::Nvenc);
        assert_eq!(sel.choose(None), HwFamily::Nvenc);
        sel.mark_failed(HwFamily::Nvenc);
        assert_eq!(sel.choose(None), HwFamily::Software);
    }

    #[test]
    fn success_clears_failure_state() {
        let sel = EncoderSelector::new(snapshot("linux", &[HwFamily::Nvenc]));
        sel.mark_failed(HwFamily::Nvenc);
        sel.mark_failed(HwFamily::Nvenc);
        sel.mark_failed(HwFamily::Nvenc);
        sel.mark_succeeded(HwFamily::Nvenc);
        assert_eq!(sel.choose(None), HwFamily::Nvenc);
    }

    #[test]
    fn requested_family_falls_through_when_unavailable() {
        let sel = EncoderSelector::new(snapshot("linux", &[HwFamily::Vaapi]));
        assert_eq!(sel.choose(Some(HwFamily::Nvenc)), HwFamily::Vaapi);
    }
}
