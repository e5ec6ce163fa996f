//! Capability Probe: one-shot startup inventory of hardware encoders,
//! codecs, and containers the local `ffmpeg` build actually supports
//! (spec §4.1).
//!
//! Grounded on `ferrex-server/src/transcoding/hardware.rs`'s
//! `HardwareDetector` (vendor-tool existence check + `ffmpeg -encoders`
//! substring probe) and `original_source/ghoststream/hardware/models.py`'s
//! `Capabilities`/`HWAccelCapability` shape.

use crate::job::HwFamily;
use serde::{Deserialize, Serialize};
use std::process::Command as StdCommand;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwAccelCapability {
    pub family: HwFamily,
    pub available: bool,
    pub encoders: Vec<String>,
    /// Discovered device path (spec §3 "discovered device path"), e.g. the
    /// DRI render node a VA-API capability was probed against. `None` for
    /// families with no device-file concept (NVENC, QSV, VideoToolbox, AMF).
    pub device_path: Option<String>,
}

/// Startup-time inventory, re-probed only on explicit restart (spec §4.1:
/// "probed once, cached for the process lifetime").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub hw_accels: Vec<HwAccelCapability>,
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
    pub container_formats: Vec<String>,
    /// `ffmpeg -version`'s first line, e.g. `ffmpeg version 6.1.1`.
    pub encoder_version: String,
    pub platform: String,
    pub max_concurrent_jobs: usize,
}

impl CapabilitySnapshot {
    pub fn available_families(&self) -> Vec<HwFamily> {
        self.hw_accels
            .iter()
            .filter(|h| h.available)
            .map(|h| h.family)
            .collect()
    }
}

pub struct CapabilityProbe {
    encoder_path: String,
}

const HW_ENCODER_NAMES: &[(HwFamily, &[(&str, &str)])] = &[
    (
        HwFamily::Nvenc,
        &[("h264_nvenc", "h264"), ("hevc_nvenc", "h265"), ("av1_nvenc", "av1")],
    ),
    (
        HwFamily::Qsv,
        &[("h264_qsv", "h264"), ("hevc_qsv", "h265"), ("av1_qsv", "av1")],
    ),
    (
        HwFamily::Vaapi,
        &[("h264_vaapi", "h264"), ("hevc_vaapi", "h265"), ("av1_vaapi", "av1")],
    ),
    (
        HwFamily::VideoToolbox,
        &[("h264_videotoolbox", "h264"), ("hevc_videotoolbox", "h265")],
    ),
    (HwFamily::Amf, &[("h264_amf", "h264"), ("hevc_amf", "h265")]),
];

impl CapabilityProbe {
    pub fn new(encoder_path: String) -> Self {
        Self { encoder_path }
    }

    pub async fn probe(&self, max_concurrent_jobs: usize) -> anyhow::Result<CapabilitySnapshot> {
        let encoder_list = self.list_encoders().await?;

        let mut hw_accels = Vec::new();
        for (family, codecs) in HW_ENCODER_NAMES {
            if !Self::vendor_tool_available(*family) {
                hw_accels.push(HwAccelCapability {
                    family: *family,
                    available: false,
                    encoders: vec![],
                    device_path: None,
                });
                continue;
            }
            let supported: Vec<String> = codecs
                .iter()
                .filter(|(enc, _)| encoder_list.contains(enc.to_owned()))
                .map(|(enc, _)| enc.to_string())
                .collect();
            let device_path = if *family == HwFamily::Vaapi { Self::vaapi_device_path() } else { None };
            hw_accels.push(HwAccelCapability {
                available: !supported.is_empty(),
                encoders: supported,
                family: *family,
                device_path,
            });
        }

        let video_codecs: Vec<String> = ["h264", "h265", "vp9", "av1"]
            .iter()
            .filter(|c| encoder_list.iter().any(|e| e.contains(*c) || (*c == &"h265" && e.contains("hevc"))))
            .map(|c| c.to_string())
            .collect();

        let audio_codecs: Vec<String> = ["aac", "ac3", "opus", "mp3"]
            .iter()
            .filter(|c| encoder_list.iter().any(|e| e.contains(*c)))
            .map(|c| c.to_string())
            .collect();

        let container_formats = self.list_muxers().await.unwrap_or_default();
        let encoder_version = self.encoder_version().await.unwrap_or_else(|_| "unknown".to_string());

        info!(
            detected = hw_accels.iter().filter(|h| h.available).count(),
            "capability probe complete"
        );

        Ok(CapabilitySnapshot {
            hw_accels,
            video_codecs,
            audio_codecs,
            container_formats,
            encoder_version,
            platform: std::env::consts::OS.to_string(),
            max_concurrent_jobs,
        })
    }

    async fn list_muxers(&self) -> anyhow::Result<Vec<String>> {
        let output = Command::new(&self.encoder_path).arg("-hide_banner").arg("-muxers").output().await?;
        let text = String::from_utf8_lossy(&output.stdout);
        let wanted = ["hls", "mp4", "matroska", "webm"];
        Ok(wanted
            .iter()
            .filter(|m| text.lines().any(|l| l.split_whitespace().nth(1) == Some(m)))
            .map(|m| m.to_string())
            .collect())
    }

    async fn encoder_version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.encoder_path).arg("-version").output().await?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or("unknown").to_string())
    }

    async fn list_encoders(&self) -> anyhow::Result<Vec<String>> {
        debug!(encoder_path = %self.encoder_path, "listing encoders");
        let output = Command::new(&self.encoder_path)
            .arg("-hide_banner")
            .arg("-encoders")
            .output()
            .await?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|s| s.to_string())
            .collect())
    }

    /// spec §4.1: walk candidate DRI render-node device paths and record the
    /// first that opens. `renderD128` is the common single-GPU node; later
    /// indices cover multi-GPU boxes.
    fn vaapi_device_path() -> Option<String> {
        (128..136)
            .map(|n| format!("/dev/dri/renderD{n}"))
            .find(|path| std::fs::File::open(path).is_ok())
    }

    /// Vendor tool presence gates the (slower) ffmpeg encoder-list probe:
    /// no point checking for `h264_nvenc` on a box without an NVIDIA driver.
    fn vendor_tool_available(family: HwFamily) -> bool {
        match family {
            HwFamily::Nvenc => StdCommand::new("nvidia-smi").output().is_ok_and(|o| o.status.success()),
            HwFamily::Vaapi => StdCommand::new("vainfo").output().is_ok_and(|o| o.status.success()),
            HwFamily::VideoToolbox => cfg!(target_os = "macos"),
            HwFamily::Amf => cfg!(target_os = "windows"),
            HwFamily::Qsv => true,
            HwFamily::Software => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_filters_unavailable_families() {
        let snap = CapabilitySnapshot {
            hw_accels: vec![
                HwAccelCapability { family: HwFamily::Nvenc, available: true, encoders: vec!["h264_nvenc".into()], device_path: None },
                HwAccelCapability { family: HwFamily::Qsv, available: false, encoders: vec![], device_path: None },
            ],
            video_codecs: vec!["h264".into()],
            audio_codecs: vec!["aac".into()],
            container_formats: vec!["hls".into(), "mp4".into()],
            encoder_version: "ffmpeg version test".into(),
            platform: "linux".into(),
            max_concurrent_jobs: 2,
        };
        assert_eq!(snap.available_families(), vec![HwFamily::Nvenc]);
    }
}
