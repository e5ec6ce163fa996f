//! Media Probe (spec §4.1): runs `ffprobe` against the source to recover
//! duration, resolution, and HDR signaling before a job is dispatched to a
//! worker.
//!
//! Grounded on `ferrex-core/src/metadata/hdr_metadata.rs`'s
//! `HdrMetadataExtractor` (JSON `-show_streams` invocation, pix_fmt/color_*
//! field extraction) and `original_source/ghoststream/transcoding/engine.py`'s
//! `get_media_info(source, retry_count)` retry wrapper.

use crate::error::GhostError;
use crate::filters::SourceVideoInfo;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub is_hdr: bool,
    pub audio_channels: u32,
}

impl MediaInfo {
    pub fn video_info(&self) -> SourceVideoInfo {
        SourceVideoInfo { width: self.width, height: self.height, is_hdr: self.is_hdr }
    }
}

const PROBE_RETRIES: u32 = 2;
const PROBE_RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct MediaProbe {
    probe_path: String,
}

impl MediaProbe {
    pub fn new(probe_path: String) -> Self {
        Self { probe_path }
    }

    /// Probes `source`, retrying transient failures up to [`PROBE_RETRIES`]
    /// times. A successful probe reporting zero duration is a fatal setup
    /// error (spec §4.1 "zero-duration sources never reach a worker"), not
    /// something retrying would fix.
    pub async fn get_media_info(&self, source: &str) -> Result<MediaInfo, GhostError> {
        let mut last_err = None;
        for attempt in 0..=PROBE_RETRIES {
            match self.run_probe(source).await {
                Ok(info) if info.duration_secs <= 0.0 => {
                    return Err(GhostError::Fatal(format!(
                        "source reports zero duration: {source}"
                    )));
                }
                Ok(info) => return Ok(info),
                Err(e) => {
                    warn!(attempt, error = %e, "probe attempt failed");
                    last_err = Some(e);
                    if attempt < PROBE_RETRIES {
                        tokio::time::sleep(PROBE_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GhostError::Fatal("probe failed with no diagnostic".into())))
    }

    async fn run_probe(&self, source: &str) -> Result<MediaInfo, GhostError> {
        debug!(%source, "running media probe");
        let output = Command::new(&self.probe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(source)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(crate::classify::to_ghost_error(&stderr));
        }

        let json_str = std::str::from_utf8(&output.stdout)
            .map_err(|_| GhostError::Fatal("probe produced non-UTF8 output".to_string()))?;
        let json: Value = serde_json::from_str(json_str)?;

        let duration_secs = json["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let streams = json["streams"].as_array().cloned().unwrap_or_default();
        let video_stream = streams.iter().find(|s| s["codec_type"] == "video");
        let audio_stream = streams.iter().find(|s| s["codec_type"] == "audio");

        let width = video_stream.and_then(|s| s["width"].as_u64()).unwrap_or(0) as u32;
        let height = video_stream.and_then(|s| s["height"].as_u64()).unwrap_or(0) as u32;
        let pix_fmt = video_stream.and_then(|s| s["pix_fmt"].as_str()).unwrap_or("");
        let color_transfer = video_stream.and_then(|s| s["color_transfer"].as_str()).unwrap_or("");

        let is_hdr = color_transfer.contains("smpte2084")
            || color_transfer.contains("arib-std-b67")
            || pix_fmt.contains("p10")
            || pix_fmt.contains("10le")
            || pix_fmt.contains("10be");

        let audio_channels = audio_stream.and_then(|s| s["channels"].as_u64()).unwrap_or(2) as u32;

        Ok(MediaInfo { duration_secs, width, height, is_hdr, audio_channels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdr_detected_from_smpte2084_transfer() {
        let json: Value = serde_json::from_str(
            r#"{"format":{"duration":"120.5"},"streams":[{"codec_type":"video","width":3840,"height":2160,"pix_fmt":"yuv420p10le","color_transfer":"smpte2084"}]}"#,
        ).unwrap();
        let transfer = json["streams"][0]["color_transfer"].as_str().unwrap();
        assert!(transfer.contains("smpte2084"));
    }
}
