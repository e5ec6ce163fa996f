//! Filter Builder (spec §4.3): assembles the `-vf`/`-filter_complex` chain
//! for a job — tone-mapping, scaling (never upscaling), pixel format
//! coercion, and the ABR tee graph.
//!
//! Grounded on `ferrex-server/src/stream/transcoding/worker.rs`'s
//! `build_ffmpeg_command` `vf_chain` assembly (ordered `scale=`/format
//! pushes joined with `,`) and `profiles.rs`'s tonemap constants.

use crate::profiles::{TONEMAP_FILTER, TONEMAP_FILTER_SIMPLE};

#[derive(Debug, Clone, Copy)]
pub struct SourceVideoInfo {
    pub width: u32,
    pub height: u32,
    pub is_hdr: bool,
}

/// spec §4.3: codecs that can't carry an HDR transfer/primaries signal
/// (8-bit H.264 in practice) force a tonemap to SDR regardless of the
/// caller's `tone_map` flag; codecs that can carry HDR only tonemap when
/// the caller asks for it.
fn codec_can_carry_hdr(video_codec: &str) -> bool {
    matches!(video_codec, "h265" | "hevc" | "vp9" | "av1")
}

/// spec §4.3: tone-mapping is required iff the source is HDR AND either the
/// target codec can't carry HDR or the caller requested tone-mapping. When
/// it kicks in, HW-frame handoff to the CPU tonemap filter is unreliable
/// across HW families, so the Command Builder must drop HW-decode hints and
/// let the CPU decode the source.
pub fn requires_cpu_decode(source: SourceVideoInfo, tone_map_requested: bool, video_codec: &str) -> bool {
    source.is_hdr && (tone_map_requested || !codec_can_carry_hdr(video_codec))
}

/// Builds a single-output `-vf` chain: one of the two tonemap filters (if
/// the source is HDR and either requested or the target codec can't carry
/// HDR), then a `scale=` clause (only if the target is strictly smaller
/// than source — spec §4.3 "never upscale"), then `format=yuv420p` for
/// broad player compatibility.
pub fn build_video_filter(
    source: SourceVideoInfo,
    target: Option<(u32, u32)>,
    tone_map_requested: bool,
    video_codec: &str,
    simple_tonemap: bool,
) -> Option<String> {
    let mut chain = Vec::new();

    let apply_tonemap = source.is_hdr && (tone_map_requested || !codec_can_carry_hdr(video_codec));
    if apply_tonemap {
        chain.push(if simple_tonemap { TONEMAP_FILTER_SIMPLE } else { TONEMAP_FILTER }.to_string());
    }

    if let Some((w, h)) = target {
        if w < source.width || h < source.height {
            chain.push(format!("scale={}:{}:force_original_aspect_ratio=decrease", w, h));
        }
    } else if !apply_tonemap {
        // No scale and no tonemap: nothing to add, pass through untouched.
    }

    if !apply_tonemap {
        chain.push("format=yuv420p".to_string());
    }

    if chain.is_empty() {
        None
    } else {
        Some(chain.join(","))
    }
}

/// One leg of an ABR `filter_complex` tee: a scaled, labeled video output
/// feeding a dedicated encoder stream.
pub struct FilterLeg {
    pub label: String,
    pub filter: String,
}

/// Builds the `-filter_complex` graph for adaptive-stream mode: splits the
/// decoded video into `variant_count` legs, each scaled to its rung's
/// resolution and labeled `vN` for the Command Builder to map against.
pub fn build_abr_filter_complex(
    source: SourceVideoInfo,
    variant_resolutions: &[(u32, u32)],
) -> (String, Vec<FilterLeg>) {
    let n = variant_resolutions.len();
    let split_labels: Vec<String> = (0..n).map(|i| format!("s{}", i)).collect();
    let mut graph = format!("[0:v]split={}{}", n, split_labels.iter().map(|l| format!("[{}]", l)).collect::<String>());

    let mut legs = Vec::with_capacity(n);
    for (i, (w, h)) in variant_resolutions.iter().enumerate() {
        let label = format!("v{}", i);
        let clamped_w = (*w).min(source.width);
        let clamped_h = (*h).min(source.height);
        graph.push_str(&format!(
            ";[{}]scale={}:{}:force_original_aspect_ratio=decrease[{}]",
            split_labels[i], clamped_w, clamped_h, label
        ));
        legs.push(FilterLeg { label: label.clone(), filter: format!("scale={}:{}", clamped_w, clamped_h) });
    }

    (graph, legs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_scale_when_target_equals_source() {
        let source = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let chain = build_video_filter(source, Some((1920, 1080)), false, "h264", false).unwrap();
        assert!(!chain.contains("scale="));
    }

    #[test]
    fn never_upscales() {
        let source = SourceVideoInfo { width: 1280, height: 720, is_hdr: false };
        let chain = build_video_filter(source, Some((1920, 1080)), false, "h264", false).unwrap();
        assert!(!chain.contains("scale="));
    }

    #[test]
    fn applies_tonemap_only_for_hdr_source() {
        let sdr = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let chain = build_video_filter(sdr, None, true, "h265", false).unwrap();
        assert!(!chain.contains("tonemap"));

        let hdr = SourceVideoInfo { width: 1920, height: 1080, is_hdr: true };
        let chain = build_video_filter(hdr, None, true, "h265", false).unwrap();
        assert!(chain.contains("tonemap"));
    }

    #[test]
    fn hdr_source_to_h264_target_tonemaps_without_explicit_flag() {
        let hdr = SourceVideoInfo { width: 3840, height: 2160, is_hdr: true };
        let chain = build_video_filter(hdr, None, false, "h264", false).unwrap();
        assert!(chain.contains("tonemap"));
        assert!(requires_cpu_decode(hdr, false, "h264"));
    }

    #[test]
    fn hdr_source_to_hdr_capable_target_skips_tonemap_unless_requested() {
        let hdr = SourceVideoInfo { width: 3840, height: 2160, is_hdr: true };
        assert!(!requires_cpu_decode(hdr, false, "h265"));
        let chain = build_video_filter(hdr, None, false, "h265", false);
        assert!(chain.is_none());
    }

    #[test]
    fn abr_graph_splits_into_requested_variant_count() {
        let source = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let (graph, legs) = build_abr_filter_complex(source, &[(1920, 1080), (1280, 720)]);
        assert!(graph.contains("split=2"));
        assert_eq!(legs.len(), 2);
    }

    #[test]
    fn abr_legs_never_upscale_past_source() {
        let source = SourceVideoInfo { width: 1280, height: 720, is_hdr: false };
        let (_, legs) = build_abr_filter_complex(source, &[(1920, 1080)]);
        assert!(legs[0].filter.contains("1280:720"));
    }
}
