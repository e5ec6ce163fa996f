//! Quality preset ladder and ABR variant planning (spec §4.4, §4.5).
//!
//! Grounded on `ferrex-server/src/transcoding/profiles.rs`'s
//! `AdaptiveBitrateProfile::generate_for_resolution` (variant shape, bandwidth
//! padding over nominal bitrate) and
//! `original_source/ghoststream/transcoding/constants.py`'s `QUALITY_LADDER`
//! (the resolution/bitrate/CRF/preset rows and `AUDIO_BITRATE_MAP`).

use serde::{Deserialize, Serialize};

/// One rung of the quality ladder. `crf` is only used when the chosen
/// encoder is software x264/x265; hardware encoders use `video_bitrate`
/// directly (Command Builder's concern, not this module's).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityPreset {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
    pub crf: u32,
    pub software_preset: &'static str,
}

/// Ordered highest quality first. Matches the teacher's "Plex/Jellyfin-style"
/// ladder naming.
pub const QUALITY_LADDER: &[QualityPreset] = &[
    QualityPreset { name: "4K", width: 3840, height: 2160, video_bitrate: "20M", audio_bitrate: "384k", crf: 18, software_preset: "fast" },
    QualityPreset { name: "1080p", width: 1920, height: 1080, video_bitrate: "8M", audio_bitrate: "192k", crf: 20, software_preset: "fast" },
    QualityPreset { name: "720p", width: 1280, height: 720, video_bitrate: "4M", audio_bitrate: "128k", crf: 22, software_preset: "fast" },
    QualityPreset { name: "480p", width: 854, height: 480, video_bitrate: "1.5M", audio_bitrate: "96k", crf: 24, software_preset: "faster" },
    QualityPreset { name: "360p", width: 640, height: 360, video_bitrate: "800k", audio_bitrate: "64k", crf: 26, software_preset: "faster" },
];

/// Upper bound on the number of variants assembled into a master playlist
/// (spec §4.5: "first 4 variants").
pub const MAX_ABR_VARIANTS: usize = 4;

/// Audio bitrate recommendation keyed by channel count, falling back to the
/// stereo row for channel counts the ladder doesn't name.
pub fn audio_bitrate_for_channels(channels: u32) -> &'static str {
    match channels {
        1 => "64k",
        2 => "128k",
        6 => "384k",
        8 => "512k",
        _ => "128k",
    }
}

/// Video bitrate for "auto" (spec §4.4): looked up by target height against
/// the same ladder rungs, falling back to the nearest rung at or below the
/// target. Returns the nominal bitrate string (`-b:v`); the caller derives
/// `-maxrate`/`-bufsize` from it (maxrate == target, bufsize == 2x).
pub fn video_bitrate_for_height(target_height: u32) -> &'static str {
    QUALITY_LADDER
        .iter()
        .find(|p| p.height <= target_height)
        .map(|p| p.video_bitrate)
        .unwrap_or_else(|| QUALITY_LADDER.last().expect("ladder is non-empty").video_bitrate)
}

/// HDR->SDR tone-map filter chain (Mobius operator). `zscale` needs the
/// input colorspace hints (`tin`/`min`/`pin`) spelled out or it can't find a
/// conversion path for PQ/BT.2020 sources.
pub const TONEMAP_FILTER: &str = "zscale=tin=smpte2084:min=bt2020nc:pin=bt2020:t=linear:npl=100,format=gbrpf32le,zscale=p=bt709,tonemap=tonemap=mobius:desat=0,zscale=t=bt709:m=bt709:r=tv,format=yuv420p";

/// Fallback for builds without `zscale` support: strips the HDR tags and lets
/// players reinterpret the (unconverted) picture as BT.709.
pub const TONEMAP_FILTER_SIMPLE: &str = "setparams=colorspace=bt709:color_primaries=bt709:color_trc=bt709,format=yuv420p";

/// One planned ABR rendition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub crf: u32,
    pub software_preset: String,
    /// Bandwidth advertised in the master playlist's `BANDWIDTH` attribute;
    /// padded over the nominal video bitrate to account for container and
    /// audio overhead (mirrors the teacher's `bandwidth` field).
    pub bandwidth_bps: u64,
}

pub fn parse_bitrate_bps(s: &str) -> u64 {
    let s = s.trim();
    if let Some(num) = s.strip_suffix('M').or_else(|| s.strip_suffix('m')) {
        (num.parse::<f64>().unwrap_or(0.0) * 1_000_000.0) as u64
    } else if let Some(num) = s.strip_suffix('k').or_else(|| s.strip_suffix('K')) {
        (num.parse::<f64>().unwrap_or(0.0) * 1_000.0) as u64
    } else {
        s.parse::<u64>().unwrap_or(0)
    }
}

/// Build the ABR variant ladder for a source of `source_width`x`source_height`:
/// rungs at or below the source resolution (spec §4.5 "never upscale"),
/// highest quality first, capped at [`MAX_ABR_VARIANTS`].
///
/// Always includes at least one variant — if the source is smaller than the
/// lowest rung, the lowest rung is used verbatim (matches the teacher's
/// unconditional 480p/360p fallback entries).
pub fn plan_variants(source_width: u32, source_height: u32) -> Vec<Variant> {
    let mut eligible: Vec<&QualityPreset> = QUALITY_LADDER
        .iter()
        .filter(|p| p.width <= source_width && p.height <= source_height)
        .collect();

    if eligible.is_empty() {
        eligible.push(QUALITY_LADDER.last().expect("ladder is non-empty"));
    }

    eligible
        .into_iter()
        .take(MAX_ABR_VARIANTS)
        .map(|p| {
            let nominal = parse_bitrate_bps(p.video_bitrate) + parse_bitrate_bps(p.audio_bitrate);
            Variant {
                name: p.name.to_string(),
                width: p.width,
                height: p.height,
                video_bitrate: p.video_bitrate.to_string(),
                audio_bitrate: p.audio_bitrate.to_string(),
                crf: p.crf,
                software_preset: p.software_preset.to_string(),
                bandwidth_bps: (nominal as f64 * 1.05) as u64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_variants_at_four() {
        let variants = plan_variants(3840, 2160);
        assert!(variants.len() <= MAX_ABR_VARIANTS);
        assert_eq!(variants[0].name, "4K");
    }

    #[test]
    fn never_upscales_past_source() {
        let variants = plan_variants(1280, 720);
        assert!(variants.iter().all(|v| v.width <= 1280 && v.height <= 720));
        assert_eq!(variants[0].name, "720p");
    }

    #[test]
    fn falls_back_to_lowest_rung_below_ladder_floor() {
        let variants = plan_variants(320, 180);
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].name, "360p");
    }

    #[test]
    fn parses_megabit_and_kilobit_suffixes() {
        assert_eq!(parse_bitrate_bps("8M"), 8_000_000);
        assert_eq!(parse_bitrate_bps("800k"), 800_000);
    }

    #[test]
    fn audio_bitrate_falls_back_for_unusual_channel_counts() {
        assert_eq!(audio_bitrate_for_channels(2), "128k");
        assert_eq!(audio_bitrate_for_channels(4), "128k");
        assert_eq!(audio_bitrate_for_channels(6), "384k");
    }
}
