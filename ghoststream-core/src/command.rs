//! Command Builder (spec §4.4): assembles `ffmpeg` argument vectors for the
//! three output shapes. Builders never spawn anything — the Encoder
//! Supervisor owns the child process.
//!
//! Grounded on `ferrex-server/src/stream/transcoding/worker.rs`'s
//! `build_ffmpeg_command` (hwaccel args per encoder type, HLS muxer flags,
//! `-force_key_frames expr:gte` GOP alignment) and
//! `ferrex-server/src/transcoding/hardware.rs`'s `HardwareArgs::build_args`.

use crate::filters::{build_abr_filter_complex, build_video_filter, requires_cpu_decode, SourceVideoInfo};
use crate::job::{HwFamily, Request};
use crate::profiles::{audio_bitrate_for_channels, parse_bitrate_bps, plan_variants, video_bitrate_for_height};
use std::path::Path;

/// spec §4.4: resolve the request's bitrate directive against the target
/// height, emitting `-b:v`/`-maxrate`/`-bufsize` (maxrate == target, bufsize
/// == 2x) for both "auto" and an explicit override.
fn push_video_bitrate_args(args: &mut Vec<String>, request: &Request, target_height: u32) {
    let bps = match request.bitrate {
        crate::job::Bitrate::Explicit(bps) => bps,
        crate::job::Bitrate::Auto => parse_bitrate_bps(video_bitrate_for_height(target_height)),
    };
    args.push("-b:v".into());
    args.push(bps.to_string());
    args.push("-maxrate".into());
    args.push(bps.to_string());
    args.push("-bufsize".into());
    args.push((bps * 2).to_string());
}

fn hwaccel_args(family: HwFamily, device_path: Option<&str>) -> Vec<String> {
    match family {
        HwFamily::Vaapi => vec![
            "-hwaccel".into(), "vaapi".into(),
            "-hwaccel_device".into(), device_path.unwrap_or("/dev/dri/renderD128").to_string(),
            "-hwaccel_output_format".into(), "vaapi".into(),
        ],
        HwFamily::Nvenc => vec![
            "-hwaccel".into(), "cuda".into(),
            "-hwaccel_output_format".into(), "cuda".into(),
        ],
        HwFamily::Qsv => vec!["-hwaccel".into(), "qsv".into(), "-hwaccel_output_format".into(), "qsv".into()],
        HwFamily::VideoToolbox => vec!["-hwaccel".into(), "videotoolbox".into()],
        HwFamily::Amf => vec!["-hwaccel".into(), "d3d11va".into()],
        HwFamily::Software => vec![],
    }
}

/// Codec name ffmpeg expects for `-c:v`, given the chosen family and the
/// request's logical codec (`h264`/`h265`/...).
fn encoder_name(family: HwFamily, codec: &str) -> String {
    match family {
        HwFamily::Software => match codec {
            "h265" | "hevc" => "libx265".to_string(),
            "vp9" => "libvpx-vp9".to_string(),
            "av1" => "libaom-av1".to_string(),
            _ => "libx264".to_string(),
        },
        other => format!("{}_{}", if codec == "h265" { "hevc" } else { codec }, other.as_str()),
    }
}

fn common_input_args(source_uri: &str, start_offset_secs: f64) -> Vec<String> {
    let mut args = vec!["-hide_banner".into(), "-y".into(), "-probesize".into(), "50M".into(), "-analyzeduration".into(), "100M".into()];
    if start_offset_secs > 0.0 {
        args.push("-ss".into());
        args.push(format!("{:.3}", start_offset_secs));
    }
    args.push("-i".into());
    args.push(source_uri.to_string());
    args
}

/// Single-variant HLS (spec §4.4 "SINGLE-STREAM").
pub fn build_single_stream(
    request: &Request,
    source: SourceVideoInfo,
    audio_channels: u32,
    family: HwFamily,
    device_path: Option<&str>,
    segment_duration_secs: u32,
    output_dir: &Path,
) -> Vec<String> {
    let mut args = if requires_cpu_decode(source, request.tone_map, &request.video_codec) { vec![] } else { hwaccel_args(family, device_path) };
    args.extend(common_input_args(&request.source_uri, request.start_offset_secs));

    let enc = encoder_name(family, &request.video_codec);
    args.push("-c:v".into());
    args.push(enc);

    let target = match request.resolution {
        crate::job::Resolution::Source => None,
        crate::job::Resolution::Target(w, h) => Some((w, h)),
    };
    if let Some(vf) = build_video_filter(source, target, request.tone_map, &request.video_codec, family != HwFamily::Software) {
        args.push("-vf".into());
        args.push(vf);
    }

    let target_height = target.map(|(_, h)| h).unwrap_or(source.height);
    push_video_bitrate_args(&mut args, request, target_height);

    args.push("-c:a".into());
    args.push(request.audio_codec.clone());
    args.push("-b:a".into());
    args.push(audio_bitrate_for_channels(audio_channels).to_string());

    args.push("-map".into());
    args.push("0:v:0".into());
    args.push("-map".into());
    args.push("0:a:0".into());

    args.push("-force_key_frames".into());
    args.push(format!("expr:gte(t,n_forced*{})", segment_duration_secs));

    args.push("-f".into());
    args.push("hls".into());
    args.push("-hls_time".into());
    args.push(segment_duration_secs.to_string());
    args.push("-hls_list_size".into());
    args.push("0".into());
    args.push("-hls_segment_type".into());
    args.push("mpegts".into());
    args.push("-hls_playlist_type".into());
    args.push("event".into());
    args.push("-start_number".into());
    args.push("0".into());
    args.push("-hls_segment_filename".into());
    args.push(output_dir.join("segment_%05d.ts").to_string_lossy().into_owned());
    args.push(output_dir.join("playlist.m3u8").to_string_lossy().into_owned());

    args
}

/// Batch output: a single completed file, optionally two-pass
/// (spec §4.4 "BATCH").
pub fn build_batch(
    request: &Request,
    source: SourceVideoInfo,
    audio_channels: u32,
    family: HwFamily,
    device_path: Option<&str>,
    output_dir: &Path,
    pass: Option<(u8, &Path)>,
) -> Vec<String> {
    let mut args = if requires_cpu_decode(source, request.tone_map, &request.video_codec) { vec![] } else { hwaccel_args(family, device_path) };
    args.extend(common_input_args(&request.source_uri, request.start_offset_secs));

    let enc = encoder_name(family, &request.video_codec);
    args.push("-c:v".into());
    args.push(enc);

    let target = match request.resolution {
        crate::job::Resolution::Source => None,
        crate::job::Resolution::Target(w, h) => Some((w, h)),
    };
    if let Some(vf) = build_video_filter(source, target, request.tone_map, &request.video_codec, family != HwFamily::Software) {
        args.push("-vf".into());
        args.push(vf);
    }

    let target_height = target.map(|(_, h)| h).unwrap_or(source.height);
    push_video_bitrate_args(&mut args, request, target_height);

    if let Some((pass_num, passlog)) = pass {
        args.push("-pass".into());
        args.push(pass_num.to_string());
        args.push("-passlogfile".into());
        args.push(passlog.to_string_lossy().into_owned());
    }

    if pass.map(|(n, _)| n) == Some(1) {
        args.push("-an".into());
        args.push("-f".into());
        args.push("null".into());
        args.push(if cfg!(windows) { "NUL".to_string() } else { "/dev/null".to_string() });
        return args;
    }

    args.push("-c:a".into());
    args.push(request.audio_codec.clone());
    args.push("-b:a".into());
    args.push(audio_bitrate_for_channels(audio_channels).to_string());

    let container_ext = match request.container.as_str() {
        "mkv" => "mkv",
        "webm" => "webm",
        _ => "mp4",
    };
    if container_ext == "mp4" {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }
    args.push(output_dir.join(format!("output.{container_ext}")).to_string_lossy().into_owned());

    args
}

/// Multi-variant HLS (spec §4.4/§4.5 "ADAPTIVE-STREAM"). Returns the ffmpeg
/// args plus the variant metadata the caller needs to write the master
/// playlist once the run succeeds.
pub fn build_adaptive_stream(
    request: &Request,
    source: SourceVideoInfo,
    audio_channels: u32,
    family: HwFamily,
    device_path: Option<&str>,
    segment_duration_secs: u32,
    output_dir: &Path,
) -> (Vec<String>, Vec<crate::profiles::Variant>) {
    let variants = plan_variants(source.width, source.height);
    let (filter_complex, legs) = build_abr_filter_complex(source, &variants.iter().map(|v| (v.width, v.height)).collect::<Vec<_>>());

    let mut args = if requires_cpu_decode(source, request.tone_map, &request.video_codec) { vec![] } else { hwaccel_args(family, device_path) };
    args.extend(common_input_args(&request.source_uri, request.start_offset_secs));

    args.push("-filter_complex".into());
    args.push(filter_complex);

    let mut var_stream_map = Vec::with_capacity(variants.len());
    for (i, (variant, leg)) in variants.iter().zip(legs.iter()).enumerate() {
        args.push("-map".into());
        args.push(format!("[{}]", leg.label));
        args.push(format!("-c:v:{}", i));
        args.push(encoder_name(family, &request.video_codec));
        args.push(format!("-b:v:{}", i));
        args.push(variant.video_bitrate.clone());

        args.push("-map".into());
        args.push("0:a:0".into());
        args.push(format!("-c:a:{}", i));
        args.push(request.audio_codec.clone());
        args.push(format!("-b:a:{}", i));
        args.push(variant.audio_bitrate.clone());

        var_stream_map.push(format!("v:{},a:{},name:{}", i, i, variant.name));
    }

    args.push("-force_key_frames".into());
    args.push(format!("expr:gte(t,n_forced*{})", segment_duration_secs));

    args.push("-f".into());
    args.push("hls".into());
    args.push("-hls_time".into());
    args.push(segment_duration_secs.to_string());
    args.push("-hls_list_size".into());
    args.push("0".into());
    args.push("-hls_segment_type".into());
    args.push("mpegts".into());
    args.push("-hls_playlist_type".into());
    args.push("event".into());
    args.push("-master_pl_name".into());
    args.push("master.m3u8".into());
    args.push("-var_stream_map".into());
    args.push(var_stream_map.join(" "));
    args.push("-hls_segment_filename".into());
    args.push(output_dir.join("variant_%v_%05d.ts").to_string_lossy().into_owned());
    args.push(output_dir.join("variant_%v.m3u8").to_string_lossy().into_owned());

    (args, variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Bitrate, OutputMode, Resolution};

    fn request() -> Request {
        Request {
            source_uri: "http://h/s.mkv".into(),
            mode: OutputMode::SingleStream,
            container: "mp4".into(),
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            resolution: Resolution::Target(1280, 720),
            bitrate: Bitrate::Auto,
            hw_family: None,
            start_offset_secs: 0.0,
            tone_map: false,
            two_pass: false,
            callback_url: None,
        }
    }

    #[test]
    fn software_encoder_name_maps_h264_to_libx264() {
        assert_eq!(encoder_name(HwFamily::Software, "h264"), "libx264");
        assert_eq!(encoder_name(HwFamily::Software, "h265"), "libx265");
    }

    #[test]
    fn hardware_encoder_name_suffixes_family() {
        assert_eq!(encoder_name(HwFamily::Nvenc, "h264"), "h264_nvenc");
        assert_eq!(encoder_name(HwFamily::Nvenc, "h265"), "hevc_nvenc");
    }

    #[test]
    fn single_stream_includes_hls_muxer_flags() {
        let source = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let args = build_single_stream(&request(), source, 2, HwFamily::Software, None, 4, Path::new("/tmp/gs/job1"));
        assert!(args.iter().any(|a| a == "hls"));
        assert!(args.contains(&"-hls_time".to_string()));
    }

    #[test]
    fn adaptive_stream_produces_variant_map_entry_per_variant() {
        let source = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let (args, variants) = build_adaptive_stream(&request(), source, 2, HwFamily::Software, None, 4, Path::new("/tmp/gs/job1"));
        let map_idx = args.iter().position(|a| a == "-var_stream_map").unwrap();
        let entries = args[map_idx + 1].split(' ').count();
        assert_eq!(entries, variants.len());
    }

    #[test]
    fn two_pass_first_pass_has_no_audio_output() {
        let source = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let args = build_batch(&request(), source, 2, HwFamily::Software, None, Path::new("/tmp/gs/job1"), Some((1, Path::new("/tmp/gs/job1/pass"))));
        assert!(args.contains(&"-an".to_string()));
    }

    #[test]
    fn tonemap_drops_hwaccel_decode_hint() {
        let source = SourceVideoInfo { width: 3840, height: 2160, is_hdr: true };
        let mut req = request();
        req.tone_map = true;
        let args = build_single_stream(&req, source, 2, HwFamily::Nvenc, None, 4, Path::new("/tmp/gs/job1"));
        assert!(!args.contains(&"-hwaccel".to_string()));
        assert!(args.iter().any(|a| a.contains("tonemap") || a == "-vf"));
    }

    #[test]
    fn auto_bitrate_sets_maxrate_and_double_bufsize() {
        let source = SourceVideoInfo { width: 1920, height: 1080, is_hdr: false };
        let args = build_single_stream(&request(), source, 2, HwFamily::Software, None, 4, Path::new("/tmp/gs/job1"));
        let bv_idx = args.iter().position(|a| a == "-b:v").unwrap();
        let maxrate_idx = args.iter().position(|a| a == "-maxrate").unwrap();
        let bufsize_idx = args.iter().position(|a| a == "-bufsize").unwrap();
        assert_eq!(args[bv_idx + 1], args[maxrate_idx + 1]);
        let bv: u64 = args[bv_idx + 1].parse().unwrap();
        let bufsize: u64 = args[bufsize_idx + 1].parse().unwrap();
        assert_eq!(bufsize, bv * 2);
    }
}
