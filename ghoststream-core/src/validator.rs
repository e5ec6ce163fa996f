//! Output Validator (spec §4.7): sanity-checks what the encoder actually
//! wrote before a job is allowed to reach READY. A zero-exit-status ffmpeg
//! run that produced a truncated playlist or a handful of near-empty
//! segments is still a failure.
//!
//! Grounded on `ferrex-server/src/transcoding/segments.rs`'s use of
//! `tokio::fs::metadata`/`remove_file` for segment bookkeeping, generalized
//! into read-only integrity checks.

use crate::error::GhostError;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// MPEG-TS packets start with this sync byte; its absence means the
/// container is corrupt, not just "low bitrate".
const MPEGTS_SYNC_BYTE: u8 = 0x47;

/// Below this, a segment is almost certainly a truncated/empty write.
const MIN_SEGMENT_BYTES: u64 = 1024;

/// Validates a single-stream or one variant's worth of HLS output: the
/// playlist exists and is non-empty, every referenced segment exists, meets
/// the minimum size, and (for `.ts` segments) starts with the MPEG-TS sync
/// byte. Size-distribution sanity excludes the final segment, which is
/// legitimately short.
pub async fn validate_hls(playlist_path: &Path) -> Result<(), GhostError> {
    let playlist_text = fs::read_to_string(playlist_path)
        .await
        .map_err(|e| GhostError::Validation(format!("cannot read playlist: {e}")))?;

    if playlist_text.trim().is_empty() {
        return Err(GhostError::Validation("playlist is empty".to_string()));
    }
    if !playlist_text.contains("#EXTM3U") {
        return Err(GhostError::Validation("missing #EXTM3U header".to_string()));
    }

    let base_dir = playlist_path.parent().unwrap_or_else(|| Path::new("."));
    let segment_names: Vec<&str> = playlist_text
        .lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .collect();

    if segment_names.is_empty() {
        return Err(GhostError::Validation("playlist references no segments".to_string()));
    }

    let mut sizes = Vec::with_capacity(segment_names.len());
    for (i, name) in segment_names.iter().enumerate() {
        let path = base_dir.join(name);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| GhostError::Validation(format!("segment missing on disk: {name}")))?;
        let size = metadata.len();
        let is_last = i == segment_names.len() - 1;

        if size < MIN_SEGMENT_BYTES && !is_last {
            return Err(GhostError::Validation(format!(
                "segment {name} is only {size} bytes"
            )));
        }
        if path.extension().and_then(|e| e.to_str()) == Some("ts") {
            check_sync_byte(&path).await?;
        }
        sizes.push(size);
    }

    check_size_distribution(&sizes)
}

/// Flags any non-final segment that falls far below the running average of
/// the segments seen before it (spec §4.7), as a sign of a partially-corrupt
/// encode — checked against the running average rather than the overall
/// mean so a single early bad segment doesn't also need company to be
/// caught, and a genuine drop in complexity later in the stream doesn't
/// retroactively indict segments that were fine when they were written.
fn check_size_distribution(sizes: &[u64]) -> Result<(), GhostError> {
    if sizes.len() < 2 {
        return Ok(());
    }
    let body = &sizes[..sizes.len() - 1];
    let mut running_sum = body[0];
    for (i, &size) in body.iter().enumerate().skip(1) {
        let running_mean = running_sum as f64 / i as f64;
        if running_mean > 0.0 && (size as f64) < running_mean * 0.05 {
            return Err(GhostError::Validation(format!(
                "segment {i} is only {size} bytes, far below the running average of {running_mean:.0}"
            )));
        }
        running_sum += size;
    }
    Ok(())
}

async fn check_sync_byte(path: &Path) -> Result<(), GhostError> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| GhostError::Validation(format!("cannot open segment: {e}")))?;
    file.seek(std::io::SeekFrom::Start(0)).await.ok();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)
        .await
        .map_err(|e| GhostError::Validation(format!("cannot read segment header: {e}")))?;
    if byte[0] != MPEGTS_SYNC_BYTE {
        return Err(GhostError::Validation(format!(
            "segment {} missing MPEG-TS sync byte",
            path.display()
        )));
    }
    Ok(())
}

/// Validates a completed batch output file: exists and is larger than the
/// minimum segment floor (a near-zero-byte "completed" file is never valid).
pub async fn validate_batch(output_path: &Path) -> Result<(), GhostError> {
    let metadata = fs::metadata(output_path)
        .await
        .map_err(|e| GhostError::Validation(format!("output file missing: {e}")))?;
    if metadata.len() < MIN_SEGMENT_BYTES {
        return Err(GhostError::Validation(format!(
            "output file is only {} bytes",
            metadata.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn rejects_empty_playlist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        fs::write(&path, "").await.unwrap();
        let err = validate_hls(&path).await.unwrap_err();
        assert!(matches!(err, GhostError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_playlist_missing_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        fs::write(&path, "segment_0.ts\n").await.unwrap();
        let err = validate_hls(&path).await.unwrap_err();
        assert!(matches!(err, GhostError::Validation(_)));
    }

    #[tokio::test]
    async fn accepts_well_formed_playlist_with_valid_segments() {
        let dir = tempdir().unwrap();
        let seg_path = dir.path().join("segment_0.ts");
        let mut seg = fs::File::create(&seg_path).await.unwrap();
        let mut data = vec![0x47u8];
        data.extend(std::iter::repeat(0u8).take(4096));
        seg.write_all(&data).await.unwrap();

        let playlist_path = dir.path().join("playlist.m3u8");
        fs::write(&playlist_path, "#EXTM3U\n#EXTINF:4.0,\nsegment_0.ts\n#EXT-X-ENDLIST\n")
            .await
            .unwrap();

        assert!(validate_hls(&playlist_path).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_segment_missing_sync_byte() {
        let dir = tempdir().unwrap();
        let seg_path = dir.path().join("segment_0.ts");
        fs::write(&seg_path, vec![0x00u8; 4096]).await.unwrap();

        let playlist_path = dir.path().join("playlist.m3u8");
        fs::write(&playlist_path, "#EXTM3U\nsegment_0.ts\n").await.unwrap();

        let err = validate_hls(&playlist_path).await.unwrap_err();
        assert!(matches!(err, GhostError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_single_interior_segment_far_below_running_average() {
        let dir = tempdir().unwrap();
        for (i, size) in [40_000usize, 42_000, 1_500, 41_000].into_iter().enumerate() {
            let seg_path = dir.path().join(format!("segment_{i}.ts"));
            let mut data = vec![0x47u8];
            data.extend(std::iter::repeat(0u8).take(size.max(1) - 1));
            fs::write(&seg_path, data).await.unwrap();
        }

        let playlist_path = dir.path().join("playlist.m3u8");
        fs::write(
            &playlist_path,
            "#EXTM3U\nsegment_0.ts\nsegment_1.ts\nsegment_2.ts\nsegment_3.ts\n#EXT-X-ENDLIST\n",
        )
        .await
        .unwrap();

        let err = validate_hls(&playlist_path).await.unwrap_err();
        assert!(matches!(err, GhostError::Validation(_)));
    }

    #[tokio::test]
    async fn batch_rejects_undersized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output.mp4");
        fs::write(&path, vec![0u8; 10]).await.unwrap();
        let err = validate_batch(&path).await.unwrap_err();
        assert!(matches!(err, GhostError::Validation(_)));
    }
}
