//! FFmpeg stderr text classification into the §7 error taxonomy.
//!
//! Grounded on `original_source/ghoststream/transcoding/error_classifier.py`:
//! a flat, ordered list of (substring, category) pairs, first match wins.
//! Kept as plain data rather than a hierarchy of types so new patterns are a
//! one-line diff.

use crate::error::GhostError;

struct Pattern {
    needle: &'static str,
    category: Category,
    description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Hardware,
    Transient,
    Resource,
    Fatal,
    Unknown,
}

/// Ordered, longest/most-specific patterns first so e.g. "nvenc session"
/// is matched before the generic "device" catch-all.
const PATTERNS: &[Pattern] = &[
    // NVIDIA NVENC
    Pattern { needle: "no nvenc capable devices", category: Category::Hardware, description: "no NVENC capable GPU" },
    Pattern { needle: "no capable devices found", category: Category::Hardware, description: "no hardware encoder devices" },
    Pattern { needle: "openencodesessionex failed", category: Category::Hardware, description: "NVENC session init failed" },
    Pattern { needle: "encodesessionlimitexceeded", category: Category::Hardware, description: "NVENC session limit reached" },
    Pattern { needle: "nvenc session", category: Category::Hardware, description: "NVENC session error" },
    Pattern { needle: "nvenc error", category: Category::Hardware, description: "NVENC error" },
    Pattern { needle: "cuda error", category: Category::Hardware, description: "CUDA error" },
    Pattern { needle: "cuda_error", category: Category::Hardware, description: "CUDA error" },
    Pattern { needle: "exceeds level limit", category: Category::Hardware, description: "resolution exceeds encoder level" },
    Pattern { needle: "nvenc", category: Category::Hardware, description: "NVENC error" },
    // Intel QuickSync
    Pattern { needle: "mfx_err_device_failed", category: Category::Hardware, description: "Intel QSV device failed" },
    Pattern { needle: "mfx_err_unsupported", category: Category::Hardware, description: "Intel QSV unsupported operation" },
    Pattern { needle: "mfx_err", category: Category::Hardware, description: "Intel QSV error" },
    Pattern { needle: "qsv init failed", category: Category::Hardware, description: "Intel QSV initialization failed" },
    Pattern { needle: "qsv", category: Category::Hardware, description: "QuickSync error" },
    // AMD AMF
    Pattern { needle: "amf device", category: Category::Hardware, description: "AMD AMF device error" },
    Pattern { needle: "amf error", category: Category::Hardware, description: "AMD AMF error" },
    Pattern { needle: "amf failed", category: Category::Hardware, description: "AMD AMF operation failed" },
    Pattern { needle: "d3d11 device", category: Category::Hardware, description: "DirectX 11 device error" },
    Pattern { needle: "d3d11va", category: Category::Hardware, description: "DirectX 11 VA error" },
    Pattern { needle: "amf", category: Category::Hardware, description: "AMF error" },
    // VA-API
    Pattern { needle: "vaapi surface", category: Category::Hardware, description: "VAAPI surface allocation failed" },
    Pattern { needle: "vaapi encode", category: Category::Hardware, description: "VAAPI encode error" },
    Pattern { needle: "vaapi", category: Category::Hardware, description: "VAAPI error" },
    Pattern { needle: "/dev/dri", category: Category::Hardware, description: "DRI device error" },
    // VideoToolbox
    Pattern { needle: "videotoolbox error", category: Category::Hardware, description: "VideoToolbox error" },
    Pattern { needle: "vt_session", category: Category::Hardware, description: "VideoToolbox session error" },
    Pattern { needle: "videotoolbox", category: Category::Hardware, description: "VideoToolbox error" },
    // Generic hardware
    Pattern { needle: "hw_frames_ctx", category: Category::Hardware, description: "hardware frame context error" },
    Pattern { needle: "hwaccel", category: Category::Hardware, description: "hardware acceleration error" },
    Pattern { needle: "hwupload", category: Category::Hardware, description: "hardware upload failed" },
    Pattern { needle: "hwdownload", category: Category::Hardware, description: "hardware download failed" },
    Pattern { needle: "encode session", category: Category::Hardware, description: "encoder session limit" },
    Pattern { needle: "unsupported property", category: Category::Hardware, description: "encoder property unsupported" },
    Pattern { needle: "incompatible pixel format", category: Category::Hardware, description: "incompatible pixel format for encoder" },
    Pattern { needle: "initialization failed", category: Category::Hardware, description: "hardware init failed" },
    Pattern { needle: "cannot open", category: Category::Hardware, description: "cannot open hardware device" },
    Pattern { needle: "gpu", category: Category::Hardware, description: "GPU error" },
    Pattern { needle: "driver", category: Category::Hardware, description: "driver error" },
    Pattern { needle: "device", category: Category::Hardware, description: "device error" },
    // Transient / network
    Pattern { needle: "connection refused", category: Category::Transient, description: "connection refused" },
    Pattern { needle: "connection reset", category: Category::Transient, description: "connection reset" },
    Pattern { needle: "connection timed out", category: Category::Transient, description: "connection timeout" },
    Pattern { needle: "temporarily unavailable", category: Category::Transient, description: "resource temporarily unavailable" },
    Pattern { needle: "network is unreachable", category: Category::Transient, description: "network unreachable" },
    Pattern { needle: "no route to host", category: Category::Transient, description: "no route to host" },
    Pattern { needle: "end of file", category: Category::Transient, description: "unexpected end of file" },
    Pattern { needle: "server returned", category: Category::Transient, description: "HTTP server error" },
    Pattern { needle: "broken pipe", category: Category::Transient, description: "broken pipe" },
    Pattern { needle: "ssl", category: Category::Transient, description: "SSL/TLS error" },
    Pattern { needle: "timeout", category: Category::Transient, description: "operation timeout" },
    // Resource (bounded retry — fd-limit is often transient pressure on the host)
    Pattern { needle: "out of memory", category: Category::Resource, description: "out of memory" },
    Pattern { needle: "cannot allocate", category: Category::Resource, description: "memory allocation failed" },
    Pattern { needle: "too many open files", category: Category::Resource, description: "file descriptor limit" },
    // Fatal — disk exhaustion fails immediately rather than retrying into a
    // full disk again (spec §7 "immediate fail for disk").
    Pattern { needle: "no space left", category: Category::Fatal, description: "no disk space" },
    Pattern { needle: "disk quota", category: Category::Fatal, description: "disk quota exceeded" },
    // Fatal
    Pattern { needle: "invalid data", category: Category::Fatal, description: "invalid input data" },
    Pattern { needle: "invalid argument", category: Category::Fatal, description: "invalid argument" },
    Pattern { needle: "no such file", category: Category::Fatal, description: "file not found" },
    Pattern { needle: "permission denied", category: Category::Fatal, description: "permission denied" },
    Pattern { needle: "codec not found", category: Category::Fatal, description: "codec not found" },
    Pattern { needle: "encoder not found", category: Category::Fatal, description: "encoder not found" },
    Pattern { needle: "decoder not found", category: Category::Fatal, description: "decoder not found" },
    Pattern { needle: "filter not found", category: Category::Fatal, description: "filter not found" },
    Pattern { needle: "moov atom not found", category: Category::Fatal, description: "invalid MP4 file" },
    Pattern { needle: "404 not found", category: Category::Fatal, description: "resource not found" },
    Pattern { needle: "403 forbidden", category: Category::Fatal, description: "access forbidden" },
];

/// Classify raw stderr text (case-insensitive substring match, first hit wins).
pub fn classify(text: &str) -> (Category, &'static str) {
    let lower = text.to_lowercase();
    for pattern in PATTERNS {
        if lower.contains(pattern.needle) {
            return (pattern.category, pattern.description);
        }
    }
    (Category::Unknown, "unmatched error text")
}

/// Turn classified stderr text into a [`GhostError`] carrying the
/// human-readable description, not the raw (potentially huge) stderr tail.
pub fn to_ghost_error(text: &str) -> GhostError {
    let (category, description) = classify(text);
    let message = description.to_string();
    match category {
        Category::Hardware => GhostError::Hardware(message),
        Category::Transient => GhostError::Transient(message),
        Category::Resource => GhostError::Resource(message),
        Category::Fatal => GhostError::Fatal(message),
        Category::Unknown => GhostError::Unknown(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_nvenc_as_hardware() {
        let (cat, _) = classify("Error: no capable devices found for NVENC");
        assert_eq!(cat, Category::Hardware);
    }

    #[test]
    fn classifies_connection_reset_as_transient() {
        let (cat, _) = classify("HTTP error: Connection reset by peer");
        assert_eq!(cat, Category::Transient);
    }

    #[test]
    fn classifies_permission_denied_as_fatal() {
        let (cat, _) = classify("/media/movie.mkv: Permission denied");
        assert_eq!(cat, Category::Fatal);
    }

    #[test]
    fn classifies_out_of_memory_as_resource() {
        let (cat, _) = classify("Cannot allocate memory");
        assert_eq!(cat, Category::Resource);
    }

    #[test]
    fn classifies_no_space_left_as_fatal() {
        let (cat, _) = classify("write failed: No space left on device");
        assert_eq!(cat, Category::Fatal);
    }

    #[test]
    fn unmatched_text_is_unknown() {
        let (cat, _) = classify("this does not look like anything to me");
        assert_eq!(cat, Category::Unknown);
    }

    #[test]
    fn is_case_insensitive() {
        let (cat, _) = classify("VAAPI SURFACE allocation error");
        assert_eq!(cat, Category::Hardware);
    }
}
