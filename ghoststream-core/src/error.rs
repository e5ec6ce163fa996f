//! Error taxonomy for the job lifecycle (spec §7).
//!
//! Each variant corresponds to a row of the error taxonomy table: the
//! category determines local action (retry, fallback, fail) in
//! [`crate::manager`], not just presentation.

use thiserror::Error;

/// A classified failure surfaced by the encoder supervisor, validator, or
/// probe. The job manager pattern-matches on the variant, never on the
/// message text, once the classification has happened.
#[derive(Error, Debug)]
pub enum GhostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Encoder/device/driver/GPU failure: mark the encoder's failure record
    /// and allow one software fallback per job.
    #[error("hardware encoder error: {0}")]
    Hardware(String),

    /// Connection/timeout/reset/temporary failure: retry with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// OOM / no space / fd-limit: bounded retry for fd-limit, immediate
    /// fail for disk/memory exhaustion.
    #[error("resource error: {0}")]
    Resource(String),

    /// Invalid input / not found / permission / missing codec: no retry.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Unmatched stderr text: at most one retry.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// Output Validator rejection (§4.7): treated as a post-run failure,
    /// eligible for the same retry/fallback policy as an encoder failure.
    #[error("output validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not cancellable")]
    NotCancellable,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GhostError {
    pub fn is_retryable_category(&self) -> bool {
        matches!(
            self,
            GhostError::Transient(_) | GhostError::Resource(_) | GhostError::Unknown(_)
        )
    }

    /// spec §7: most retryable categories get the configured retry count,
    /// but Unknown (unmatched stderr) gets at most one retry regardless of
    /// `max_retries` — an unrecognized failure that recurs once is treated
    /// as persistent rather than transient noise.
    pub fn max_retry_attempts(&self, configured_max: u32) -> u32 {
        match self {
            GhostError::Unknown(_) => configured_max.min(1),
            _ => configured_max,
        }
    }
}

pub type Result<T> = std::result::Result<T, GhostError>;
