//! Error types surfaced by the shared submission path.

use std::time::Duration;

use thiserror::Error;

/// Failures the submission path can report back to the intake surface
/// (SMTP or HTTP) that called it.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The envelope itself is malformed: no sender, no recipients, or a
    /// recipient/sender address with no parseable domain.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// An admission axis exceeded its configured limit.
    #[error("rate limited on {axis}, retry after {retry_after:?}")]
    RateLimited {
        /// Which axis tripped the limit (for logging/metrics).
        axis: String,
        /// How long the caller should wait before resubmitting.
        retry_after: Duration,
    },

    /// The backing store rejected the write.
    #[error("storage error: {0}")]
    Storage(#[from] empath_spool::SpoolError),
}

impl SubmissionError {
    /// The `Retry-After` duration to surface to the caller, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::InvalidEnvelope(_) | Self::Storage(_) => None,
        }
    }
}
