//! HTTP submission API error types

use thiserror::Error;

/// Errors that can occur while running the HTTP submission API server.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Failed to bind to the specified address
    #[error("Failed to bind submission API to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// Server encountered a runtime error
    #[error("Submission API server error: {0}")]
    ServerError(String),
}
