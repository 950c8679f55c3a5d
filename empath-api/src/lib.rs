//! HTTP submission API for Sendry
//!
//! A thin, authenticated intake: `POST /api/v1/send` with a bearer API key
//! and a JSON envelope. Accepted requests are handed to the same
//! [`empath_submission::SubmissionService`] the SMTP server uses, so both
//! intakes share one admission path, one set of domain-mode policies, and
//! one rate limiter.
//!
//! Everything past "accept or reject this request" -- template rendering,
//! delivery, retries -- belongs to other crates.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ApiConfig;
pub use error::ApiError;
pub use handler::{SendRequest, SendResponse};
pub use server::ApiServer;
