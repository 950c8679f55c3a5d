//! Shared submission path for outbound mail intake.
//!
//! Both the SMTP server and the HTTP submission API funnel accepted
//! messages through [`service::SubmissionService`] before anything reaches
//! the delivery queue. This crate owns:
//! - per-sender-domain submission mode (production/sandbox/redirect/bcc)
//! - the sandbox capture namespace non-production modes write to
//! - the multi-axis sliding-window admission rate limiter

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod domain_mode;
pub mod error;
pub mod rate_limiter;
pub mod sandbox;
pub mod service;

pub use config::SubmissionConfig;
pub use domain_mode::{DomainModeConfig, DomainModeRegistry, Mode};
pub use error::SubmissionError;
pub use rate_limiter::{Axis, AxisLimit, SubmissionRateLimitConfig, SubmissionRateLimiter};
pub use sandbox::SandboxConfig;
pub use service::{Source, SubmissionOutcome, SubmissionService};
