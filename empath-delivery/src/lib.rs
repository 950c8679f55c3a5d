//! Delivery queue and processor for handling outbound mail from the spool
//!
//! This crate turns spooled messages into outbound SMTP deliveries. It owns:
//! - the in-memory delivery queue (status, retry bookkeeping, MX server cursor)
//! - DNS resolution and per-domain policy (rate limits, circuit breakers, TLS)
//! - the worker loop that scans the spool, claims due messages, and drives
//!   outbound SMTP transactions with exponential backoff
//! - DSN (bounce) generation and the dead-letter/cleanup janitor

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod circuit_breaker;
pub mod dkim;
pub mod dlq;
pub mod dns;
pub mod domain_config;
pub mod dsn;
pub mod error;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod smtp_transaction;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use dkim::{DkimConfig, DkimKeyCache};
pub use dlq::DlqConfig;
pub use dns::{DnsConfig, DnsError, DnsResolver, HickoryDnsResolver, MailServer, MockDnsResolver};
pub use domain_config::{DomainConfig, DomainConfigRegistry};
pub use dsn::DsnConfig;
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use policy::{DeliveryPipeline, DomainPolicyResolver, RetryPolicy};
pub use processor::DeliveryProcessor;
pub use queue::DeliveryQueue;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use service::DeliveryQueryService;
pub use types::{DeliveryInfo, SmtpTimeouts};

// Re-exported for convenience so downstream crates can observe delivery
// status without reaching into `empath_common` directly.
pub use empath_common::{DeliveryAttempt, DeliveryStatus};
