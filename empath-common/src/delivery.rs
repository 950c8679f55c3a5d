//! Shared delivery status types
//!
//! These types are produced by `empath-delivery` but live here so that other
//! crates (audit logging, FFI modules, control interfaces) can observe delivery
//! state without depending on the delivery processor itself.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// Status of a message as it moves through the delivery queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Message is pending delivery
    Pending,
    /// Message delivery is in progress
    InProgress,
    /// Message was successfully delivered
    Completed,
    /// Message delivery failed permanently
    Failed(String),
    /// Message delivery failed temporarily, will retry
    Retry { attempts: u32, last_error: String },
    /// Message exceeded its expiration window before it could be delivered
    Expired,
}

/// A single attempt to deliver a message to a remote MX server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// When the attempt was made
    pub timestamp: SystemTime,
    /// Error message if the attempt failed
    pub error: Option<String>,
    /// SMTP server that was contacted (host:port)
    pub server: String,
}

/// Snapshot of delivery state persisted alongside a spooled message
///
/// This is written into [`crate::context::Context::delivery`] so that queue
/// state (status, attempt history, retry timing) survives a restart of the
/// delivery processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryContext {
    /// The spooled message identifier, as a string
    pub message_id: String,
    /// Recipient domain this delivery targets
    pub domain: Domain,
    /// MX server currently being used, if determined
    pub server: Option<String>,
    /// Error from the most recent attempt, if any
    pub error: Option<String>,
    /// Number of attempts made so far
    pub attempts: Option<u32>,
    /// Current delivery status
    pub status: DeliveryStatus,
    /// Full history of delivery attempts
    pub attempt_history: Vec<DeliveryAttempt>,
    /// When the message was first queued for delivery
    pub queued_at: SystemTime,
    /// When the next retry should be attempted, if scheduled
    pub next_retry_at: Option<SystemTime>,
    /// Index into the resolved MX server list currently being tried
    pub current_server_index: usize,
}
