//! Delivery queue management

pub mod cleanup;
pub mod retry;

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use empath_common::{DeliveryAttempt, DeliveryStatus, domain::Domain};
use empath_spool::SpooledMessageId;

use crate::{dns::MailServer, types::DeliveryInfo};

/// Manages the delivery queue for outbound messages
///
/// Backed by a lock-free concurrent map so the processor's scan/process/cleanup
/// tasks can all touch the queue without blocking each other.
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueue {
    queue: Arc<DashMap<SpooledMessageId, DeliveryInfo>>,
}

impl DeliveryQueue {
    /// Create a new empty delivery queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(DashMap::new()),
        }
    }

    /// Number of messages currently tracked in the queue
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue has no tracked messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Add a message to the delivery queue, creating fresh delivery state
    pub fn enqueue(&self, message_id: SpooledMessageId, recipient_domain: impl Into<Domain>) {
        self.queue.insert(
            message_id.clone(),
            DeliveryInfo::new(message_id, recipient_domain),
        );
    }

    /// Insert a fully-constructed `DeliveryInfo` (used to restore persisted state on restart)
    pub fn insert(&self, message_id: SpooledMessageId, info: DeliveryInfo) {
        self.queue.insert(message_id, info);
    }

    /// Get delivery info for a message
    #[must_use]
    pub fn get(&self, message_id: &SpooledMessageId) -> Option<DeliveryInfo> {
        self.queue.get(message_id).map(|entry| entry.clone())
    }

    /// Update the status of a message
    pub fn update_status(&self, message_id: &SpooledMessageId, status: DeliveryStatus) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.status = status;
        }
    }

    /// Record a delivery attempt
    pub fn record_attempt(&self, message_id: &SpooledMessageId, attempt: DeliveryAttempt) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.record_attempt(attempt);
        }
    }

    /// Set the resolved mail servers for a message
    pub fn set_mail_servers(&self, message_id: &SpooledMessageId, servers: Arc<Vec<MailServer>>) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.mail_servers = servers;
            info.current_server_index = 0;
        }
    }

    /// Try the next MX server for a message.
    ///
    /// Returns `true` if there is another server to try, `false` if all exhausted.
    pub fn try_next_server(&self, message_id: &SpooledMessageId) -> bool {
        self.queue
            .get_mut(message_id)
            .is_some_and(|mut info| info.try_next_server())
    }

    /// Remove a message from the queue
    pub fn remove(&self, message_id: &SpooledMessageId) -> Option<DeliveryInfo> {
        self.queue.remove(message_id).map(|(_, info)| info)
    }

    /// Set the next retry timestamp for a message
    pub fn set_next_retry_at(&self, message_id: &SpooledMessageId, next_retry_at: SystemTime) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.next_retry_at = Some(next_retry_at);
        }
    }

    /// Reset the server index to 0 for a message (for new retry cycle)
    pub fn reset_server_index(&self, message_id: &SpooledMessageId) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.reset_server_index();
        }
    }

    /// Get all pending messages
    #[must_use]
    pub fn pending_messages(&self) -> Vec<DeliveryInfo> {
        self.queue
            .iter()
            .filter(|entry| entry.status == DeliveryStatus::Pending)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Get all messages with their current status
    #[must_use]
    pub fn all_messages(&self) -> Vec<DeliveryInfo> {
        self.queue.iter().map(|entry| entry.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_id() -> SpooledMessageId {
        SpooledMessageId::new(ulid::Ulid::new())
    }

    #[test]
    fn enqueue_and_get_roundtrip() {
        let queue = DeliveryQueue::new();
        let id = msg_id();
        queue.enqueue(id.clone(), "example.com");

        let info = queue.get(&id).expect("message should be queued");
        assert_eq!(info.status, DeliveryStatus::Pending);
        assert_eq!(info.recipient_domain.as_str(), "example.com");
    }

    #[test]
    fn update_status_mutates_in_place() {
        let queue = DeliveryQueue::new();
        let id = msg_id();
        queue.enqueue(id.clone(), "example.com");

        queue.update_status(&id, DeliveryStatus::Completed);
        assert_eq!(queue.get(&id).unwrap().status, DeliveryStatus::Completed);
    }

    #[test]
    fn remove_returns_and_clears_entry() {
        let queue = DeliveryQueue::new();
        let id = msg_id();
        queue.enqueue(id.clone(), "example.com");

        assert!(queue.remove(&id).is_some());
        assert!(queue.get(&id).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn pending_messages_filters_by_status() {
        let queue = DeliveryQueue::new();
        let pending = msg_id();
        let completed = msg_id();
        queue.enqueue(pending.clone(), "example.com");
        queue.enqueue(completed.clone(), "example.com");
        queue.update_status(&completed, DeliveryStatus::Completed);

        let pending_msgs = queue.pending_messages();
        assert_eq!(pending_msgs.len(), 1);
        assert_eq!(pending_msgs[0].message_id, pending);
    }
}
