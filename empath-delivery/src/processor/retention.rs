//! Retention janitor: prunes aged `Completed` entries from the in-memory
//! queue and aged dead-letter entries from the DLQ store.
//!
//! This is distinct from [`super::cleanup::process_cleanup_queue`], which
//! only retries spool *deletions* that failed right after a successful
//! delivery. This janitor deals with records that are already terminal and
//! just outlived their retention window.

use empath_common::{DeliveryStatus, tracing::{debug, warn}};

use crate::processor::DeliveryProcessor;

const DLQ_FAILED_AT_KEY: &str = "dlq_failed_at";

/// Run one retention sweep. Returns the number of entries removed.
pub async fn run_retention_sweep(processor: &DeliveryProcessor) -> usize {
    let mut removed = 0;

    removed += sweep_completed_queue_entries(processor);
    removed += sweep_dlq_entries(processor).await;
    removed += evict_dlq_overflow(processor).await;

    removed
}

fn sweep_completed_queue_entries(processor: &DeliveryProcessor) -> usize {
    let Some(max_age) = processor.delivered_max_age_secs else {
        return 0;
    };

    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for info in processor.queue.all_messages() {
        if info.status != DeliveryStatus::Completed {
            continue;
        }

        let age_secs = now.duration_since(info.queued_at).unwrap_or_default().as_secs();
        if age_secs >= max_age && processor.queue.remove(&info.message_id).is_some() {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(removed, "Retention janitor pruned completed queue entries");
    }

    removed
}

async fn sweep_dlq_entries(processor: &DeliveryProcessor) -> usize {
    let Some(dlq) = &processor.dlq_store else {
        return 0;
    };

    let now = current_time_secs();
    let mut removed = 0;

    let ids = match dlq.list().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "Failed to list dead-letter queue for retention sweep");
            return 0;
        }
    };

    for id in ids {
        let context = match dlq.read(&id).await {
            Ok(context) => context,
            Err(e) => {
                warn!(message_id = ?id, error = %e, "Failed to read dead-letter entry during retention sweep");
                continue;
            }
        };

        let failed_at = context
            .metadata
            .get(DLQ_FAILED_AT_KEY)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if now.saturating_sub(failed_at) <= processor.dlq.max_age_secs {
            continue;
        }

        if let Err(e) = dlq.delete(&id).await {
            warn!(message_id = ?id, error = %e, "Failed to delete aged dead-letter entry");
        } else {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(removed, "Retention janitor pruned dead-letter entries");
    }

    removed
}

/// Evict the oldest dead-letter entries (by `failed_at`) until the DLQ is
/// back within `dlq.max_count`, if configured.
async fn evict_dlq_overflow(processor: &DeliveryProcessor) -> usize {
    let Some(dlq) = &processor.dlq_store else {
        return 0;
    };
    let Some(max_count) = processor.dlq.max_count else {
        return 0;
    };

    let ids = match dlq.list().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "Failed to list dead-letter queue for overflow eviction");
            return 0;
        }
    };

    if ids.len() <= max_count {
        return 0;
    }

    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let context = match dlq.read(&id).await {
            Ok(context) => context,
            Err(e) => {
                warn!(message_id = ?id, error = %e, "Failed to read dead-letter entry during overflow eviction");
                continue;
            }
        };

        let failed_at = context
            .metadata
            .get(DLQ_FAILED_AT_KEY)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        entries.push((failed_at, id));
    }

    entries.sort_unstable_by_key(|(failed_at, _)| *failed_at);

    let overflow = entries.len().saturating_sub(max_count);
    let mut removed = 0;

    for (_, id) in entries.into_iter().take(overflow) {
        if let Err(e) = dlq.delete(&id).await {
            warn!(message_id = ?id, error = %e, "Failed to delete dead-letter entry during overflow eviction");
        } else {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(removed, max_count, "Retention janitor evicted dead-letter overflow");
    }

    removed
}

fn current_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
