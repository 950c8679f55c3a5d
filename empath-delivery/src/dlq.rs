//! Dead-letter storage for permanently failed deliveries.
//!
//! Messages that exhaust their retry budget (or hit a permanent SMTP
//! rejection) are moved here instead of lingering in the main spool forever.
//! Reuses the same file-per-message layout as the primary spool, just rooted
//! at a different directory, so the retention janitor can walk it the same
//! way `scan_spool_internal` walks the live queue.

use std::path::PathBuf;

use empath_spool::{BackingStore, FileBackingStore};
use serde::{Deserialize, Serialize};

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/empath/dlq")
}

const fn default_max_age_secs() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

/// Dead-letter queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Whether terminal failures are moved to the DLQ at all.
    ///
    /// When `false`, a message that exhausts its retries is simply marked
    /// `Failed` in place and left for an operator to inspect or purge.
    #[serde(default)]
    pub enabled: bool,

    /// Directory DLQ entries are stored under.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// How long a DLQ entry is kept before the retention janitor deletes it.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Maximum number of entries the DLQ may hold. When set and exceeded,
    /// the retention janitor evicts the oldest entries (by `failed_at`)
    /// until the count is back within bound. `None` means unbounded.
    #[serde(default)]
    pub max_count: Option<usize>,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_path(),
            max_age_secs: default_max_age_secs(),
            max_count: None,
        }
    }
}

impl DlqConfig {
    /// Build the backing store for this configuration, if enabled.
    #[must_use]
    pub fn build_store(&self) -> Option<FileBackingStore> {
        if !self.enabled {
            return None;
        }

        Some(FileBackingStore::builder().path(self.path.clone()).build())
    }
}

/// Move a context into the dead-letter store and remove it from the primary spool.
///
/// # Errors
/// Returns an error if the dead-letter store cannot accept the message. The
/// caller is expected to leave the message in the primary spool on failure
/// rather than lose it.
pub async fn move_to_dlq(
    dlq: &dyn BackingStore,
    primary: &dyn BackingStore,
    id: &empath_spool::SpooledMessageId,
    mut context: empath_common::context::Context,
    failed_at: u64,
) -> empath_spool::Result<()> {
    context
        .metadata
        .insert("dlq_failed_at".to_string(), failed_at.to_string());

    dlq.write(&mut context).await?;
    primary.delete(id).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use ahash::AHashMap;
    use empath_common::{context::Context, envelope::Envelope};
    use empath_spool::MemoryBackingStore;

    use super::*;

    fn test_context() -> Context {
        Context {
            envelope: Envelope::default(),
            data: Some(std::sync::Arc::from(b"hello".as_slice())),
            id: "test.example.com".to_string(),
            extended: false,
            metadata: AHashMap::new(),
            ..Default::default()
        }
    }

    #[test]
    fn disabled_config_builds_no_store() {
        let config = DlqConfig::default();
        assert!(config.build_store().is_none());
    }

    #[test]
    fn enabled_config_builds_a_store() {
        let config = DlqConfig {
            enabled: true,
            ..DlqConfig::default()
        };
        assert!(config.build_store().is_some());
    }

    #[tokio::test]
    async fn move_to_dlq_deletes_from_primary_and_writes_to_dlq() {
        let primary = MemoryBackingStore::default();
        let dlq = MemoryBackingStore::default();

        let mut ctx = test_context();
        let id = primary.write(&mut ctx).await.unwrap();

        move_to_dlq(&dlq, &primary, &id, ctx, 1_700_000_000)
            .await
            .unwrap();

        assert!(primary.read(&id).await.is_err());
        assert_eq!(dlq.list().await.unwrap().len(), 1);
    }
}
