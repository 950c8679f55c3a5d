//! File-backed [`BackingStore`], the production spool implementation.
//!
//! Each message is stored as a single bincode-encoded file named after its
//! [`SpooledMessageId`] (a ULID), so directory listings come back already
//! sorted oldest-first. Writes are fsync'd before the call returns, so a
//! successful `write`/`update` is durable across a crash.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use empath_common::context::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{SpoolError, error::SerializationError, r#trait::BackingStore, types::SpooledMessageId};

const FILE_EXTENSION: &str = "bin";

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/empath")
}

const fn default_fsync() -> bool {
    true
}

/// File-based backing store, rooted at a configured directory.
///
/// One file per message, named `<ulid>.bin`. Safe to share across tasks:
/// every operation opens/closes its own file handle, there's no shared
/// mutable state to lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackingStore {
    /// Directory spooled messages are stored under
    #[serde(default = "default_path")]
    path: PathBuf,

    /// Whether to fsync after every write/update (durability vs. throughput)
    #[serde(default = "default_fsync")]
    fsync: bool,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: default_path(),
            fsync: default_fsync(),
        }
    }
}

impl FileBackingStore {
    /// Start building a `FileBackingStore`
    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    /// The directory this store is rooted at
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the spool directory exists and is writable.
    ///
    /// Runs synchronously (plain `std::fs`): this only happens once at
    /// startup, before any runtime I/O is in flight.
    ///
    /// # Errors
    /// Returns [`crate::error::ValidationError`] if the path exists and is
    /// not a directory, or the directory cannot be created.
    pub fn ensure_directory(&self) -> crate::Result<()> {
        if self.path.exists() {
            if !self.path.is_dir() {
                return Err(crate::error::ValidationError::NotDirectory(
                    self.path.display().to_string(),
                )
                .into());
            }
        } else {
            std::fs::create_dir_all(&self.path)?;
        }

        Ok(())
    }

    fn file_path(&self, id: &SpooledMessageId) -> PathBuf {
        self.path.join(format!("{id}.{FILE_EXTENSION}"))
    }

    async fn write_file(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(context, bincode::config::legacy())
            .map_err(SerializationError::Encode)?;

        let path = self.file_path(id);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&bytes).await?;

        if self.fsync {
            file.sync_all().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId> {
        let id = SpooledMessageId::generate();
        context.tracking_id = Some(id.to_string());

        self.write_file(&id, context).await?;

        Ok(id)
    }

    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            if let Some(id) = SpooledMessageId::from_filename(&filename) {
                ids.push(id);
            }
        }

        // ULIDs are lexicographically sortable by creation time
        ids.sort();

        Ok(ids)
    }

    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context> {
        let path = self.file_path(id);

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SpoolError::NotFound(id.clone()),
                _ => SpoolError::Io(e),
            })?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;

        let (context, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
            .map_err(SerializationError::Decode)?;

        Ok(context)
    }

    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()> {
        let path = self.file_path(id);
        if !path.exists() {
            return Err(SpoolError::NotFound(id.clone()));
        }

        self.write_file(id, context).await
    }

    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()> {
        let path = self.file_path(id);

        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SpoolError::NotFound(id.clone()),
            _ => SpoolError::Io(e),
        })
    }
}

/// Builder for [`FileBackingStore`]
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: Option<PathBuf>,
    fsync: Option<bool>,
}

impl FileBackingStoreBuilder {
    /// Set the spool directory
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set whether to fsync after every write
    #[must_use]
    pub const fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = Some(fsync);
        self
    }

    /// Build the store
    #[must_use]
    pub fn build(self) -> FileBackingStore {
        FileBackingStore {
            path: self.path.unwrap_or_else(default_path),
            fsync: self.fsync.unwrap_or(true),
        }
    }
}
