//! The storage abstraction every spool backend implements.

use async_trait::async_trait;
use empath_common::context::Context;

use crate::types::SpooledMessageId;

/// A durable store for spooled message [`Context`]s.
///
/// Implementors own the physical representation (files on disk, an in-memory
/// map, ...); callers only ever see [`SpooledMessageId`]s and [`Context`]s.
/// All operations must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persist a new context, assigning it a fresh [`SpooledMessageId`].
    ///
    /// The generated ID is written back into `context.tracking_id` before
    /// the context is stored, so the returned ID and the persisted copy
    /// always agree.
    ///
    /// # Errors
    /// Returns an error if the store is at capacity or the write fails.
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId>;

    /// List every message currently held by the store.
    ///
    /// Implementations should return IDs in ascending (oldest-first) order,
    /// since `SpooledMessageId`s are ULIDs and therefore sort by creation time.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be enumerated.
    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>>;

    /// Read a previously-written context back out.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no message has this ID.
    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context>;

    /// Overwrite the context stored under `id` in place.
    ///
    /// Used to persist delivery state (status, attempt count, retry timing)
    /// as a message moves through the delivery queue.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no message has this ID.
    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()>;

    /// Remove a message from the store entirely.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no message has this ID.
    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()>;
}
