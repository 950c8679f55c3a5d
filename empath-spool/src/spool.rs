//! Generic spool wrapper around a [`BackingStore`]
//!
//! `Spool<S>` adds lifecycle (`init`/`serve`) around a bare backing store so
//! callers that need directory setup (the file backend) and callers that
//! don't (the memory backend) share the same shape.

use crate::{backends::MemoryBackingStore, backends::file::FileBackingStore, r#trait::BackingStore};

/// A backing store plus its lifecycle hooks
#[derive(Debug, Clone)]
pub struct Spool<S: BackingStore> {
    store: S,
}

impl<S: BackingStore> Spool<S> {
    /// Wrap a backing store
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying backing store
    pub const fn store(&self) -> &S {
        &self.store
    }
}

impl Spool<FileBackingStore> {
    /// Ensure the spool directory exists and is writable
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or is not a directory.
    pub fn init(&mut self) -> crate::Result<()> {
        self.store.ensure_directory()
    }

    /// Run until a shutdown signal is received.
    ///
    /// The file backend has no background work of its own (every operation
    /// is self-contained), so this simply waits for shutdown.
    ///
    /// # Errors
    /// Returns an error only if the shutdown channel itself errors.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<empath_common::Signal>,
    ) -> crate::Result<()> {
        let _ = shutdown.recv().await;
        Ok(())
    }
}

impl Spool<MemoryBackingStore> {
    /// No-op: the in-memory store needs no directory setup.
    pub const fn init(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Run until a shutdown signal is received.
    ///
    /// # Errors
    /// Returns an error only if the shutdown channel itself errors.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<empath_common::Signal>,
    ) -> crate::Result<()> {
        let _ = shutdown.recv().await;
        Ok(())
    }
}

/// A production, file-backed spool
pub type FileSpool = Spool<FileBackingStore>;

/// An in-memory spool, used in tests and for transient message handling
pub type MemorySpool = Spool<MemoryBackingStore>;
