//! Message spool: durable storage for messages in flight
//!
//! A message is written to the spool the moment it's accepted (over SMTP or
//! the HTTP submission API) and stays there until delivery succeeds,
//! permanently fails, or it's moved to the dead-letter namespace. This crate
//! owns that storage: the [`BackingStore`] trait abstracts over where the
//! bytes actually live, with [`FileBackingStore`] (production) and
//! [`MemoryBackingStore`]/[`TestBackingStore`] (tests) as the concrete
//! implementations, and [`Controller`] as the `Deserialize`-able handle
//! config files select a backend through.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod backends;
pub mod config;
pub mod controller;
pub mod error;
pub mod spool;
#[path = "trait.rs"]
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, FileBackingStoreBuilder, MemoryBackingStore, TestBackingStore};
pub use config::{MemoryConfig, SpoolConfig, SpoolType};
pub use controller::Controller;
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use r#trait::BackingStore;
pub use spool::{FileSpool, MemorySpool, Spool};
pub use types::SpooledMessageId;
