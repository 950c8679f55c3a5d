//! Sandbox capture for non-production domain modes.
//!
//! Messages submitted under `sandbox`, `redirect`, or `bcc` mode are
//! snapshotted here before (or instead of) reaching the delivery queue.
//! Sandbox entries are never delivered -- this is purely a record for
//! operators/tests to inspect what *would* have gone out.
//!
//! Reuses the same file-per-message spool layout as the primary queue and
//! the DLQ, just rooted at a different directory, with the sandbox-specific
//! fields (mode, pre-rewrite recipients, simulated error) carried as
//! metadata on the stored [`Context`].

use std::path::PathBuf;

use empath_common::context::Context;
use empath_spool::{BackingStore, FileBackingStore, SpooledMessageId};
use serde::{Deserialize, Serialize};

use crate::domain_mode::Mode;

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/empath/sandbox")
}

/// Sandbox storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Whether sandbox capture is enabled at all.
    ///
    /// When `false`, `sandbox`/`redirect`/`bcc` modes still divert/rewrite
    /// recipients, but no snapshot is written (the capture is a no-op).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory sandbox entries are stored under.
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

const fn default_enabled() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_path(),
        }
    }
}

impl SandboxConfig {
    /// Build the backing store for this configuration, if enabled.
    #[must_use]
    pub fn build_store(&self) -> Option<FileBackingStore> {
        if !self.enabled {
            return None;
        }

        Some(FileBackingStore::builder().path(self.path.clone()).build())
    }
}

const META_MODE: &str = "sandbox_mode";
const META_ORIGINAL_TO: &str = "sandbox_original_to";
const META_SIMULATED_ERR: &str = "sandbox_simulated_err";

/// Metadata describing why/how a message landed in the sandbox.
#[derive(Debug, Clone)]
pub struct SandboxMeta<'a> {
    /// Which non-production mode captured this message.
    pub mode: Mode,
    /// Recipients as submitted, before any redirect rewrite.
    pub original_to: &'a [String],
    /// Synthetic error the domain mode is configured to simulate, if any.
    pub simulated_err: Option<&'a str>,
}

/// Capture a message into the sandbox store.
///
/// Stamps sandbox metadata onto the context and writes it, leaving the
/// caller's copy of `context` untouched by further enqueue logic (the
/// caller decides separately whether to also enqueue to the live queue, as
/// `redirect` and `bcc` modes do).
///
/// # Errors
/// Returns an error if the sandbox store rejects the write.
pub async fn capture(
    sandbox: &dyn BackingStore,
    meta: SandboxMeta<'_>,
    mut context: Context,
) -> empath_spool::Result<SpooledMessageId> {
    context
        .metadata
        .insert(META_MODE.to_string(), mode_label(meta.mode).to_string());
    context
        .metadata
        .insert(META_ORIGINAL_TO.to_string(), meta.original_to.join(","));
    if let Some(err) = meta.simulated_err {
        context
            .metadata
            .insert(META_SIMULATED_ERR.to_string(), err.to_string());
    }

    sandbox.write(&mut context).await
}

const fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Production => "production",
        Mode::Sandbox => "sandbox",
        Mode::Redirect => "redirect",
        Mode::Bcc => "bcc",
    }
}
