//! Top-level spool controller, wired into [`empath::controller::Empath`]
//!
//! `Controller` is the `Deserialize`-able handle config files refer to as
//! `spool: File(...)` or `spool: Memory(...)`. Once [`Controller::init`] has
//! run, it implements [`BackingStore`] itself (by delegating to whichever
//! concrete store the config selected), so it can be handed around as
//! `Arc<dyn BackingStore>` without callers caring which backend is live.

use std::sync::Arc;

use async_trait::async_trait;
use empath_common::context::Context;
use serde::Deserialize;

use crate::{
    config::{SpoolConfig, SpoolType},
    r#trait::BackingStore,
    types::SpooledMessageId,
};

/// Owns the configured spool backend and its lifecycle.
#[derive(Debug, Deserialize)]
pub struct Controller {
    #[serde(flatten)]
    config: SpoolConfig,
    #[serde(skip)]
    spool: Option<SpoolType>,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            config: SpoolConfig::default(),
            spool: None,
        }
    }
}

impl Controller {
    /// Initialize the configured backend (creating the spool directory for
    /// file-backed spools).
    ///
    /// # Errors
    /// Returns an error if the backend fails to initialize.
    pub fn init(&mut self) -> crate::Result<()> {
        self.spool = Some(self.config.clone().into_spool()?);
        Ok(())
    }

    fn spool(&self) -> &SpoolType {
        self.spool
            .as_ref()
            .expect("Controller::init must be called before use")
    }

    /// Serve the spool until a shutdown signal is received.
    ///
    /// # Errors
    /// Returns an error if the underlying backend's serve loop fails.
    pub async fn serve(
        &self,
        shutdown: tokio::sync::broadcast::Receiver<empath_common::Signal>,
    ) -> anyhow::Result<()> {
        self.spool().serve(shutdown).await.map_err(Into::into)
    }
}

#[async_trait]
impl BackingStore for Controller {
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId> {
        self.spool().backing_store().write(context).await
    }

    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>> {
        self.spool().backing_store().list().await
    }

    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context> {
        self.spool().backing_store().read(id).await
    }

    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()> {
        self.spool().backing_store().update(id, context).await
    }

    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()> {
        self.spool().backing_store().delete(id).await
    }
}

/// The file-based backing store, re-exported here so downstream crates that
/// configure a spool don't need to reach into `crate::backends`.
pub use crate::backends::file::{FileBackingStore, FileBackingStoreBuilder};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_controller_roundtrips_a_message() {
        let mut controller: Controller =
            ron::from_str("(type: \"Memory\")").expect("valid memory config");
        controller.init().unwrap();

        let mut ctx = empath_common::context::Context::default();
        let id = controller.write(&mut ctx).await.unwrap();

        let read_back = controller.read(&id).await.unwrap();
        assert_eq!(read_back.tracking_id, Some(id.to_string()));
    }
}
