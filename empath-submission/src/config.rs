//! Aggregate configuration wiring the submission path's independent pieces
//! (domain modes, sandbox storage, admission rate limits) into a single
//! [`SubmissionService`].

use std::sync::Arc;

use empath_spool::BackingStore;
use serde::{Deserialize, Serialize};

use crate::{
    domain_mode::DomainModeRegistry,
    rate_limiter::{SubmissionRateLimitConfig, SubmissionRateLimiter},
    sandbox::SandboxConfig,
    service::SubmissionService,
};

/// Top-level `submission:` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Per-sender-domain submission mode overrides.
    #[serde(default)]
    pub domains: DomainModeRegistry,
    /// Sandbox capture storage.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Multi-axis admission rate limits.
    #[serde(default)]
    pub rate_limit: SubmissionRateLimitConfig,
}

impl SubmissionConfig {
    /// Build the shared [`SubmissionService`] this configuration describes,
    /// writing accepted messages to `primary` (the delivery queue's store).
    #[must_use]
    pub fn build(self, primary: Arc<dyn BackingStore>) -> SubmissionService {
        let sandbox = self
            .sandbox
            .build_store()
            .map(|store| Arc::new(store) as Arc<dyn BackingStore>);

        SubmissionService::new(
            primary,
            sandbox,
            Arc::new(self.domains),
            Arc::new(SubmissionRateLimiter::new(self.rate_limit)),
        )
    }
}

#[cfg(test)]
mod tests {
    use empath_spool::MemoryBackingStore;

    use super::*;

    #[test]
    fn default_config_builds_a_service() {
        let config = SubmissionConfig {
            sandbox: SandboxConfig {
                enabled: false,
                ..SandboxConfig::default()
            },
            ..SubmissionConfig::default()
        };
        let _service = config.build(Arc::new(MemoryBackingStore::default()));
    }
}
