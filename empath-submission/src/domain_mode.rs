//! Per-sender-domain submission policy: production, sandbox, redirect, bcc.
//!
//! Distinct from `empath_delivery::DomainConfig`, which governs how a
//! message is *delivered* once it's enqueued (MX override, TLS, DKIM). This
//! config governs what happens to a message *at submission time*, before it
//! ever reaches the delivery queue.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// How messages from a given sender domain are handled at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Enqueue normally for delivery. The default.
    Production,
    /// Capture to the sandbox namespace; never enqueued, never delivered.
    Sandbox,
    /// Rewrite recipients to `redirect_to` before enqueueing; also snapshot
    /// the original recipients to the sandbox namespace.
    Redirect,
    /// Enqueue unchanged, and additionally enqueue a second copy addressed
    /// to `bcc_to`.
    Bcc,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Production
    }
}

/// Submission policy for a single sender domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainModeConfig {
    /// Submission mode for this domain.
    #[serde(default)]
    pub mode: Mode,

    /// Replacement recipients used when `mode == Redirect`.
    #[serde(default)]
    pub redirect_to: Vec<String>,

    /// Additional recipients for the BCC clone when `mode == Bcc`.
    #[serde(default)]
    pub bcc_to: Vec<String>,

    /// When set, submissions from this domain are rejected at the sandbox
    /// stage with this synthetic error instead of being captured cleanly.
    /// Used to exercise failure handling in non-production environments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_err: Option<String>,
}

/// Registry of per-sender-domain submission policies, keyed by domain name.
///
/// A domain with no entry behaves as `Mode::Production`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainModeRegistry {
    domains: AHashMap<String, DomainModeConfig>,
}

impl DomainModeRegistry {
    /// Create a new empty registry; every domain defaults to production mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a domain's submission policy.
    pub fn insert(&mut self, domain: impl Into<String>, config: DomainModeConfig) {
        self.domains.insert(domain.into(), config);
    }

    /// Resolve the submission policy for `domain`, defaulting to production
    /// mode if the domain has no explicit configuration.
    #[must_use]
    pub fn resolve(&self, domain: &str) -> DomainModeConfig {
        self.domains.get(domain).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_domain_defaults_to_production() {
        let registry = DomainModeRegistry::new();
        assert_eq!(registry.resolve("example.com").mode, Mode::Production);
    }

    #[test]
    fn configured_domain_resolves_its_mode() {
        let mut registry = DomainModeRegistry::new();
        registry.insert(
            "foo.com",
            DomainModeConfig {
                mode: Mode::Sandbox,
                ..Default::default()
            },
        );

        assert_eq!(registry.resolve("foo.com").mode, Mode::Sandbox);
        assert_eq!(registry.resolve("bar.com").mode, Mode::Production);
    }

    #[test]
    fn redirect_config_carries_replacement_recipients() {
        let mut registry = DomainModeRegistry::new();
        registry.insert(
            "foo.com",
            DomainModeConfig {
                mode: Mode::Redirect,
                redirect_to: vec!["catch@local".to_string()],
                ..Default::default()
            },
        );

        let resolved = registry.resolve("foo.com");
        assert_eq!(resolved.mode, Mode::Redirect);
        assert_eq!(resolved.redirect_to, vec!["catch@local".to_string()]);
    }
}
