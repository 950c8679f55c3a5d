//! Per-domain delivery configuration
//!
//! Allows customizing delivery behavior for specific recipient domains:
//! - MX server override for testing
//! - TLS requirements for compliance
//! - Connection limits for performance tuning
//! - Rate limiting to avoid blacklisting

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dkim::DkimConfig;

/// Configuration for a specific domain
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainConfig {
    /// Override MX server lookup with a specific host:port
    ///
    /// Use for testing to route messages to a local SMTP server:
    /// ```ron
    /// domains: {
    ///     "test.example.com": (
    ///         mx_override: "localhost:1025",
    ///     ),
    /// }
    /// ```
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mx_override: Option<String>,

    /// Require TLS for delivery to this domain
    ///
    /// Delivery will fail if TLS cannot be negotiated.
    #[serde(default)]
    pub require_tls: bool,

    /// Maximum concurrent connections to this domain
    ///
    /// Prevents overwhelming recipient servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Rate limit (messages per minute) for this domain
    ///
    /// Prevents being flagged as spam or hitting recipient quotas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Accept invalid TLS certificates when delivering to this domain
    ///
    /// Overrides the processor-wide `accept_invalid_certs` setting for this
    /// domain only. `None` defers to the global setting.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub accept_invalid_certs: Option<bool>,

    /// DKIM signing configuration for mail sent from this domain
    ///
    /// `domains` here is keyed by the *sender's* domain, not the recipient's,
    /// since that's whose key the signature is made with.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dkim: Option<DkimConfig>,
}

impl DomainConfig {
    /// Check if this domain has an MX override configured
    #[must_use]
    pub const fn has_mx_override(&self) -> bool {
        self.mx_override.is_some()
    }

    /// Get the MX override server address if configured
    #[must_use]
    pub fn mx_override_address(&self) -> Option<&str> {
        self.mx_override.as_deref()
    }
}

/// Registry of per-domain configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DomainConfigRegistry {
    domains: HashMap<String, DomainConfig>,
}

impl DomainConfigRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: HashMap::new(),
        }
    }

    /// Get configuration for a specific domain
    ///
    /// Returns `None` if no configuration exists, in which case default behavior applies.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&DomainConfig> {
        self.domains.get(domain)
    }

    /// Add or update configuration for a domain
    pub fn insert(&mut self, domain: String, config: DomainConfig) {
        self.domains.insert(domain, config);
    }

    /// Check if a domain has any custom configuration
    #[must_use]
    pub fn has_config(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    /// Get the number of configured domains
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
