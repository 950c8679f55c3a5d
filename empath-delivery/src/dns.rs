//! DNS resolution for mail delivery.
//!
//! Implements MX record lookups with A/AAAA fallback per RFC 5321 section 5.1.
//! Includes LRU caching honouring the resolved record's own TTL (clamped to a
//! configured `[min, max]` range), or a fixed override when configured.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use hickory_resolver::{
    TokioAsyncResolver,
    config::{ResolverConfig, ResolverOpts},
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// No MX, A, or AAAA records found for the domain.
    #[error("No mail servers found for domain: {0}")]
    NoMailServers(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::error::ResolveError),

    /// Domain does not exist (NXDOMAIN).
    #[error("Domain does not exist: {0}")]
    DomainNotFound(String),

    /// DNS query timed out.
    #[error("DNS query timed out for domain: {0}")]
    Timeout(String),
}

impl DnsError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::LookupFailed(_))
    }
}

/// Configuration for DNS resolver.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fixed cache TTL override in seconds.
    ///
    /// When set, every cache entry lives for exactly this long regardless of
    /// the resolved record's own TTL. When unset (the default), the record's
    /// TTL is honoured, clamped to `[min_cache_ttl_secs, max_cache_ttl_secs]`.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Lower bound applied to the record TTL when no override is set (default: 30)
    #[serde(default = "default_min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    /// Upper bound applied to the record TTL when no override is set (default: 3600)
    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,

    /// Maximum cache size (default: 1000)
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_min_cache_ttl_secs() -> u64 {
    30
}

const fn default_max_cache_ttl_secs() -> u64 {
    3600
}

const fn default_cache_size() -> usize {
    1000
}

/// Default cache size as a `NonZeroUsize` for efficient fallback.
const DEFAULT_CACHE_SIZE_NONZERO: NonZeroUsize = NonZeroUsize::new(default_cache_size()).unwrap();

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: None,
            min_cache_ttl_secs: default_min_cache_ttl_secs(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
            cache_size: default_cache_size(),
        }
    }
}

/// Represents a mail server target with its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailServer {
    /// The hostname or IP address of the mail server.
    pub host: String,
    /// MX priority (lower value = higher priority). 0 for A/AAAA fallback.
    pub priority: u16,
    /// Port number (default: 25).
    pub port: u16,
}

/// Cached DNS result with expiration time.
#[derive(Debug, Clone)]
struct CachedResult {
    /// The resolved mail servers (Arc for cheap cloning on cache hits)
    servers: Arc<Vec<MailServer>>,
    /// When this cache entry expires
    expires_at: Instant,
}

impl MailServer {
    /// Creates a new mail server entry.
    #[must_use]
    pub const fn new(host: String, priority: u16, port: u16) -> Self {
        Self {
            host,
            priority,
            port,
        }
    }

    /// Returns the full address as `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolves recipient-domain mail exchangers.
///
/// Abstracted behind a trait so the delivery pipeline can be driven by
/// `MockDnsResolver` in tests instead of hitting live DNS.
#[async_trait]
pub trait DnsResolver: Send + Sync + std::fmt::Debug {
    /// Resolves mail servers for `domain`, sorted by ascending priority.
    ///
    /// # Errors
    /// Returns `DnsError` if the domain does not resolve to any MX, A, or
    /// AAAA records, or if the underlying lookup fails.
    async fn resolve_mail_servers(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError>;

    /// Validates that a domain exists by attempting any DNS lookup.
    ///
    /// # Errors
    /// Returns `DnsError::DomainNotFound` if the domain does not exist.
    async fn validate_domain(&self, domain: &str) -> Result<(), DnsError>;
}

/// `hickory-resolver`-backed DNS resolver for mail delivery, with LRU + TTL caching.
#[derive(Debug)]
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
    cache: Arc<Mutex<LruCache<String, CachedResult>>>,
    config: DnsConfig,
}

impl HickoryDnsResolver {
    /// Creates a new DNS resolver with default configuration.
    ///
    /// # Errors
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new() -> Result<Self, DnsError> {
        Self::with_dns_config(DnsConfig::default())
    }

    /// Creates a new DNS resolver with custom DNS configuration.
    ///
    /// # Errors
    /// Returns an error if the resolver cannot be initialized.
    pub fn with_dns_config(dns_config: DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(dns_config.timeout_secs);

        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        let cache_size =
            NonZeroUsize::new(dns_config.cache_size).unwrap_or(DEFAULT_CACHE_SIZE_NONZERO);
        let cache = Arc::new(Mutex::new(LruCache::new(cache_size)));

        Ok(Self {
            resolver,
            cache,
            config: dns_config,
        })
    }

    /// Creates a new DNS resolver with custom resolver configuration.
    ///
    /// # Errors
    /// Returns an error if the resolver cannot be initialized.
    pub fn with_resolver_config(
        resolver_config: ResolverConfig,
        opts: ResolverOpts,
        dns_config: DnsConfig,
    ) -> Result<Self, DnsError> {
        let resolver = TokioAsyncResolver::tokio(resolver_config, opts);

        let cache_size =
            NonZeroUsize::new(dns_config.cache_size).unwrap_or(DEFAULT_CACHE_SIZE_NONZERO);
        let cache = Arc::new(Mutex::new(LruCache::new(cache_size)));

        Ok(Self {
            resolver,
            cache,
            config: dns_config,
        })
    }

    /// Clamps a record TTL (seconds) into the configured cache bounds, or
    /// returns the fixed override if one is configured.
    fn effective_ttl(&self, record_ttl_secs: u64) -> u64 {
        self.config.cache_ttl_secs.unwrap_or_else(|| {
            record_ttl_secs.clamp(self.config.min_cache_ttl_secs, self.config.max_cache_ttl_secs)
        })
    }

    /// Performs uncached DNS lookup for mail servers, returning the servers
    /// plus the minimum TTL (seconds) observed across the answer set.
    async fn resolve_mail_servers_uncached(
        &self,
        domain: &str,
    ) -> Result<(Vec<MailServer>, u64), DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(mx_lookup) => {
                let min_ttl = mx_lookup
                    .as_lookup()
                    .record_iter()
                    .map(hickory_resolver::proto::rr::Record::ttl)
                    .min()
                    .unwrap_or(self.config.min_cache_ttl_secs as u32)
                    .into();

                let mut servers: Vec<MailServer> = mx_lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        let priority = mx.preference();
                        debug!("Found MX record: {host} (priority: {priority})");
                        MailServer::new(host, priority, 25)
                    })
                    .collect();

                if servers.is_empty() {
                    debug!("MX lookup returned no records, falling back to A/AAAA");
                    return self.fallback_to_a_aaaa(domain).await;
                }

                servers.sort_by_key(|s| s.priority);
                debug!("Resolved {} MX record(s) for {domain}", servers.len());
                Ok((servers, min_ttl))
            }
            Err(err) => {
                if matches!(
                    err.kind(),
                    hickory_resolver::error::ResolveErrorKind::NoRecordsFound { .. }
                ) {
                    debug!("No MX records found for {domain}, falling back to A/AAAA");
                    self.fallback_to_a_aaaa(domain).await
                } else {
                    warn!("MX lookup failed for {domain}: {err}");
                    Err(DnsError::LookupFailed(err))
                }
            }
        }
    }

    /// Falls back to A/AAAA records when no MX records exist (RFC 5321).
    async fn fallback_to_a_aaaa(&self, domain: &str) -> Result<(Vec<MailServer>, u64), DnsError> {
        debug!("Attempting A/AAAA fallback for {domain}");

        match self.resolver.lookup_ip(domain).await {
            Ok(ip_lookup) => {
                let min_ttl = ip_lookup
                    .as_lookup()
                    .record_iter()
                    .map(hickory_resolver::proto::rr::Record::ttl)
                    .min()
                    .unwrap_or(self.config.min_cache_ttl_secs as u32)
                    .into();

                let servers: Vec<MailServer> = ip_lookup
                    .iter()
                    .map(|ip| {
                        let host = ip.to_string();
                        debug!("Found {}: {host}", if ip.is_ipv6() { "AAAA" } else { "A" });
                        MailServer::new(host, 0, 25)
                    })
                    .collect();

                if servers.is_empty() {
                    Err(DnsError::NoMailServers(domain.to_string()))
                } else {
                    debug!("Resolved {} A/AAAA record(s) for {domain}", servers.len());
                    Ok((servers, min_ttl))
                }
            }
            Err(err) => {
                warn!("A/AAAA lookup failed for {domain}: {err}");
                if matches!(
                    err.kind(),
                    hickory_resolver::error::ResolveErrorKind::NoRecordsFound { .. }
                ) {
                    Err(DnsError::NoMailServers(domain.to_string()))
                } else {
                    Err(DnsError::LookupFailed(err))
                }
            }
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve_mail_servers(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        debug!("Resolving mail servers for domain: {domain}");

        {
            let mut cache = self.cache.lock().await;
            if let Some(cached) = cache.get(domain) {
                if cached.expires_at > Instant::now() {
                    debug!("Cache hit for {domain}, {} server(s)", cached.servers.len());
                    return Ok(Arc::clone(&cached.servers));
                }
                debug!("Cache entry expired for {domain}");
            }
        }

        let (resolved, record_ttl) = self.resolve_mail_servers_uncached(domain).await?;
        let servers = Arc::new(resolved);

        let ttl = self.effective_ttl(record_ttl);
        let expires_at = Instant::now() + Duration::from_secs(ttl);
        let cached_result = CachedResult {
            servers: servers.clone(),
            expires_at,
        };

        {
            let mut cache = self.cache.lock().await;
            cache.put(domain.to_string(), cached_result);
        }

        debug!("Cached result for {domain}, expires in {ttl}s");
        Ok(servers)
    }

    async fn validate_domain(&self, domain: &str) -> Result<(), DnsError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(_) => Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    hickory_resolver::error::ResolveErrorKind::NoRecordsFound { .. }
                ) =>
            {
                Err(DnsError::DomainNotFound(domain.to_string()))
            }
            Err(err) => Err(DnsError::LookupFailed(err)),
        }
    }
}

impl Default for HickoryDnsResolver {
    fn default() -> Self {
        Self::new().expect("Failed to create default DNS resolver")
    }
}

/// In-memory DNS resolver for tests: responses are registered ahead of time
/// and returned without touching the network.
#[derive(Debug, Default)]
pub struct MockDnsResolver {
    servers: StdMutex<HashMap<String, Arc<Vec<MailServer>>>>,
    missing: StdMutex<std::collections::HashSet<String>>,
}

impl MockDnsResolver {
    /// Creates an empty mock resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers mail servers to return for `domain`.
    pub fn set_servers(&self, domain: &str, servers: Vec<MailServer>) {
        self.servers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(domain.to_string(), Arc::new(servers));
    }

    /// Marks `domain` as having no resolvable mail servers.
    pub fn set_missing(&self, domain: &str) {
        self.missing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(domain.to_string());
    }
}

#[async_trait]
impl DnsResolver for MockDnsResolver {
    async fn resolve_mail_servers(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        if self
            .missing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(domain)
        {
            return Err(DnsError::NoMailServers(domain.to_string()));
        }

        self.servers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(domain)
            .cloned()
            .ok_or_else(|| DnsError::NoMailServers(domain.to_string()))
    }

    async fn validate_domain(&self, domain: &str) -> Result<(), DnsError> {
        if self
            .missing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(domain)
        {
            return Err(DnsError::DomainNotFound(domain.to_string()));
        }
        Ok(())
    }
}
