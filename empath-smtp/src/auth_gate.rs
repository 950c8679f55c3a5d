//! Brute-force protection for the `AUTH` command.
//!
//! Tracks authentication failures per client IP in a sliding window and
//! temporarily blocks IPs that exceed the configured failure threshold.
//! This is independent of credential validation itself -- it only decides
//! whether an IP is currently allowed to *attempt* authentication.

use std::{
    net::IpAddr,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::Deserialize;

const fn default_max_failures() -> u32 {
    5
}

const fn default_failure_window_secs() -> u64 {
    60
}

const fn default_block_duration_secs() -> u64 {
    300
}

/// Configuration for the AUTH brute-force gate.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthGateConfig {
    /// Number of failed AUTH attempts within `failure_window_secs` before an
    /// IP is blocked.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Width of the sliding window used to count failures, in seconds.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    /// How long an IP stays blocked once it trips the threshold, in seconds.
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,
}

impl Default for AuthGateConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            failure_window_secs: default_failure_window_secs(),
            block_duration_secs: default_block_duration_secs(),
        }
    }
}

#[derive(Default)]
struct IpState {
    failures: Vec<Instant>,
    blocked_until: Option<Instant>,
}

/// Per-IP sliding-window failure tracker with a `normal -> watched -> blocked
/// -> normal` lifecycle.
///
/// An IP starts `normal`. Each failed AUTH attempt inside the failure window
/// moves it towards `watched`; crossing `max_failures` moves it to `blocked`
/// for `block_duration_secs`. A successful AUTH, or the block expiring,
/// returns the IP to `normal`.
pub struct AuthGate {
    config: AuthGateConfig,
    state: DashMap<IpAddr, IpState>,
}

impl AuthGate {
    #[must_use]
    pub fn new(config: AuthGateConfig) -> Self {
        Self {
            config,
            state: DashMap::new(),
        }
    }

    /// Whether `ip` is currently blocked from attempting AUTH.
    #[must_use]
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.state
            .get(&ip)
            .is_some_and(|entry| entry.blocked_until.is_some_and(|until| Instant::now() < until))
    }

    /// Record a failed AUTH attempt from `ip`, possibly tripping the block.
    pub fn record_failure(&self, ip: IpAddr) {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.failure_window_secs);

        let mut entry = self.state.entry(ip).or_default();
        entry.failures.retain(|&t| now.duration_since(t) < window);
        entry.failures.push(now);

        if entry.failures.len() as u32 >= self.config.max_failures {
            entry.blocked_until = Some(now + Duration::from_secs(self.config.block_duration_secs));
            entry.failures.clear();
        }
    }

    /// Record a successful AUTH from `ip`, clearing its failure history.
    pub fn record_success(&self, ip: IpAddr) {
        self.state.remove(&ip);
    }
}
