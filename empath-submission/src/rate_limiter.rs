//! Multi-axis sliding-window admission limiter for the submission path.
//!
//! Distinct from `empath_delivery::RateLimiter`, which paces *outbound*
//! delivery per recipient domain with a token bucket. This limiter instead
//! gates *admission* at submission time across several independent axes --
//! global, sender domain, sender mailbox, client IP, API key, and recipient
//! domain -- each with its own optional hourly/daily ceiling.
//!
//! Counters live entirely in memory: a sliding window of admission
//! timestamps per axis key, trimmed lazily on each check. History resets on
//! restart, which is an accepted tradeoff -- the window re-establishes
//! itself within 24h of traffic.

use std::time::{Duration, Instant};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// One admission axis a submission is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Applies to every submission, regardless of origin.
    Global,
    /// Keyed by the sender's domain.
    Domain(String),
    /// Keyed by the full sender mailbox.
    Sender(String),
    /// Keyed by the submitting client's IP address.
    Ip(String),
    /// Keyed by a SHA-256 hash of the HTTP API key used, if any.
    ApiKey(String),
    /// Keyed by a recipient's domain (checked once per distinct recipient domain).
    RecipientDomain(String),
}

impl Axis {
    fn label(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Domain(d) => format!("domain:{d}"),
            Self::Sender(s) => format!("sender:{s}"),
            Self::Ip(ip) => format!("ip:{ip}"),
            Self::ApiKey(k) => format!("apikey:{k}"),
            Self::RecipientDomain(d) => format!("rdomain:{d}"),
        }
    }
}

/// Configured ceiling for a single axis. `None` on either field means that
/// horizon is unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AxisLimit {
    /// Maximum admissions in any trailing 60-minute window.
    #[serde(default)]
    pub per_hour: Option<u32>,
    /// Maximum admissions in any trailing 24-hour window.
    #[serde(default)]
    pub per_day: Option<u32>,
}

impl AxisLimit {
    /// An axis with no configured ceiling; every admission passes.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            per_hour: None,
            per_day: None,
        }
    }

    const fn is_unlimited(self) -> bool {
        self.per_hour.is_none() && self.per_day.is_none()
    }
}

/// Static configuration for the submission-time rate limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionRateLimitConfig {
    /// Ceiling applied to every submission regardless of origin.
    #[serde(default)]
    pub global: AxisLimit,
    /// Default ceiling applied per sender domain (`domain:<sender-domain>`).
    #[serde(default)]
    pub per_domain: AxisLimit,
    /// Default ceiling applied per sender mailbox (`sender:<mailbox>`).
    #[serde(default)]
    pub per_sender: AxisLimit,
    /// Default ceiling applied per client IP (`ip:<remote-ip>`).
    #[serde(default)]
    pub per_ip: AxisLimit,
    /// Default ceiling applied per API key (`apikey:<sha>`).
    #[serde(default)]
    pub per_apikey: AxisLimit,
    /// Default ceiling applied per recipient domain (`rdomain:<recipient-domain>`).
    #[serde(default)]
    pub per_recipient_domain: AxisLimit,
}

struct Window {
    /// Admission timestamps within the last 24h, oldest first.
    timestamps: Vec<Instant>,
}

impl Window {
    fn trim(&mut self, now: Instant) {
        self.timestamps.retain(|&t| now.duration_since(t) < DAY);
    }

    fn count_within(&self, now: Instant, horizon: Duration) -> u32 {
        self.timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.duration_since(t) < horizon)
            .count() as u32
    }
}

/// Result of checking (and admitting) a submission across every applicable axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted;

/// An axis that exceeded its limit, along with how long to wait before retrying.
#[derive(Debug, Clone)]
pub struct Exceeded {
    /// Human-readable axis label, e.g. `"sender:a@example.com"`.
    pub axis: String,
    /// How long until the axis would admit another submission.
    pub retry_after: Duration,
}

/// Sliding-window, multi-axis submission admission limiter.
///
/// `check_and_admit` is the only entry point: it evaluates every axis
/// without mutating state, and only increments counters if every axis
/// passes. This matches the spec's admission protocol -- a rejected
/// submission must leave no trace in any axis's counters.
pub struct SubmissionRateLimiter {
    config: SubmissionRateLimitConfig,
    state: parking_lot::Mutex<AHashMap<String, Window>>,
}

impl SubmissionRateLimiter {
    /// Build a limiter from static configuration.
    #[must_use]
    pub fn new(config: SubmissionRateLimitConfig) -> Self {
        Self {
            config,
            state: parking_lot::Mutex::new(AHashMap::new()),
        }
    }

    fn limit_for(&self, axis: &Axis) -> AxisLimit {
        match axis {
            Axis::Global => self.config.global,
            Axis::Domain(_) => self.config.per_domain,
            Axis::Sender(_) => self.config.per_sender,
            Axis::Ip(_) => self.config.per_ip,
            Axis::ApiKey(_) => self.config.per_apikey,
            Axis::RecipientDomain(_) => self.config.per_recipient_domain,
        }
    }

    /// Check every axis in `axes` and, if all pass, atomically admit the
    /// submission by incrementing every axis's counter.
    ///
    /// On rejection, nothing is incremented. If multiple axes are exceeded
    /// simultaneously, the one with the longest `retry_after` is reported,
    /// per the tie-break rule in the spec.
    ///
    /// # Errors
    /// Returns [`Exceeded`] naming the axis with the longest wait.
    pub fn check_and_admit(&self, axes: &[Axis]) -> Result<Admitted, Exceeded> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let mut worst: Option<Exceeded> = None;

        for axis in axes {
            let limit = self.limit_for(axis);
            if limit.is_unlimited() {
                continue;
            }

            let key = axis.label();
            let window = state.entry(key.clone()).or_insert_with(|| Window {
                timestamps: Vec::new(),
            });
            window.trim(now);

            if let Some(retry_after) = exceeds(window, now, limit) {
                let worse = worst
                    .as_ref()
                    .is_none_or(|w| retry_after > w.retry_after);
                if worse {
                    worst = Some(Exceeded {
                        axis: key,
                        retry_after,
                    });
                }
            }
        }

        if let Some(exceeded) = worst {
            tracing::debug!(axis = %exceeded.axis, retry_after = ?exceeded.retry_after, "submission rate limited");
            return Err(exceeded);
        }

        for axis in axes {
            let limit = self.limit_for(axis);
            if limit.is_unlimited() {
                continue;
            }
            state
                .entry(axis.label())
                .or_insert_with(|| Window {
                    timestamps: Vec::new(),
                })
                .timestamps
                .push(now);
        }

        Ok(Admitted)
    }
}

/// Returns the wait time until `window` would admit another submission
/// under `limit`, or `None` if it currently would.
fn exceeds(window: &Window, now: Instant, limit: AxisLimit) -> Option<Duration> {
    if let Some(per_hour) = limit.per_hour
        && window.count_within(now, HOUR) >= per_hour
    {
        return Some(retry_after_for(window, now, HOUR, per_hour));
    }

    if let Some(per_day) = limit.per_day
        && window.count_within(now, DAY) >= per_day
    {
        return Some(retry_after_for(window, now, DAY, per_day));
    }

    None
}

/// How long until the oldest admission inside `horizon` ages out, freeing a slot.
fn retry_after_for(window: &Window, now: Instant, horizon: Duration, limit: u32) -> Duration {
    let within: Vec<&Instant> = window
        .timestamps
        .iter()
        .rev()
        .take_while(|&&t| now.duration_since(t) < horizon)
        .collect();

    let Some(&&oldest_to_expire) = within.get(limit.saturating_sub(1) as usize).or(within.last())
    else {
        return Duration::ZERO;
    };

    horizon.saturating_sub(now.duration_since(oldest_to_expire))
}
