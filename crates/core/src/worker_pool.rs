//! Worker pool constants, liveness policy, and registration validation.
//!
//! Pure functions used by both the controller and the worker agent.
//! Lives in `core` to maintain zero internal dependency constraint.

use std::time::Duration;

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How often a worker is asked to heartbeat.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Heartbeat silence after which a worker is marked stale and its job freed.
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 90;

/// Heartbeat silence after which a worker record is deleted.
pub const DEFAULT_EVICTION_THRESHOLD_SECS: u64 = 24 * 60 * 60;

/// The sweeper runs this many times per stale threshold.
pub const SWEEPS_PER_STALE_THRESHOLD: u32 = 3;

/// Maximum length of a hostname (RFC 1035 presentation form).
const MAX_HOSTNAME_LEN: usize = 253;

// ---------------------------------------------------------------------------
// Liveness policy
// ---------------------------------------------------------------------------

/// Heartbeat timing shared by the registry, the sweeper, and the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    pub eviction_threshold: Duration,
    pub sweep_interval: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        let stale_threshold = Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS);
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            stale_threshold,
            eviction_threshold: Duration::from_secs(DEFAULT_EVICTION_THRESHOLD_SECS),
            sweep_interval: default_sweep_interval(stale_threshold),
        }
    }
}

impl LivenessPolicy {
    /// Build a policy, checking the thresholds are ordered sensibly.
    ///
    /// `sweep_interval` defaults to a third of the stale threshold.
    ///
    /// Rules:
    /// - heartbeat interval < stale threshold < eviction threshold
    /// - sweep interval is non-zero and below the stale threshold
    pub fn new(
        heartbeat_interval: Duration,
        stale_threshold: Duration,
        eviction_threshold: Duration,
        sweep_interval: Option<Duration>,
    ) -> Result<Self, CoreError> {
        let sweep_interval = sweep_interval.unwrap_or_else(|| default_sweep_interval(stale_threshold));

        if heartbeat_interval.is_zero() {
            return Err(CoreError::Validation(
                "Heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if stale_threshold <= heartbeat_interval {
            return Err(CoreError::Validation(
                "Stale threshold must exceed the heartbeat interval".to_string(),
            ));
        }
        if eviction_threshold <= stale_threshold {
            return Err(CoreError::Validation(
                "Eviction threshold must exceed the stale threshold".to_string(),
            ));
        }
        if sweep_interval.is_zero() || sweep_interval >= stale_threshold {
            return Err(CoreError::Validation(
                "Sweep interval must be non-zero and shorter than the stale threshold".to_string(),
            ));
        }

        Ok(Self {
            heartbeat_interval,
            stale_threshold,
            eviction_threshold,
            sweep_interval,
        })
    }

    /// Heartbeats older than this instant make a worker stale.
    pub fn stale_cutoff(&self, now: Timestamp) -> Timestamp {
        cutoff(now, self.stale_threshold)
    }

    /// Heartbeats older than this instant make a worker evictable.
    pub fn eviction_cutoff(&self, now: Timestamp) -> Timestamp {
        cutoff(now, self.eviction_threshold)
    }
}

/// A third of the stale threshold, never below one second.
pub fn default_sweep_interval(stale_threshold: Duration) -> Duration {
    (stale_threshold / SWEEPS_PER_STALE_THRESHOLD).max(Duration::from_secs(1))
}

/// `now - age`, saturating at the earliest representable instant.
pub fn cutoff(now: Timestamp, age: Duration) -> Timestamp {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the hostname a worker registers with.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_HOSTNAME_LEN` characters.
/// - Alphanumeric, hyphen, dot, and colon (IPv6 literals) only.
pub fn validate_hostname(hostname: &str) -> Result<(), CoreError> {
    if hostname.is_empty() {
        return Err(CoreError::Validation(
            "Worker hostname must not be empty".to_string(),
        ));
    }
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(CoreError::Validation(format!(
            "Worker hostname must not exceed {MAX_HOSTNAME_LEN} characters"
        )));
    }
    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':')
    {
        return Err(CoreError::Validation(
            "Worker hostname may only contain alphanumeric, hyphen, dot, or colon characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate the command port a worker registers with.
pub fn validate_port(port: u16) -> Result<(), CoreError> {
    if port == 0 {
        return Err(CoreError::Validation(
            "Worker port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}

/// Base URL a worker's command server is reachable at.
pub fn worker_base_url(hostname: &str, port: u16) -> String {
    if hostname.contains(':') {
        format!("http://[{hostname}]:{port}")
    } else {
        format!("http://{hostname}:{port}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
