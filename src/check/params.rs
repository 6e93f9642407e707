//! Per-group check parameters.
//!
//! A [`CheckParams`] value is an immutable snapshot; reloads build a new one
//! and swap the `Arc` held by the index.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which RTT value the SLOW flag is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    Raw,
    #[default]
    Smoothed,
}

/// Timing and hysteresis settings shared by every member of a host group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckParams {
    /// Per-probe deadline in milliseconds.
    pub timeout_ms: u64,

    /// Normal reschedule interval in milliseconds.
    pub ttl_ms: u64,

    /// Delay before retrying a failed probe.
    pub retry_delay_ms: u64,

    /// Retries before a failure counts against the check.
    pub max_retries: u32,

    /// Toggles closer together than this count toward flapping.
    pub flap_window_ms: u64,

    /// Minimum unhealthy fraction of the history window for FLAPPING.
    pub flap_threshold: f64,

    /// Toggle count that declares FLAPPING. Zero disables flap detection.
    pub max_flaps: u32,

    /// TTL multiplier applied while FLAPPING.
    pub flap_backoff: u32,

    /// Number of results retained and RTT smoothing divisor.
    pub smoothing_window: u32,

    /// Minimum fraction of UP members for the group to be up.
    pub group_threshold: f64,

    /// RTT above which a member is flagged SLOW. Zero disables.
    pub slow_threshold_ms: u64,

    pub measurement: Measurement,
}

impl Default for CheckParams {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            ttl_ms: 30_000,
            retry_delay_ms: 5_000,
            max_retries: 2,
            flap_window_ms: 60_000,
            flap_threshold: 0.0,
            max_flaps: 4,
            flap_backoff: 3,
            smoothing_window: 10,
            group_threshold: 0.2,
            slow_threshold_ms: 0,
            measurement: Measurement::Smoothed,
        }
    }
}

impl CheckParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn flap_window(&self) -> Duration {
        Duration::from_millis(self.flap_window_ms)
    }

    pub fn slow_threshold(&self) -> Option<Duration> {
        (self.slow_threshold_ms > 0).then(|| Duration::from_millis(self.slow_threshold_ms))
    }

    /// Reschedule interval while the check is FLAPPING.
    pub fn flapping_ttl(&self) -> Duration {
        self.ttl().saturating_mul(self.flap_backoff.max(1))
    }

    pub fn history_len(&self) -> usize {
        self.smoothing_window.max(1) as usize
    }
}

/// Per-group overrides layered on top of `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
    pub timeout_ms: Option<u64>,
    pub ttl_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub flap_window_ms: Option<u64>,
    pub flap_threshold: Option<f64>,
    pub max_flaps: Option<u32>,
    pub flap_backoff: Option<u32>,
    pub smoothing_window: Option<u32>,
    pub group_threshold: Option<f64>,
    pub slow_threshold_ms: Option<u64>,
    pub measurement: Option<Measurement>,
}

impl ParamOverrides {
    pub fn apply(&self, base: &CheckParams) -> CheckParams {
        CheckParams {
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            ttl_ms: self.ttl_ms.unwrap_or(base.ttl_ms),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(base.retry_delay_ms),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            flap_window_ms: self.flap_window_ms.unwrap_or(base.flap_window_ms),
            flap_threshold: self.flap_threshold.unwrap_or(base.flap_threshold),
            max_flaps: self.max_flaps.unwrap_or(base.max_flaps),
            flap_backoff: self.flap_backoff.unwrap_or(base.flap_backoff),
            smoothing_window: self.smoothing_window.unwrap_or(base.smoothing_window),
            group_threshold: self.group_threshold.unwrap_or(base.group_threshold),
            slow_threshold_ms: self.slow_threshold_ms.unwrap_or(base.slow_threshold_ms),
            measurement: self.measurement.unwrap_or(base.measurement),
        }
    }
}
