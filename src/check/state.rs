//! Per-check state machine.
//!
//! # States
//! ```text
//! SCHEDULED → DISPATCHED → IN_PROGRESS → COMPLETED_OK   → SCHEDULED (+ttl)
//!                                      → COMPLETED_FAIL → SCHEDULED (+retry_delay, retry+1)
//!                                                       → SCHEDULED (+ttl, retries exhausted)
//! ```
//!
//! # Health
//! - UP / DOWN follow the last terminal result
//! - A toggle closer than `flap_window` to the previous toggle increments
//!   the flap count, otherwise the count restarts at 1
//! - FLAPPING when the count reaches `max_flaps` and the unhealthy fraction
//!   of the history reaches `flap_threshold`
//! - The count clears once `flap_window` passes without a toggle
//!
//! # Design Decisions
//! - Only terminal results enter the history; retries confirm, they do not vote
//! - Retries only run while the check is UP or not yet probed; DOWN and
//!   FLAPPING checks fall through to their normal interval
//! - Mutated only by the worker owning the key's in-flight work item

use crate::check::params::{CheckParams, Measurement};
use crate::check::result::{CheckResult, Reason, ResultRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Declared health of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Unknown,
    Up,
    Down,
    Flapping,
}

impl Health {
    pub fn is_up(&self) -> bool {
        matches!(self, Health::Up)
    }

    /// Gauge value exported for this health.
    pub fn gauge(&self) -> f64 {
        match self {
            Health::Up => 1.0,
            Health::Down | Health::Unknown => 0.0,
            Health::Flapping => -1.0,
        }
    }
}

/// Lifecycle phase of the key's current work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Scheduled,
    Dispatched,
    InProgress,
    CompletedOk,
    CompletedFail,
}

/// Result history and toggle tracking for one check.
#[derive(Debug, Clone, Default)]
pub struct FlapState {
    history: VecDeque<bool>,
    flap_count: u32,
    last_toggle: Option<Instant>,
    last_terminal: Option<bool>,
    health: Health,
}

impl FlapState {
    pub fn health(&self) -> Health {
        self.health
    }

    pub fn flap_count(&self) -> u32 {
        self.flap_count
    }

    pub fn history(&self) -> impl Iterator<Item = bool> + '_ {
        self.history.iter().copied()
    }

    /// Fraction of retained results that were unhealthy.
    pub fn unhealthy_fraction(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let bad = self.history.iter().filter(|ok| !**ok).count();
        bad as f64 / self.history.len() as f64
    }

    /// Record one terminal result and recompute the declared health.
    pub fn record(&mut self, healthy: bool, params: &CheckParams, now: Instant) -> Health {
        self.history.push_back(healthy);
        while self.history.len() > params.history_len() {
            self.history.pop_front();
        }

        let window = params.flap_window();
        let toggled = self.last_terminal.is_some_and(|prev| prev != healthy);
        if toggled {
            self.flap_count = match self.last_toggle {
                Some(at) if now.saturating_duration_since(at) < window => self.flap_count + 1,
                _ => 1,
            };
            self.last_toggle = Some(now);
        } else if let Some(at) = self.last_toggle {
            if now.saturating_duration_since(at) >= window {
                self.flap_count = 0;
                self.last_toggle = None;
            }
        }
        self.last_terminal = Some(healthy);

        let flapping = params.max_flaps > 0
            && self.flap_count >= params.max_flaps
            && self.unhealthy_fraction() >= params.flap_threshold;

        self.health = if flapping {
            Health::Flapping
        } else if healthy {
            Health::Up
        } else {
            Health::Down
        };
        self.health
    }

    /// Seed the state from a persisted result.
    fn restore(&mut self, health: Health) {
        self.health = health;
        self.last_terminal = match health {
            Health::Up => Some(true),
            Health::Down | Health::Flapping => Some(false),
            Health::Unknown => None,
        };
        if let Some(ok) = self.last_terminal {
            self.history.push_back(ok);
        }
    }
}

/// Counters exposed through the admin API.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CheckStats {
    pub probes: u64,
    pub failures: u64,
    pub retries: u64,
}

/// Outcome of feeding one result into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingest {
    pub outcome: Phase,
    /// When the key should run next.
    pub next_at: Instant,
    /// Retry count carried by the follow-up work item.
    pub retry_count: u32,
    /// Whether the result entered the history.
    pub terminal: bool,
    pub retries_exhausted: bool,
    /// Declared health change, if any.
    pub transition: Option<(Health, Health)>,
}

/// Everything the daemon tracks about one check key.
#[derive(Debug, Clone, Default)]
pub struct CheckState {
    pub phase: Phase,
    flap: FlapState,
    smoothed_rtt: Option<Duration>,
    last_rtt: Option<Duration>,
    slow: bool,
    forced_down: bool,
    last_result: Option<CheckResult>,
    last_checked: Option<Instant>,
    stats: CheckStats,
}

impl CheckState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Health as reported to consumers; forced keys are always DOWN.
    pub fn health(&self) -> Health {
        if self.forced_down {
            Health::Down
        } else {
            self.flap.health()
        }
    }

    /// Health derived from probe results alone.
    pub fn probed_health(&self) -> Health {
        self.flap.health()
    }

    pub fn flap(&self) -> &FlapState {
        &self.flap
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    pub fn is_slow(&self) -> bool {
        self.slow
    }

    pub fn is_forced_down(&self) -> bool {
        self.forced_down
    }

    pub fn set_forced_down(&mut self, forced: bool) {
        self.forced_down = forced;
    }

    pub fn last_result(&self) -> Option<&CheckResult> {
        self.last_result.as_ref()
    }

    pub fn last_checked(&self) -> Option<Instant> {
        self.last_checked
    }

    pub fn stats(&self) -> CheckStats {
        self.stats
    }

    /// Restore declared health from a warm-start record.
    pub fn restore(&mut self, record: &ResultRecord) {
        self.flap.restore(record.health);
        if record.reason.is_success() {
            let rtt = Duration::from_millis(record.rtt_ms);
            self.last_rtt = Some(rtt);
            self.smoothed_rtt = Some(Duration::from_millis(record.smoothed_rtt_ms));
        }
        self.slow = record.slow;
    }

    /// Feed a probe result into the state machine.
    ///
    /// `retry_count` is the number of retries already spent in this cycle.
    pub fn ingest(
        &mut self,
        result: CheckResult,
        retry_count: u32,
        params: &CheckParams,
        now: Instant,
    ) -> Ingest {
        let result = if result.is_success() && result.rtt() > params.timeout() {
            result.reclassify(Reason::ResponseTimeout)
        } else {
            result
        };
        let ok = result.is_success();
        let before = self.health();

        self.stats.probes += 1;
        self.last_checked = Some(now);

        if !ok {
            self.stats.failures += 1;
            if retry_count < params.max_retries && matches!(self.flap.health(), Health::Up | Health::Unknown) {
                self.stats.retries += 1;
                self.last_result = Some(result);
                self.phase = Phase::Scheduled;
                return Ingest {
                    outcome: Phase::CompletedFail,
                    next_at: now + params.retry_delay(),
                    retry_count: retry_count + 1,
                    terminal: false,
                    retries_exhausted: false,
                    transition: None,
                };
            }
        }

        if ok {
            self.observe_rtt(result.rtt(), params);
        }
        self.flap.record(ok, params, now);
        self.last_result = Some(result);
        self.phase = Phase::Scheduled;

        let after = self.health();
        let interval = if self.flap.health() == Health::Flapping {
            params.flapping_ttl()
        } else {
            params.ttl()
        };

        Ingest {
            outcome: if ok { Phase::CompletedOk } else { Phase::CompletedFail },
            next_at: now + interval,
            retry_count: 0,
            terminal: true,
            retries_exhausted: !ok && params.max_retries > 0 && retry_count >= params.max_retries,
            transition: (before != after).then_some((before, after)),
        }
    }

    fn observe_rtt(&mut self, rtt: Duration, params: &CheckParams) {
        let window = params.history_len() as u32;
        let smoothed = match self.smoothed_rtt {
            Some(prev) => (rtt + prev * (window - 1)) / window,
            None => rtt,
        };
        self.last_rtt = Some(rtt);
        self.smoothed_rtt = Some(smoothed);

        self.slow = match params.slow_threshold() {
            Some(limit) => {
                let measured = match params.measurement {
                    Measurement::Raw => rtt,
                    Measurement::Smoothed => smoothed,
                };
                measured > limit
            }
            None => false,
        };
    }

    /// Build the record published to the result store.
    pub fn to_record(&self, groups: Vec<String>, hosts: Vec<String>, checked_at_ms: u64) -> Option<ResultRecord> {
        let result = self.last_result.as_ref()?;
        Some(ResultRecord {
            health: self.health(),
            reason: result.reason,
            response: result.response,
            status_code: result.status_code,
            rtt_ms: result.rtt().as_millis() as u64,
            smoothed_rtt_ms: self.smoothed_rtt.map(|d| d.as_millis() as u64).unwrap_or(0),
            slow: self.slow,
            checked_at_ms,
            groups,
            hosts,
        })
    }
}
