//! Work items.

use crate::check::{CheckKey, CheckType};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// What a worker does with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    DnsLookup,
    HealthCheck,
    AuxFetch,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::DnsLookup => "dns_lookup",
            WorkKind::HealthCheck => "health_check",
            WorkKind::AuxFetch => "aux_fetch",
        }
    }
}

/// Identity of a work stream. At most one item per key is queued or in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkKey {
    Check(CheckKey),
    Dns(String),
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkKey::Check(key) => write!(f, "{}", key),
            WorkKey::Dns(host) => write!(f, "dns:{}", host),
        }
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: WorkKey,
    pub kind: WorkKind,
    /// Earliest time the item may be dispatched.
    pub scheduled: Instant,
    /// Interval the item was scheduled with; lateness is measured against it.
    pub interval: Duration,
    pub retry_count: u32,
}

impl WorkItem {
    /// Health check (or aux fetch, for aux keys) scheduled `interval` after `now`.
    pub fn check(key: CheckKey, now: Instant, interval: Duration) -> Self {
        let kind = if key.check_type == CheckType::Aux {
            WorkKind::AuxFetch
        } else {
            WorkKind::HealthCheck
        };
        Self {
            key: WorkKey::Check(key),
            kind,
            scheduled: now + interval,
            interval,
            retry_count: 0,
        }
    }

    /// DNS lookup for `host` at `at`.
    pub fn dns(host: impl Into<String>, now: Instant, at: Instant) -> Self {
        Self {
            key: WorkKey::Dns(host.into()),
            kind: WorkKind::DnsLookup,
            scheduled: at,
            interval: at.saturating_duration_since(now),
            retry_count: 0,
        }
    }

    /// Same work stream, rescheduled at `at` with `retry_count` retries spent.
    pub fn follow_up(&self, now: Instant, at: Instant, retry_count: u32) -> Self {
        Self {
            key: self.key.clone(),
            kind: self.kind,
            scheduled: at,
            interval: at.saturating_duration_since(now),
            retry_count,
        }
    }

    pub fn check_key(&self) -> Option<&CheckKey> {
        match &self.key {
            WorkKey::Check(key) => Some(key),
            WorkKey::Dns(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckTarget;

    #[test]
    fn test_kind_follows_check_type() {
        let now = Instant::now();
        let aux = CheckKey::new("10.0.0.1".parse().unwrap(), &CheckTarget::new(CheckType::Aux, 80, None));
        let item = WorkItem::check(aux, now, Duration::ZERO);
        assert_eq!(item.kind, WorkKind::AuxFetch);
        assert_eq!(item.scheduled, now);

        let dns = WorkItem::dns("a.example.com", now, now + Duration::from_secs(3));
        assert_eq!(dns.kind, WorkKind::DnsLookup);
        assert_eq!(dns.interval, Duration::from_secs(3));

        let retry = dns.follow_up(now, now + Duration::from_secs(5), 1);
        assert_eq!(retry.key, dns.key);
        assert_eq!(retry.retry_count, 1);
    }
}
