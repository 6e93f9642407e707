//! DNS resolution cache.

use crate::check::DualStack;
use crate::config::DnsConfig;
use crate::queue::{Insert, WorkItem, WorkQueue};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Lookup progress of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    #[default]
    None,
    Queued,
    InProgress,
    Complete,
}

/// Cached addresses for one hostname.
#[derive(Debug, Clone)]
pub struct DnsEntry {
    pub hostname: String,
    pub addresses: BTreeSet<IpAddr>,
    pub ttl: Duration,
    pub last_update: Option<Instant>,
    pub state: QueryState,
    pub dual_stack: DualStack,
    /// Consecutive failed lookups.
    pub failures: u32,
    /// Set once retries are exhausted; cleared by the next successful lookup.
    pub degraded: bool,
    pub is_static: bool,
}

impl DnsEntry {
    fn new(hostname: &str, dual_stack: DualStack, ttl: Duration) -> Self {
        Self {
            hostname: hostname.to_string(),
            addresses: BTreeSet::new(),
            ttl,
            last_update: None,
            state: QueryState::None,
            dual_stack,
            failures: 0,
            degraded: false,
            is_static: false,
        }
    }

    /// True once the TTL has elapsed since the last successful update.
    pub fn is_stale(&self, now: Instant) -> bool {
        if self.is_static {
            return false;
        }
        match self.last_update {
            Some(at) => self.degraded || now.saturating_duration_since(at) > self.ttl,
            None => true,
        }
    }

    fn lookup_pending(&self) -> bool {
        matches!(self.state, QueryState::Queued | QueryState::InProgress)
    }
}

/// Addresses handed to a dependent check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSet {
    pub addresses: Vec<IpAddr>,
    pub stale: bool,
}

impl AddressSet {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.addresses.contains(addr)
    }
}

/// Address changes produced by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressDiff {
    pub added: Vec<IpAddr>,
    pub removed: Vec<IpAddr>,
}

impl AddressDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// What to do after a failed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    Retry { attempt: u32, delay: Duration },
    /// Retries spent; last-known-good addresses stay, flagged stale.
    Exhausted,
}

/// Admin view of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct DnsEntryView {
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub ttl_secs: u64,
    pub age_ms: Option<u64>,
    pub state: QueryState,
    pub stale: bool,
    pub failures: u32,
    pub is_static: bool,
}

/// Hostname → address set, owned here and referenced elsewhere by hostname.
pub struct DnsCache {
    entries: DashMap<String, DnsEntry>,
    config: ArcSwap<DnsConfig>,
}

impl DnsCache {
    pub fn new(config: DnsConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn set_config(&self, config: DnsConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<DnsConfig> {
        self.config.load_full()
    }

    /// Track `host`. Returns true when the host was not known before.
    pub fn register(&self, host: &str, dual_stack: DualStack) -> bool {
        let ttl = self.config.load().ttl();
        match self.entries.get_mut(host) {
            Some(mut entry) => {
                if entry.is_static {
                    entry.is_static = false;
                    entry.last_update = None;
                    entry.state = QueryState::None;
                }
                entry.dual_stack = dual_stack;
                entry.ttl = ttl;
                false
            }
            None => {
                self.entries
                    .insert(host.to_string(), DnsEntry::new(host, dual_stack, ttl));
                true
            }
        }
    }

    /// Serve `host` from fixed addresses; no lookups are ever made for it.
    pub fn register_static(&self, host: &str, addresses: &[IpAddr], now: Instant) {
        let mut entry = self
            .entries
            .remove(host)
            .map(|(_, e)| e)
            .unwrap_or_else(|| DnsEntry::new(host, DualStack::Both, Duration::ZERO));
        entry.addresses = addresses.iter().copied().collect();
        entry.is_static = true;
        entry.state = QueryState::Complete;
        entry.last_update = Some(now);
        entry.failures = 0;
        entry.degraded = false;
        self.entries.insert(host.to_string(), entry);
    }

    pub fn remove(&self, host: &str) -> Option<DnsEntry> {
        self.entries.remove(host).map(|(_, e)| e)
    }

    pub fn contains(&self, host: &str) -> bool {
        self.entries.contains_key(host)
    }

    pub fn is_static(&self, host: &str) -> bool {
        self.entries.get(host).is_some_and(|e| e.is_static)
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue a lookup for `host` at `at` unless one is already queued or running.
    pub fn schedule_lookup(&self, host: &str, queue: &WorkQueue, at: Instant) -> bool {
        let previous = match self.entries.get_mut(host) {
            Some(mut entry) if !entry.is_static && !entry.lookup_pending() => {
                let previous = entry.state;
                entry.state = QueryState::Queued;
                previous
            }
            _ => return false,
        };

        match queue.insert(WorkItem::dns(host, Instant::now(), at)) {
            Insert::Queued => true,
            Insert::AlreadyQueued | Insert::InFlight => false,
            Insert::ShutDown => {
                if let Some(mut entry) = self.entries.get_mut(host) {
                    entry.state = previous;
                }
                false
            }
        }
    }

    /// Record that a follow-up lookup for `host` has been queued.
    pub fn mark_queued(&self, host: &str) {
        if let Some(mut entry) = self.entries.get_mut(host) {
            entry.state = QueryState::Queued;
        }
    }

    /// Move `host` to IN_PROGRESS. Returns the families to resolve, or `None`
    /// when the host is unknown or static.
    pub fn start_lookup(&self, host: &str) -> Option<DualStack> {
        let mut entry = self.entries.get_mut(host)?;
        if entry.is_static {
            return None;
        }
        entry.state = QueryState::InProgress;
        Some(entry.dual_stack)
    }

    pub fn get_addresses(&self, host: &str, now: Instant) -> Option<AddressSet> {
        let entry = self.entries.get(host)?;
        Some(AddressSet {
            addresses: entry.addresses.iter().copied().collect(),
            stale: entry.is_stale(now),
        })
    }

    /// Addresses for a dependent check. A stale entry gets a refresh queued
    /// before the (stale-flagged) addresses are returned.
    pub fn addresses_for_dispatch(&self, host: &str, queue: &WorkQueue, now: Instant) -> Option<AddressSet> {
        let set = self.get_addresses(host, now)?;
        if set.stale {
            self.schedule_lookup(host, queue, now);
        }
        Some(set)
    }

    /// Apply a completed lookup in place and return what changed.
    ///
    /// An empty answer replaces the address set; callers treat it as a
    /// failed lookup and use [`record_failure`](DnsCache::record_failure) instead.
    pub fn update_entry(
        &self,
        host: &str,
        addresses: &[IpAddr],
        ttl: Option<Duration>,
        now: Instant,
    ) -> Option<AddressDiff> {
        let default_ttl = self.config.load().ttl();
        let mut entry = self.entries.get_mut(host)?;
        if entry.is_static {
            return Some(AddressDiff::default());
        }

        let family = entry.dual_stack;
        let fresh: BTreeSet<IpAddr> = addresses
            .iter()
            .copied()
            .filter(|a| family.accepts(a))
            .collect();

        let diff = AddressDiff {
            added: fresh.difference(&entry.addresses).copied().collect(),
            removed: entry.addresses.difference(&fresh).copied().collect(),
        };

        entry.addresses = fresh;
        entry.ttl = ttl.unwrap_or(default_ttl);
        entry.last_update = Some(now);
        entry.state = QueryState::Complete;
        entry.failures = 0;
        entry.degraded = false;
        Some(diff)
    }

    /// Count a failed lookup and decide whether to retry.
    pub fn record_failure(&self, host: &str) -> Option<LookupFailure> {
        let config = self.config.load();
        let mut entry = self.entries.get_mut(host)?;
        entry.failures += 1;
        entry.state = QueryState::Complete;

        if entry.failures <= config.retries {
            return Some(LookupFailure::Retry {
                attempt: entry.failures,
                delay: config.retry_delay(),
            });
        }
        entry.failures = 0;
        entry.degraded = true;
        Some(LookupFailure::Exhausted)
    }

    /// Stale entries with no lookup queued or running.
    pub fn expired(&self, now: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_stale(now) && !e.lookup_pending())
            .map(|e| e.key().clone())
            .collect()
    }

    /// When the entry should next be refreshed.
    pub fn next_refresh(&self, host: &str, now: Instant) -> Instant {
        match self.entries.get(host) {
            Some(entry) => match entry.last_update {
                Some(at) if !entry.degraded => (at + entry.ttl).max(now),
                _ => now + entry.ttl,
            },
            None => now,
        }
    }

    pub fn snapshot(&self, now: Instant) -> Vec<DnsEntryView> {
        let mut views: Vec<DnsEntryView> = self
            .entries
            .iter()
            .map(|e| DnsEntryView {
                hostname: e.hostname.clone(),
                addresses: e.addresses.iter().copied().collect(),
                ttl_secs: e.ttl.as_secs(),
                age_ms: e
                    .last_update
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                state: e.state,
                stale: e.is_stale(now),
                failures: e.failures,
                is_static: e.is_static,
            })
            .collect();
        views.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        views
    }
}
