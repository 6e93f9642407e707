//! Check / host-group index.
//!
//! # Responsibilities
//! - Deduplicate identical checks referenced by several host groups
//! - Own the per-key state machine records
//! - Map results back to every interested group
//! - Diff the wanted key set against the current one on reload or DNS change
//!
//! # Design Decisions
//! - Records are looked up by `CheckKey`; nothing holds a pointer into the
//!   queue or the DNS cache
//! - The per-record mutex is only contended by admin readers; the queue's
//!   in-flight guard already serializes state machine updates
//! - Reconcile is a full recompute, serialized by its own lock

pub mod table;

pub use table::{Desired, GroupTable, Subscription};

use crate::check::{CheckKey, CheckParams, CheckState, GroupHealth, Health, MemberHealth, Phase};
use crate::dns::DnsCache;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Mutable part of a check record.
#[derive(Debug)]
pub struct RecordInner {
    pub hosts: Vec<String>,
    pub groups: Vec<String>,
    pub params: Arc<CheckParams>,
    pub state: CheckState,
}

/// Everything known about one check key.
#[derive(Debug)]
pub struct CheckRecord {
    inner: Mutex<RecordInner>,
}

impl CheckRecord {
    fn new(desired: &Desired) -> Self {
        Self {
            inner: Mutex::new(RecordInner {
                hosts: desired.hosts.iter().cloned().collect(),
                groups: desired.groups.iter().cloned().collect(),
                params: desired.params.clone(),
                state: CheckState::new(),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RecordInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of a reconcile pass.
#[derive(Debug, Default)]
pub struct Diff {
    pub added: Vec<(CheckKey, Arc<CheckParams>)>,
    pub removed: Vec<CheckKey>,
    /// Keys whose parameters changed.
    pub updated: Vec<CheckKey>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Admin view of one check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckView {
    pub key: CheckKey,
    pub hosts: Vec<String>,
    pub groups: Vec<String>,
    pub health: Health,
    pub probed_health: Health,
    pub phase: Phase,
    pub forced_down: bool,
    pub slow: bool,
    pub last_reason: Option<String>,
    pub rtt_ms: Option<u64>,
    pub smoothed_rtt_ms: Option<u64>,
    pub flap_count: u32,
    pub probes: u64,
    pub failures: u64,
    pub retries: u64,
}

/// Authoritative map of check keys to their records.
pub struct CheckIndex {
    table: ArcSwap<GroupTable>,
    records: DashMap<CheckKey, Arc<CheckRecord>>,
    reconcile_lock: Mutex<()>,
}

impl CheckIndex {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(GroupTable::default()),
            records: DashMap::new(),
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Publish a new group table. Records change on the next reconcile.
    pub fn install(&self, table: GroupTable) {
        self.table.store(Arc::new(table));
    }

    pub fn table(&self) -> Arc<GroupTable> {
        self.table.load_full()
    }

    /// Bring the record set in line with the table and the DNS cache.
    pub fn reconcile(&self, dns: &DnsCache, now: Instant) -> Diff {
        let _guard = self.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let desired = self.table.load().desired(dns, now);
        let mut diff = Diff::default();

        let stale: Vec<CheckKey> = self
            .records
            .iter()
            .filter(|r| !desired.contains_key(r.key()))
            .map(|r| r.key().clone())
            .collect();
        for key in stale {
            self.records.remove(&key);
            diff.removed.push(key);
        }

        for (key, want) in desired {
            let existing = self.records.get(&key).map(|r| r.value().clone());
            match existing {
                Some(record) => {
                    let mut inner = record.lock();
                    inner.hosts = want.hosts.into_iter().collect();
                    inner.groups = want.groups.into_iter().collect();
                    if *inner.params != *want.params {
                        inner.params = want.params;
                        diff.updated.push(key);
                    }
                }
                None => {
                    self.records.insert(key.clone(), Arc::new(CheckRecord::new(&want)));
                    diff.added.push((key, want.params));
                }
            }
        }

        diff
    }

    pub fn get(&self, key: &CheckKey) -> Option<Arc<CheckRecord>> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &CheckKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> Vec<CheckKey> {
        let mut keys: Vec<CheckKey> = self.records.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Keys probed on behalf of `host`.
    pub fn keys_for_host(&self, host: &str) -> Vec<CheckKey> {
        let records: Vec<(CheckKey, Arc<CheckRecord>)> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let mut keys: Vec<CheckKey> = records
            .into_iter()
            .filter(|(_, record)| record.lock().hosts.iter().any(|h| h == host))
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        keys
    }

    fn snapshot(&self) -> Vec<(CheckKey, Arc<CheckRecord>)> {
        let mut records: Vec<(CheckKey, Arc<CheckRecord>)> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    /// Aggregated health of every configured group.
    pub fn all_group_health(&self) -> Vec<GroupHealth> {
        let mut members: BTreeMap<String, Vec<MemberHealth>> = BTreeMap::new();
        for (key, record) in self.snapshot() {
            let inner = record.lock();
            for group in &inner.groups {
                members.entry(group.clone()).or_default().push(MemberHealth {
                    key: key.clone(),
                    health: inner.state.health(),
                    slow: inner.state.is_slow(),
                });
            }
        }

        self.table
            .load()
            .groups()
            .iter()
            .map(|group| {
                let list = members.remove(&group.name).unwrap_or_default();
                GroupHealth::aggregate(&group.name, group.params.group_threshold, list)
            })
            .collect()
    }

    pub fn group_health(&self, name: &str) -> Option<GroupHealth> {
        self.all_group_health().into_iter().find(|g| g.name == name)
    }

    pub fn views(&self) -> Vec<CheckView> {
        self.snapshot()
            .into_iter()
            .map(|(key, record)| {
                let inner = record.lock();
                let state = &inner.state;
                let stats = state.stats();
                CheckView {
                    key,
                    hosts: inner.hosts.clone(),
                    groups: inner.groups.clone(),
                    health: state.health(),
                    probed_health: state.probed_health(),
                    phase: state.phase,
                    forced_down: state.is_forced_down(),
                    slow: state.is_slow(),
                    last_reason: state.last_result().map(|r| r.reason.as_str().to_string()),
                    rtt_ms: state.last_rtt().map(|d| d.as_millis() as u64),
                    smoothed_rtt_ms: state.smoothed_rtt().map(|d| d.as_millis() as u64),
                    flap_count: state.flap().flap_count(),
                    probes: stats.probes,
                    failures: stats.failures,
                    retries: stats.retries,
                }
            })
            .collect()
    }

    /// Groups that currently contain `key`.
    pub fn groups_of(&self, key: &CheckKey) -> BTreeSet<String> {
        self.get(key)
            .map(|record| record.lock().groups.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for CheckIndex {
    fn default() -> Self {
        Self::new()
    }
}
