//! Work execution: health checks and DNS lookups.
//!
//! # Responsibilities
//! - Gate health checks on the DNS cache (stale entries get a refresh first)
//! - Run the executor and contain its panics
//! - Feed results into the key's state machine and compute the follow-up
//! - Publish terminal results, aux data, logs and metrics
//! - Apply DNS changes and reloads by diffing check keys

use crate::check::{CheckKey, CheckParams, CheckResult, CheckState, Health, Phase, ResultRecord};
use crate::dns::{DnsCache, LookupFailure, Resolve, ResolveError};
use crate::executor::{Execute, Probe};
use crate::index::{CheckIndex, CheckRecord, Diff};
use crate::observability::metrics;
use crate::pool::WorkHandler;
use crate::queue::{WorkItem, WorkKey, WorkQueue};
use crate::storage::ResultStore;
use dashmap::{DashMap, DashSet};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use std::any::Any;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Reschedule delay for work whose handler crashed and has no better hint.
const RECOVER_DELAY: Duration = Duration::from_secs(30);

/// What an operator forces DOWN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceTarget {
    Host(String),
    Address(IpAddr),
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe panicked".to_string()
    }
}

pub struct Engine {
    queue: Arc<WorkQueue>,
    dns: Arc<DnsCache>,
    index: Arc<CheckIndex>,
    store: Arc<dyn ResultStore>,
    executor: Arc<dyn Execute>,
    resolver: Arc<dyn Resolve>,
    warm: DashMap<CheckKey, ResultRecord>,
    forced_hosts: DashSet<String>,
    forced_addresses: DashSet<IpAddr>,
    /// Held from the index diff until its queue changes are applied.
    reconcile_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        queue: Arc<WorkQueue>,
        dns: Arc<DnsCache>,
        index: Arc<CheckIndex>,
        store: Arc<dyn ResultStore>,
        executor: Arc<dyn Execute>,
        resolver: Arc<dyn Resolve>,
    ) -> Self {
        Self {
            queue,
            dns,
            index,
            store,
            executor,
            resolver,
            warm: DashMap::new(),
            forced_hosts: DashSet::new(),
            forced_addresses: DashSet::new(),
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Remember stored results so newly added keys can skip their first probe.
    pub fn load_warm_results(&self) -> usize {
        match self.store.load_results() {
            Ok(results) => {
                let count = results.len();
                for (key, record) in results {
                    self.warm.insert(key, record);
                }
                if count > 0 {
                    tracing::info!(results = count, "Loaded prior results for warm start");
                }
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load prior results; starting cold");
                0
            }
        }
    }

    /// Diff the index against the table and DNS cache; queue and cancel work.
    ///
    /// Concurrent callers (reloads, DNS lookups on different workers) are
    /// serialized, so a key removed by one diff and re-added by the next
    /// always ends with its work item queued.
    pub fn reconcile(&self, now: Instant) -> Diff {
        let _guard = self.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let diff = self.index.reconcile(&self.dns, now);

        for (key, params) in &diff.added {
            self.schedule_new(key, params, now);
        }
        for key in &diff.removed {
            self.queue.remove(&WorkKey::Check(key.clone()));
            self.warm.remove(key);
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key = %key, error = %e, "Failed to remove result");
            }
            tracing::info!(key = %key, "Check removed");
        }
        for key in &diff.updated {
            tracing::debug!(key = %key, "Check parameters updated");
        }
        diff
    }

    fn schedule_new(&self, key: &CheckKey, params: &CheckParams, now: Instant) {
        let mut delay = Duration::ZERO;

        if let Some(record) = self.index.get(key) {
            let mut inner = record.lock();
            if self.is_forced(key, &inner.hosts) {
                inner.state.set_forced_down(true);
            }
            if let Some((_, stored)) = self.warm.remove(key) {
                let age = Duration::from_millis(epoch_ms().saturating_sub(stored.checked_at_ms));
                if age < params.ttl() {
                    inner.state.restore(&stored);
                    delay = params.ttl() - age;
                    metrics::record_health(key, inner.state.health());
                }
            }
        }

        let item = WorkItem::check(key.clone(), now, delay);
        tracing::debug!(key = %key, delay_ms = delay.as_millis() as u64, "Check scheduled");
        self.queue.insert(item);
    }

    fn is_forced(&self, key: &CheckKey, hosts: &[String]) -> bool {
        self.forced_addresses.contains(&key.address) || hosts.iter().any(|h| self.forced_hosts.contains(h))
    }

    /// Force (or release) every key of a host or address. Returns the keys touched.
    pub fn force(&self, target: &ForceTarget, down: bool) -> Vec<CheckKey> {
        match target {
            ForceTarget::Host(host) => {
                if down {
                    self.forced_hosts.insert(host.clone());
                } else {
                    self.forced_hosts.remove(host);
                }
            }
            ForceTarget::Address(addr) => {
                if down {
                    self.forced_addresses.insert(*addr);
                } else {
                    self.forced_addresses.remove(addr);
                }
            }
        }

        let mut touched = Vec::new();
        for key in self.index.keys() {
            let Some(record) = self.index.get(&key) else { continue };
            let mut inner = record.lock();
            let matches = match target {
                ForceTarget::Host(host) => inner.hosts.iter().any(|h| h == host),
                ForceTarget::Address(addr) => key.address == *addr,
            };
            if !matches {
                continue;
            }
            let forced = self.is_forced(&key, &inner.hosts);
            if inner.state.is_forced_down() != forced {
                inner.state.set_forced_down(forced);
                metrics::record_health(&key, inner.state.health());
                tracing::warn!(key = %key, forced_down = forced, "Forced status changed");
            }
            touched.push(key);
        }
        touched
    }

    fn check_delay(&self, key: &CheckKey) -> Duration {
        self.index
            .get(key)
            .map(|record| record.lock().params.ttl())
            .unwrap_or(RECOVER_DELAY)
    }

    async fn run_check(&self, item: WorkItem, key: CheckKey) -> Option<WorkItem> {
        let Some(record) = self.index.get(&key) else {
            tracing::debug!(key = %key, "Dropping work for removed check");
            return None;
        };

        let (hosts, params) = {
            let mut inner = record.lock();
            inner.state.phase = Phase::Dispatched;
            (inner.hosts.clone(), inner.params.clone())
        };

        let now = Instant::now();
        let mut hostname = None;
        for host in &hosts {
            if let Some(set) = self.dns.addresses_for_dispatch(host, &self.queue, now) {
                if set.stale {
                    tracing::debug!(host = %host, key = %key, "Using stale addresses while refresh is queued");
                }
                if set.contains(&key.address) && hostname.is_none() {
                    hostname = Some(host.clone());
                }
            }
        }
        let Some(hostname) = hostname else {
            // Address no longer resolved for this key; reconcile will retire it.
            record.lock().state.phase = Phase::Scheduled;
            return Some(item.follow_up(now, now + params.ttl(), 0));
        };

        record.lock().state.phase = Phase::InProgress;
        let probe = Probe {
            key: key.clone(),
            hostname,
            params: params.clone(),
        };

        let started = Instant::now();
        let result = match AssertUnwindSafe(self.executor.execute(&probe, params.timeout()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(key = %key, panic = %message, "Check executor panicked");
                CheckResult::internal_error(started, message)
            }
        };

        match self.index.get(&key) {
            Some(current) if Arc::ptr_eq(&current, &record) => {}
            Some(_) => {
                // Removed and re-added while in flight: start the new record fresh.
                let now = Instant::now();
                return Some(item.follow_up(now, now, 0));
            }
            None => {
                tracing::debug!(key = %key, "Discarding result for removed check");
                return None;
            }
        }

        Some(self.complete_check(&item, &key, &record, result))
    }

    fn complete_check(&self, item: &WorkItem, key: &CheckKey, record: &CheckRecord, result: CheckResult) -> WorkItem {
        let now = Instant::now();
        let aux = result.aux.clone();
        let rtt = result.rtt();

        let mut inner = record.lock();
        let params = inner.params.clone();
        let ingest = inner.state.ingest(result, item.retry_count, &params, now);
        let state: &CheckState = &inner.state;
        let reason = state.last_result().map(|r| r.reason);

        if let Some(reason) = reason {
            metrics::record_check(key, reason, rtt);
        }

        if let Some((from, to)) = ingest.transition {
            match to {
                Health::Up => tracing::info!(key = %key, from = ?from, to = ?to, hosts = ?inner.hosts, "Check is up"),
                Health::Flapping => tracing::warn!(
                    key = %key,
                    from = ?from,
                    flaps = state.flap().flap_count(),
                    "Check is flapping; backing off"
                ),
                _ => tracing::warn!(key = %key, from = ?from, to = ?to, reason = ?reason, hosts = ?inner.hosts, "Check is down"),
            }
        }

        if ingest.retries_exhausted {
            tracing::warn!(key = %key, retries = item.retry_count, reason = ?reason, "Retries exhausted");
        } else if !ingest.terminal {
            tracing::debug!(key = %key, retry = ingest.retry_count, reason = ?reason, "Retrying check");
        }

        if ingest.terminal {
            metrics::record_health(key, state.health());
            if let Some(out) = state.to_record(inner.groups.clone(), inner.hosts.clone(), epoch_ms()) {
                if let Err(e) = self.store.update_check_result(key, &out) {
                    tracing::warn!(key = %key, error = %e, "Failed to publish result");
                }
            }
        }
        drop(inner);

        if let Some(aux) = aux {
            if let Err(e) = self.store.update_aux_info(key, &aux) {
                tracing::warn!(key = %key, error = %e, "Failed to publish aux data");
            }
        }

        item.follow_up(now, ingest.next_at, ingest.retry_count)
    }

    async fn run_dns(&self, item: WorkItem, host: String) -> Option<WorkItem> {
        let family = self.dns.start_lookup(&host)?;
        let timeout = self.dns.config().timeout();

        let outcome = match AssertUnwindSafe(self.resolver.resolve(&host, family, timeout))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(ResolveError::Failed(panic_message(panic.as_ref()))),
        };
        let now = Instant::now();
        let outcome = outcome.and_then(|resolution| {
            if resolution.addresses.iter().any(|a| family.accepts(a)) {
                Ok(resolution)
            } else {
                Err(ResolveError::NotFound(host.clone()))
            }
        });

        match outcome {
            Ok(resolution) => {
                metrics::record_dns_lookup("success");
                let diff = self.dns.update_entry(&host, &resolution.addresses, resolution.ttl, now)?;
                if !diff.is_empty() {
                    tracing::info!(
                        host = %host,
                        added = ?diff.added,
                        removed = ?diff.removed,
                        "DNS addresses changed"
                    );
                    self.reconcile(now);
                }
                let at = self.dns.next_refresh(&host, now);
                self.dns.mark_queued(&host);
                Some(item.follow_up(now, at, 0))
            }
            Err(e) => {
                metrics::record_dns_lookup(e.reason().as_str());
                match self.dns.record_failure(&host)? {
                    LookupFailure::Retry { attempt, delay } => {
                        tracing::debug!(host = %host, attempt, error = %e, "DNS lookup failed, retrying");
                        self.dns.mark_queued(&host);
                        Some(item.follow_up(now, now + delay, attempt))
                    }
                    LookupFailure::Exhausted => {
                        tracing::warn!(host = %host, error = %e, "DNS retries exhausted; keeping last known addresses");
                        let at = self.dns.next_refresh(&host, now);
                        self.dns.mark_queued(&host);
                        Some(item.follow_up(now, at, 0))
                    }
                }
            }
        }
    }
}

impl WorkHandler for Engine {
    fn run(&self, item: WorkItem) -> BoxFuture<'_, Option<WorkItem>> {
        Box::pin(async move {
            match item.key.clone() {
                WorkKey::Check(key) => self.run_check(item, key).await,
                WorkKey::Dns(host) => self.run_dns(item, host).await,
            }
        })
    }

    fn recover(&self, item: &WorkItem) -> Option<WorkItem> {
        let now = Instant::now();
        match &item.key {
            WorkKey::Check(key) => {
                self.index.get(key)?;
                Some(item.follow_up(now, now + self.check_delay(key), 0))
            }
            WorkKey::Dns(host) => {
                if !self.dns.contains(host) {
                    return None;
                }
                self.dns.mark_queued(host);
                Some(item.follow_up(now, now + self.dns.config().retry_delay(), 0))
            }
        }
    }
}
