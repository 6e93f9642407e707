//! TTL-ordered work queue.

use crate::queue::item::{WorkItem, WorkKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Dispatches between queue latency log lines.
const LATENCY_SAMPLE: u64 = 1000;

/// Outcome of [`WorkQueue::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Queued,
    /// An item with the same key is already pending.
    AlreadyQueued,
    /// An item with the same key is being executed.
    InFlight,
    ShutDown,
}

/// Outcome of [`WorkQueue::next`].
#[derive(Debug)]
pub enum Next {
    Work(WorkItem),
    /// Waiters were woken so they can re-check pool membership.
    Cycled,
    Shutdown,
}

type Slot = (Instant, u64);

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<Slot, WorkItem>,
    index: HashMap<WorkKey, Slot>,
    in_flight: HashSet<WorkKey>,
    seq: u64,
    latency_total: Duration,
    latency_samples: u64,
}

impl QueueState {
    fn insert(&mut self, item: WorkItem) -> Insert {
        if self.in_flight.contains(&item.key) {
            return Insert::InFlight;
        }
        if self.index.contains_key(&item.key) {
            return Insert::AlreadyQueued;
        }
        let slot = (item.scheduled, self.seq);
        self.seq += 1;
        self.index.insert(item.key.clone(), slot);
        self.pending.insert(slot, item);
        Insert::Queued
    }

    /// Remove the earliest ready item whose key is not in flight, or return
    /// the deadline of the next item that is not yet ready.
    fn take_ready(&mut self, now: Instant) -> Result<WorkItem, Option<Instant>> {
        let mut found = None;
        let mut deadline = None;
        for (slot, item) in self.pending.iter() {
            if slot.0 > now {
                deadline = Some(slot.0);
                break;
            }
            if !self.in_flight.contains(&item.key) {
                found = Some(*slot);
                break;
            }
        }

        match found.and_then(|slot| self.pending.remove(&slot)) {
            Some(item) => {
                self.index.remove(&item.key);
                self.in_flight.insert(item.key.clone());
                Ok(item)
            }
            None => Err(deadline),
        }
    }

    fn has_ready(&self, now: Instant) -> bool {
        self.pending
            .iter()
            .take_while(|(slot, _)| slot.0 <= now)
            .any(|(_, item)| !self.in_flight.contains(&item.key))
    }
}

/// Pending work ordered by scheduled time, FIFO among equal times.
///
/// Each key is either pending, in flight, or absent. Workers park in
/// [`next`](WorkQueue::next) until the earliest deadline passes or an
/// insert, cycle or shutdown wakes them.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: AtomicBool,
    generation: AtomicU64,
    late: AtomicU64,
    ttl_threshold_percent: AtomicU64,
}

impl WorkQueue {
    pub fn new(ttl_threshold_percent: u64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            late: AtomicU64::new(0),
            ttl_threshold_percent: AtomicU64::new(ttl_threshold_percent),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_ttl_threshold_percent(&self, percent: u64) {
        self.ttl_threshold_percent.store(percent, Ordering::Relaxed);
    }

    fn tolerance(&self, interval: Duration) -> Duration {
        let percent = self.ttl_threshold_percent.load(Ordering::Relaxed);
        interval.mul_f64(percent as f64 / 100.0)
    }

    /// Immediate work (zero interval) has no schedule to fall behind.
    fn is_late(&self, item: &WorkItem, lateness: Duration) -> bool {
        !item.interval.is_zero() && lateness > self.tolerance(item.interval)
    }

    /// Add an item. Rejected if its key is already pending or in flight.
    pub fn insert(&self, item: WorkItem) -> Insert {
        if self.is_shut_down() {
            return Insert::ShutDown;
        }
        let outcome = self.lock().insert(item);
        if outcome == Insert::Queued {
            self.notify.notify_one();
        }
        outcome
    }

    /// Cancel a pending item. In-flight work is left alone.
    pub fn remove(&self, key: &WorkKey) -> Option<WorkItem> {
        let mut state = self.lock();
        let slot = state.index.remove(key)?;
        state.pending.remove(&slot)
    }

    /// Release an in-flight key and atomically queue its follow-up.
    ///
    /// Follow-ups are accepted after shutdown so undispatched work stays
    /// visible.
    pub fn complete(&self, key: &WorkKey, follow_up: Option<WorkItem>) -> Option<Insert> {
        let outcome = {
            let mut state = self.lock();
            state.in_flight.remove(key);
            follow_up.map(|item| state.insert(item))
        };
        self.notify.notify_one();
        outcome
    }

    /// Take the earliest ready item, parking until one is ready.
    pub async fn next(&self) -> Next {
        let generation = self.generation.load(Ordering::Acquire);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_shut_down() {
                return Next::Shutdown;
            }
            if self.generation.load(Ordering::Acquire) != generation {
                return Next::Cycled;
            }

            let deadline = match self.try_take(Instant::now()) {
                Ok(item) => return Next::Work(item),
                Err(deadline) => deadline,
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Non-blocking variant of [`next`](WorkQueue::next).
    pub fn try_next(&self) -> Option<WorkItem> {
        if self.is_shut_down() {
            return None;
        }
        self.try_take(Instant::now()).ok()
    }

    fn try_take(&self, now: Instant) -> Result<WorkItem, Option<Instant>> {
        let (item, more) = {
            let mut state = self.lock();
            let item = state.take_ready(now)?;
            let lateness = now.saturating_duration_since(item.scheduled);
            state.latency_total += lateness;
            state.latency_samples += 1;
            if state.latency_samples >= LATENCY_SAMPLE {
                let average = state.latency_total / state.latency_samples as u32;
                tracing::info!(
                    samples = state.latency_samples,
                    average_ms = average.as_millis() as u64,
                    pending = state.pending.len(),
                    "Average queue latency"
                );
                state.latency_total = Duration::ZERO;
                state.latency_samples = 0;
            }
            (item, state.has_ready(now))
        };

        let lateness = now.saturating_duration_since(item.scheduled);
        if self.is_late(&item, lateness) {
            self.late.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                key = %item.key,
                late_ms = lateness.as_millis() as u64,
                "Work dispatched after its deadline"
            );
        }

        if more {
            self.notify.notify_one();
        }
        Ok(item)
    }

    /// Number of pending items.
    pub fn size(&self) -> usize {
        self.lock().pending.len()
    }

    /// Pending items that are already due.
    pub fn ready_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .pending
            .keys()
            .take_while(|slot| slot.0 <= now)
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Pending items overdue by more than the configured tolerance.
    pub fn off_schedule_count(&self) -> usize {
        let now = Instant::now();
        let state = self.lock();
        state
            .pending
            .iter()
            .take_while(|(slot, _)| slot.0 <= now)
            .filter(|(slot, item)| self.is_late(item, now.saturating_duration_since(slot.0)))
            .count()
    }

    /// Late dispatches since the previous call.
    pub fn take_late_dispatches(&self) -> u64 {
        self.late.swap(0, Ordering::Relaxed)
    }

    pub fn is_queued(&self, key: &WorkKey) -> bool {
        self.lock().index.contains_key(key)
    }

    pub fn is_in_flight(&self, key: &WorkKey) -> bool {
        self.lock().in_flight.contains(key)
    }

    pub fn scheduled_at(&self, key: &WorkKey) -> Option<Instant> {
        self.lock().index.get(key).map(|slot| slot.0)
    }

    /// Wake every parked worker with [`Next::Cycled`].
    pub fn cycle_waiters(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    /// Refuse new inserts and release every waiter. Pending items are kept.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::WorkKind;
    use std::sync::Arc;

    fn dns_item(host: &str, at: Instant) -> WorkItem {
        WorkItem {
            key: WorkKey::Dns(host.to_string()),
            kind: WorkKind::DnsLookup,
            scheduled: at,
            interval: Duration::from_secs(10),
            retry_count: 0,
        }
    }

    fn host_of(item: &WorkItem) -> &str {
        match &item.key {
            WorkKey::Dns(host) => host,
            WorkKey::Check(_) => "",
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_among_equal_times() {
        let queue = WorkQueue::default();
        let at = Instant::now();
        queue.insert(dns_item("b", at));
        queue.insert(dns_item("a", at));
        queue.insert(dns_item("c", at));

        let order: Vec<String> = (0..3)
            .filter_map(|_| queue.try_next())
            .map(|item| host_of(&item).to_string())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_not_ready_before_deadline() {
        let queue = WorkQueue::default();
        let start = Instant::now();
        queue.insert(dns_item("later", start + Duration::from_secs(30)));

        assert!(queue.try_next().is_none());
        assert_eq!(queue.ready_count(), 0);

        match queue.next().await {
            Next::Work(item) => assert_eq!(host_of(&item), "later"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Instant::now() >= start + Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keys_rejected() {
        let queue = WorkQueue::default();
        let now = Instant::now();
        assert_eq!(queue.insert(dns_item("a", now)), Insert::Queued);
        assert_eq!(queue.insert(dns_item("a", now)), Insert::AlreadyQueued);

        let item = queue.try_next().unwrap();
        assert_eq!(queue.insert(dns_item("a", now)), Insert::InFlight);
        assert!(queue.is_in_flight(&item.key));

        let follow_up = item.follow_up(now, now + Duration::from_secs(10), 0);
        assert_eq!(queue.complete(&item.key, Some(follow_up)), Some(Insert::Queued));
        assert!(!queue.is_in_flight(&item.key));
        assert!(queue.is_queued(&item.key));
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_pending_only() {
        let queue = WorkQueue::default();
        let now = Instant::now();
        queue.insert(dns_item("a", now));
        queue.insert(dns_item("b", now + Duration::from_secs(5)));

        let taken = queue.try_next().unwrap();
        assert!(queue.remove(&taken.key).is_none());
        assert!(queue.remove(&WorkKey::Dns("b".into())).is_some());
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_wakes_parked_worker() {
        let queue = Arc::new(WorkQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;

        queue.insert(dns_item("a", Instant::now()));
        match waiter.await.unwrap() {
            Next::Work(item) => assert_eq!(host_of(&item), "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_and_cycle_release_waiters() {
        let queue = Arc::new(WorkQueue::default());
        let cycled = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.cycle_waiters();
        assert!(matches!(cycled.await.unwrap(), Next::Cycled));

        let stopped = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert!(matches!(stopped.await.unwrap(), Next::Shutdown));
        assert_eq!(queue.insert(dns_item("a", Instant::now())), Insert::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_schedule_and_late_accounting() {
        let queue = WorkQueue::new(10);
        let start = Instant::now();
        queue.insert(dns_item("a", start));
        queue.insert(dns_item("b", start));

        // 10% of a 10s interval is 1s of tolerance.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(queue.off_schedule_count(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(queue.off_schedule_count(), 2);

        queue.try_next().unwrap();
        assert_eq!(queue.take_late_dispatches(), 1);
        assert_eq!(queue.take_late_dispatches(), 0);
        assert_eq!(queue.off_schedule_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_items_never_off_schedule() {
        let queue = WorkQueue::new(10);
        let start = Instant::now();
        for host in ["a", "b", "c", "d", "e"] {
            queue.insert(WorkItem::dns(host, start, start));
        }

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(queue.ready_count(), 5);
        assert_eq!(queue.off_schedule_count(), 0);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(queue.off_schedule_count(), 0);
        queue.try_next().unwrap();
        assert_eq!(queue.take_late_dispatches(), 0);
    }
}
