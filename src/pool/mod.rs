//! Worker pool.
//!
//! # Data Flow
//! ```text
//! WorkQueue::next ─→ worker task ─→ WorkHandler::run ─→ follow-up item
//!        ↑                                                   │
//!        └────────────── WorkQueue::complete ←───────────────┘
//!
//! PoolMonitor (monitor.rs), every monitor_frequency:
//!     LoadSample → ResizePlanner → WorkerPool::resize(target)
//! ```
//!
//! # Design Decisions
//! - Workers are tokio tasks; the pool size is a target counter, not a lock
//! - Shrinking never interrupts work: surplus workers retire at their next poll
//! - A panicking handler is caught per item; a crashed worker is respawned

pub mod monitor;

pub use monitor::{LoadSample, PoolMonitor, ResizePlanner};

use crate::config::SchedulerConfig;
use crate::queue::{Next, WorkItem, WorkQueue};
use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Executes dequeued work.
pub trait WorkHandler: Send + Sync + 'static {
    /// Run one item and return its follow-up, if the work stream continues.
    fn run(&self, item: WorkItem) -> BoxFuture<'_, Option<WorkItem>>;

    /// Follow-up for an item whose handler panicked.
    fn recover(&self, item: &WorkItem) -> Option<WorkItem>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Retired,
    Recycled,
    Shutdown,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub target: usize,
    pub idle: usize,
    pub dispatched: u64,
    pub respawned: u64,
}

/// Dynamically sized set of worker tasks draining one [`WorkQueue`].
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    handler: Arc<dyn WorkHandler>,
    config: ArcSwap<SchedulerConfig>,
    target: AtomicUsize,
    live: AtomicUsize,
    idle: AtomicUsize,
    next_id: AtomicU64,
    dispatched: AtomicU64,
    respawned: AtomicU64,
    stopping: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<WorkQueue>, handler: Arc<dyn WorkHandler>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            queue,
            handler,
            config: ArcSwap::from_pointee(config),
            target: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            respawned: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the initial `min_threads` workers.
    pub fn start(self: &Arc<Self>) {
        let min = self.config.load().min_threads;
        tracing::info!(workers = min, "Worker pool starting");
        self.resize(min);
    }

    pub fn config(&self) -> Arc<SchedulerConfig> {
        self.config.load_full()
    }

    /// Swap scheduler settings and re-clamp the current target.
    pub fn set_config(self: &Arc<Self>, config: SchedulerConfig) {
        self.config.store(Arc::new(config));
        let current = self.target.load(Ordering::Acquire);
        if current > 0 {
            self.resize(current);
        }
    }

    pub fn size(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.size(),
            target: self.target(),
            idle: self.idle(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            respawned: self.respawned.load(Ordering::Relaxed),
        }
    }

    /// Set the desired worker count, clamped to `[min_threads, max_threads]`.
    ///
    /// Growth spawns workers immediately; shrinking wakes parked workers so
    /// the surplus retires. Returns the clamped target.
    pub fn resize(self: &Arc<Self>, target: usize) -> usize {
        let config = self.config.load();
        let target = target.clamp(config.min_threads, config.max_threads.max(config.min_threads));
        self.target.store(target, Ordering::Release);

        if self.stopping.load(Ordering::Acquire) {
            return target;
        }

        let live = self.live.load(Ordering::Acquire);
        if target > live {
            for _ in live..target {
                self.spawn_worker();
            }
        } else if target < live {
            self.queue.cycle_waiters();
        }
        target
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::AcqRel);

        let pool = self.clone();
        let handle = tokio::spawn(async move {
            let exit = AssertUnwindSafe(pool.clone().worker_loop(id)).catch_unwind().await;
            match exit {
                Ok(WorkerExit::Retired) => {
                    tracing::debug!(worker = id, "Worker retired");
                }
                Ok(WorkerExit::Shutdown) => {
                    pool.live.fetch_sub(1, Ordering::AcqRel);
                }
                Ok(WorkerExit::Recycled) => {
                    pool.live.fetch_sub(1, Ordering::AcqRel);
                    tracing::debug!(worker = id, "Worker recycled");
                    pool.replace_worker();
                }
                Err(_) => {
                    pool.live.fetch_sub(1, Ordering::AcqRel);
                    tracing::error!(worker = id, "Worker crashed, respawning");
                    pool.respawned.fetch_add(1, Ordering::Relaxed);
                    pool.replace_worker();
                }
            }
        });

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    fn replace_worker(self: &Arc<Self>) {
        if !self.stopping.load(Ordering::Acquire) && self.size() < self.target() {
            self.spawn_worker();
        }
    }

    /// Give up one worker slot if the pool is above target.
    fn try_retire(&self) -> bool {
        let target = self.target.load(Ordering::Acquire);
        let mut live = self.live.load(Ordering::Acquire);
        while live > target {
            match self
                .live
                .compare_exchange(live, live - 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
        false
    }

    async fn worker_loop(self: Arc<Self>, id: u64) -> WorkerExit {
        tracing::debug!(worker = id, "Worker started");
        let mut served: u64 = 0;

        loop {
            if self.stopping.load(Ordering::Acquire) {
                return WorkerExit::Shutdown;
            }
            if self.try_retire() {
                return WorkerExit::Retired;
            }
            let recycle = {
                let config = self.config.load();
                config.recycle && served >= config.recycle_after
            };
            if recycle {
                return WorkerExit::Recycled;
            }

            self.idle.fetch_add(1, Ordering::AcqRel);
            let next = self.queue.next().await;
            self.idle.fetch_sub(1, Ordering::AcqRel);

            let item = match next {
                Next::Work(item) => item,
                Next::Cycled => continue,
                Next::Shutdown => return WorkerExit::Shutdown,
            };

            served += 1;
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            let key = item.key.clone();

            let follow_up = match AssertUnwindSafe(self.handler.run(item.clone())).catch_unwind().await {
                Ok(follow_up) => follow_up,
                Err(_) => {
                    tracing::error!(worker = id, key = %key, "Work handler panicked");
                    self.handler.recover(&item)
                }
            };
            self.queue.complete(&key, follow_up);
        }
    }

    /// Stop all workers. In-flight items finish; pending items stay queued.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.queue.shutdown();

        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
                guard.drain(..).collect()
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
        tracing::info!("Worker pool stopped");
    }
}
