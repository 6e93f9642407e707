//! The health-checking daemon.
//!
//! # Data Flow
//! ```text
//! DaemonConfig ──apply_config──► GroupTable ──► CheckIndex ◄── DnsCache
//!                                                   │
//!                                              reconcile diff
//!                                                   ▼
//!                  WorkerPool ◄── next() ── WorkQueue ◄── follow-ups
//!                      │                                      ▲
//!                      └──► Engine (checks, DNS lookups) ─────┘
//!                                 │
//!                                 ▼
//!                            ResultStore
//! ```
//!
//! # Design Decisions
//! - Config changes are applied by diffing; untouched keys keep their state
//! - A rejected config leaves the running one in place
//! - Background tasks stop on the shared shutdown flag

pub mod engine;

pub use engine::{Engine, ForceTarget};

use crate::check::{CheckKey, GroupHealth};
use crate::config::{load_config, validate_config, ConfigError, DaemonConfig};
use crate::dns::{DnsCache, DnsEntryView, Resolve};
use crate::executor::Execute;
use crate::index::{CheckIndex, CheckView, GroupTable};
use crate::lifecycle::Shutdown;
use crate::pool::{PoolMonitor, PoolStats, WorkerPool};
use crate::queue::{WorkKey, WorkQueue};
use crate::storage::{ResultStore, StoreError};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("daemon already started")]
    AlreadyStarted,
}

/// Outcome of applying a configuration.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReloadSummary {
    pub generation: u64,
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub off_schedule: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub generation: u64,
    pub uptime_secs: u64,
    pub pool: PoolStats,
    pub queue: QueueStatus,
    pub checks: usize,
    pub groups: usize,
    pub healthy_groups: usize,
    pub dns_entries: usize,
}

/// A check with its next scheduled run.
#[derive(Debug, Clone, Serialize)]
pub struct CheckListing {
    #[serde(flatten)]
    pub view: CheckView,
    pub next_check_ms: Option<u64>,
}

pub struct Daemon {
    config: ArcSwap<DaemonConfig>,
    queue: Arc<WorkQueue>,
    dns: Arc<DnsCache>,
    index: Arc<CheckIndex>,
    store: Arc<dyn ResultStore>,
    engine: Arc<Engine>,
    pool: Arc<WorkerPool>,
    shutdown: Shutdown,
    generation: AtomicU64,
    started: AtomicBool,
    started_at: Instant,
    apply_lock: Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    /// Build a daemon around a validated configuration. Nothing runs until
    /// [`Daemon::start`].
    pub fn new(
        config: DaemonConfig,
        store: Arc<dyn ResultStore>,
        executor: Arc<dyn Execute>,
        resolver: Arc<dyn Resolve>,
    ) -> Result<Arc<Self>, DaemonError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let queue = Arc::new(WorkQueue::new(config.scheduler.ttl_threshold_percent));
        let dns = Arc::new(DnsCache::new(config.dns.clone()));
        let index = Arc::new(CheckIndex::new());
        let engine = Arc::new(Engine::new(
            queue.clone(),
            dns.clone(),
            index.clone(),
            store.clone(),
            executor,
            resolver,
        ));
        let pool = WorkerPool::new(queue.clone(), engine.clone(), config.scheduler.clone());

        Ok(Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            queue,
            dns,
            index,
            store,
            engine,
            pool,
            shutdown: Shutdown::new(),
            generation: AtomicU64::new(0),
            started: AtomicBool::new(false),
            started_at: Instant::now(),
            apply_lock: Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Warm-load prior results, schedule every configured check and start
    /// the workers, the pool monitor and the store flusher.
    pub fn start(self: &Arc<Self>) -> Result<ReloadSummary, DaemonError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DaemonError::AlreadyStarted);
        }

        self.engine.load_warm_results();
        let config = DaemonConfig::clone(&self.config.load());
        let summary = self.apply_config(config)?;

        self.pool.start();

        let monitor = PoolMonitor::new(self.pool.clone(), self.queue.clone());
        let monitor_task = tokio::spawn(monitor.run(self.shutdown.subscribe()));
        let flush_task = self.spawn_flusher();

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(monitor_task);
        tasks.push(flush_task);

        tracing::info!(
            checks = self.index.len(),
            hosts = self.dns.len(),
            workers = self.pool.size(),
            "Daemon started"
        );
        Ok(summary)
    }

    fn spawn_flusher(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let every = Duration::from_secs(self.config.load().storage.flush_interval_secs.max(1));
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let store = store.clone();
                        match tokio::task::spawn_blocking(move || store.flush()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!(error = %e, "Periodic result flush failed"),
                            Err(e) => tracing::error!(error = %e, "Flush task panicked"),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Apply a configuration by diffing it against the running one.
    pub fn apply_config(&self, config: DaemonConfig) -> Result<ReloadSummary, DaemonError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        self.queue
            .set_ttl_threshold_percent(config.scheduler.ttl_threshold_percent);
        self.pool.set_config(config.scheduler.clone());
        self.dns.set_config(config.dns.clone());

        let table = GroupTable::build(config.groups());
        let wanted = table.hostnames();
        let statics: HashMap<&str, Vec<IpAddr>> = config
            .dns
            .static_hosts
            .iter()
            .map(|s| {
                let addrs = s.addresses.iter().filter_map(|a| a.parse().ok()).collect();
                (s.host.as_str(), addrs)
            })
            .collect();

        for host in self.dns.hostnames() {
            if !wanted.contains_key(&host) {
                self.dns.remove(&host);
                self.queue.remove(&WorkKey::Dns(host.clone()));
                tracing::info!(host = %host, "Host no longer referenced");
            }
        }

        for (host, family) in &wanted {
            if let Some(addrs) = statics.get(host.as_str()) {
                self.dns.register_static(host, addrs, now);
            } else if let Ok(ip) = host.parse::<IpAddr>() {
                self.dns.register_static(host, &[ip], now);
            } else if self.dns.register(host, *family) {
                tracing::debug!(host = %host, "Host registered");
            }
        }

        self.index.install(table);
        let diff = self.engine.reconcile(now);

        for host in self.dns.expired(now) {
            self.dns.schedule_lookup(&host, &self.queue, now);
        }

        self.config.store(Arc::new(config));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let summary = ReloadSummary {
            generation,
            added: diff.added.len(),
            removed: diff.removed.len(),
            updated: diff.updated.len(),
        };
        tracing::info!(
            generation,
            added = summary.added,
            removed = summary.removed,
            updated = summary.updated,
            "Configuration applied"
        );
        Ok(summary)
    }

    /// Re-read the config file and apply it.
    pub fn reload_from(&self, path: &Path) -> Result<ReloadSummary, DaemonError> {
        let config = load_config(path)?;
        self.apply_config(config)
    }

    /// Stop the workers and background tasks, then flush the store.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        self.pool.stop().await;

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        if let Err(e) = self.store.flush() {
            tracing::error!(error = %e, "Final result flush failed");
        }
        tracing::info!("Daemon stopped");
    }

    pub fn status(&self) -> DaemonStatus {
        let groups = self.index.all_group_health();
        DaemonStatus {
            generation: self.generation.load(Ordering::Acquire),
            uptime_secs: self.started_at.elapsed().as_secs(),
            pool: self.pool.stats(),
            queue: QueueStatus {
                depth: self.queue.size(),
                ready: self.queue.ready_count(),
                in_flight: self.queue.in_flight_count(),
                off_schedule: self.queue.off_schedule_count(),
            },
            checks: self.index.len(),
            groups: groups.len(),
            healthy_groups: groups.iter().filter(|g| g.healthy).count(),
            dns_entries: self.dns.len(),
        }
    }

    pub fn group_health(&self) -> Vec<GroupHealth> {
        self.index.all_group_health()
    }

    pub fn checks(&self) -> Vec<CheckListing> {
        let now = Instant::now();
        self.index
            .views()
            .into_iter()
            .map(|view| {
                let next_check_ms = self
                    .queue
                    .scheduled_at(&WorkKey::Check(view.key.clone()))
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64);
                CheckListing { view, next_check_ms }
            })
            .collect()
    }

    pub fn dns_entries(&self) -> Vec<DnsEntryView> {
        self.dns.snapshot(Instant::now())
    }

    /// Force every key of a host or address DOWN, or release it.
    pub fn force(&self, target: &ForceTarget, down: bool) -> Vec<CheckKey> {
        self.engine.force(target, down)
    }

    pub fn config(&self) -> Arc<DaemonConfig> {
        self.config.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn dns(&self) -> &Arc<DnsCache> {
        &self.dns
    }

    pub fn index(&self) -> &Arc<CheckIndex> {
        &self.index
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }
}
