//! Pool resize monitor.
//!
//! # Responsibilities
//! - Sample queue load and idle workers every `monitor_frequency_secs`
//! - Grow by `stride_percent` when work per worker exceeds the ratio
//! - Shrink by `stride_percent` after `shrink_confidence` idle ticks
//! - Publish pool and queue gauges

use crate::config::SchedulerConfig;
use crate::observability::metrics;
use crate::pool::WorkerPool;
use crate::queue::WorkQueue;
use std::sync::Arc;
use std::time::Duration;
use crate::lifecycle::ShutdownListener;
use tokio::time;

/// Load observed at one monitor tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSample {
    pub workers: usize,
    pub idle: usize,
    /// Pending items already due.
    pub ready: usize,
    /// Pending items overdue beyond tolerance.
    pub off_schedule: usize,
    /// Items dispatched late since the previous tick.
    pub late: u64,
}

impl LoadSample {
    pub fn backlog(&self) -> usize {
        self.ready + self.off_schedule + self.late as usize
    }
}

/// Pure resize policy, kept apart from the pool so it can be tested alone.
#[derive(Debug, Default)]
pub struct ResizePlanner {
    idle_ticks: u32,
}

impl ResizePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn stride(workers: usize, percent: u64) -> usize {
        let stride = (workers as u64 * percent).div_ceil(100);
        (stride as usize).max(1)
    }

    /// Returns the new target size, or `None` to keep the current one.
    pub fn plan(&mut self, sample: &LoadSample, config: &SchedulerConfig) -> Option<usize> {
        let min = config.min_threads;
        let max = config.max_threads.max(min);
        let workers = sample.workers;

        if workers < min || workers > max {
            self.idle_ticks = 0;
            return Some(workers.clamp(min, max));
        }

        let ratio = config.work_per_thread_ratio.max(1) as usize;
        let stride = Self::stride(workers, config.stride_percent);

        if sample.backlog() > workers * ratio {
            self.idle_ticks = 0;
            let grown = (workers + stride).min(max);
            return (grown != workers).then_some(grown);
        }

        // idle / workers > 1 / ratio
        if sample.idle * ratio > workers && sample.ready == 0 {
            self.idle_ticks += 1;
            if self.idle_ticks >= config.shrink_confidence.max(1) {
                self.idle_ticks = 0;
                let shrunk = workers.saturating_sub(stride).max(min);
                return (shrunk != workers).then_some(shrunk);
            }
            return None;
        }

        self.idle_ticks = 0;
        None
    }
}

/// Periodic control loop resizing a [`WorkerPool`].
pub struct PoolMonitor {
    pool: Arc<WorkerPool>,
    queue: Arc<WorkQueue>,
    planner: ResizePlanner,
}

impl PoolMonitor {
    pub fn new(pool: Arc<WorkerPool>, queue: Arc<WorkQueue>) -> Self {
        Self {
            pool,
            queue,
            planner: ResizePlanner::new(),
        }
    }

    fn frequency(&self) -> Duration {
        Duration::from_secs(self.pool.config().monitor_frequency_secs.max(1))
    }

    pub async fn run(mut self, mut shutdown: ShutdownListener) {
        let mut frequency = self.frequency();
        tracing::info!(frequency_secs = frequency.as_secs(), "Pool monitor starting");

        let mut ticker = time::interval(frequency);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                    let configured = self.frequency();
                    if configured != frequency {
                        frequency = configured;
                        ticker = time::interval_at(time::Instant::now() + frequency, frequency);
                        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Sample, publish gauges and apply one resize decision.
    pub fn tick(&mut self) -> Option<usize> {
        let sample = LoadSample {
            workers: self.pool.size(),
            idle: self.pool.idle(),
            ready: self.queue.ready_count(),
            off_schedule: self.queue.off_schedule_count(),
            late: self.queue.take_late_dispatches(),
        };

        metrics::record_pool(sample.workers, sample.idle);
        metrics::record_queue(self.queue.size(), sample.ready, sample.late);

        let config = self.pool.config();
        let target = self.planner.plan(&sample, &config)?;
        let applied = self.pool.resize(target);

        tracing::info!(
            from = sample.workers,
            to = applied,
            ready = sample.ready,
            off_schedule = sample.off_schedule,
            late = sample.late,
            idle = sample.idle,
            "Resizing worker pool"
        );
        Some(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            min_threads: 2,
            max_threads: 10,
            work_per_thread_ratio: 5,
            stride_percent: 50,
            shrink_confidence: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_grows_by_stride_up_to_max() {
        let cfg = config();
        let mut planner = ResizePlanner::new();
        let mut workers = 2;
        for _ in 0..10 {
            let sample = LoadSample {
                workers,
                ready: 1_000,
                ..Default::default()
            };
            if let Some(next) = planner.plan(&sample, &cfg) {
                assert!(next > workers);
                workers = next;
            }
            assert!(workers <= cfg.max_threads);
        }
        assert_eq!(workers, 10);
    }

    #[test]
    fn test_shrinks_only_after_confidence() {
        let cfg = config();
        let mut planner = ResizePlanner::new();
        let idle = LoadSample {
            workers: 8,
            idle: 8,
            ..Default::default()
        };

        assert_eq!(planner.plan(&idle, &cfg), None);
        assert_eq!(planner.plan(&idle, &cfg), Some(4));

        // A busy tick resets the confidence counter.
        let small = LoadSample { workers: 4, idle: 4, ..Default::default() };
        assert_eq!(planner.plan(&small, &cfg), None);
        let busy = LoadSample { workers: 4, idle: 0, ready: 3, ..Default::default() };
        assert_eq!(planner.plan(&busy, &cfg), None);
        assert_eq!(planner.plan(&small, &cfg), None);
        assert_eq!(planner.plan(&small, &cfg), Some(2));

        let floor = LoadSample { workers: 2, idle: 2, ..Default::default() };
        assert_eq!(planner.plan(&floor, &cfg), None);
        assert_eq!(planner.plan(&floor, &cfg), None);
    }

    #[test]
    fn test_out_of_bounds_is_clamped() {
        let cfg = config();
        let mut planner = ResizePlanner::new();
        let sample = LoadSample { workers: 40, ..Default::default() };
        assert_eq!(planner.plan(&sample, &cfg), Some(10));
        let sample = LoadSample { workers: 1, ..Default::default() };
        assert_eq!(planner.plan(&sample, &cfg), Some(2));
    }

    #[test]
    fn test_late_dispatches_count_as_load() {
        let cfg = config();
        let mut planner = ResizePlanner::new();
        let sample = LoadSample { workers: 4, late: 25, ..Default::default() };
        assert_eq!(planner.plan(&sample, &cfg), Some(6));
    }
}
