//! Metrics collection and exposition.
//!
//! # Metrics
//! - `checkd_pool_workers` (gauge): live worker tasks
//! - `checkd_pool_idle` (gauge): workers parked on the queue
//! - `checkd_queue_depth` (gauge): pending work items
//! - `checkd_queue_ready` (gauge): pending items already due
//! - `checkd_off_schedule_total` (counter): items dispatched after their tolerance
//! - `checkd_checks_total` (counter): probes by check type and reason
//! - `checkd_check_duration_seconds` (histogram): probe round-trip time
//! - `checkd_check_health` (gauge): 1=up, 0=down, -1=flapping
//! - `checkd_dns_lookups_total` (counter): lookups by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter serves its own HTTP listener

use crate::check::{CheckKey, Health, Reason};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_pool(workers: usize, idle: usize) {
    gauge!("checkd_pool_workers").set(workers as f64);
    gauge!("checkd_pool_idle").set(idle as f64);
}

pub fn record_queue(depth: usize, ready: usize, late: u64) {
    gauge!("checkd_queue_depth").set(depth as f64);
    gauge!("checkd_queue_ready").set(ready as f64);
    counter!("checkd_off_schedule_total").increment(late);
}

pub fn record_check(key: &CheckKey, reason: Reason, rtt: Duration) {
    counter!(
        "checkd_checks_total",
        "check_type" => key.check_type.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
    histogram!("checkd_check_duration_seconds", "check_type" => key.check_type.as_str())
        .record(rtt.as_secs_f64());
}

pub fn record_health(key: &CheckKey, health: Health) {
    gauge!(
        "checkd_check_health",
        "address" => key.address.to_string(),
        "port" => key.port.to_string(),
        "check_type" => key.check_type.as_str()
    )
    .set(health.gauge());
}

pub fn record_dns_lookup(outcome: &'static str) {
    counter!("checkd_dns_lookups_total", "outcome" => outcome).increment(1);
}
