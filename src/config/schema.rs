//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use crate::check::{CheckParams, CheckTarget, CheckType, DualStack, HostGroup, ParamOverrides};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration for the health-checking daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Worker pool and queue settings.
    pub scheduler: SchedulerConfig,

    /// DNS cache settings.
    pub dns: DnsConfig,

    /// Check parameters applied to groups that omit them.
    pub defaults: CheckParams,

    /// Host group definitions.
    pub host_groups: Vec<HostGroupConfig>,

    /// Result store settings.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl DaemonConfig {
    /// Materialize the host groups with their effective parameters.
    pub fn groups(&self) -> Vec<HostGroup> {
        self.host_groups
            .iter()
            .map(|group| group.to_host_group(&self.defaults))
            .collect()
    }
}

/// Worker pool and queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum worker count.
    pub min_threads: usize,

    /// Maximum worker count.
    pub max_threads: usize,

    /// Ready items per worker above which the pool grows.
    pub work_per_thread_ratio: u64,

    /// Resize step as a percentage of the current size.
    pub stride_percent: u64,

    /// Monitor interval in seconds.
    pub monitor_frequency_secs: u64,

    /// Lateness tolerance as a percentage of an item's interval.
    pub ttl_threshold_percent: u64,

    /// Replace workers after `recycle_after` dispatches.
    pub recycle: bool,

    pub recycle_after: u64,

    /// Consecutive idle monitor ticks required before shrinking.
    pub shrink_confidence: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_threads: 2,
            max_threads: 64,
            work_per_thread_ratio: 10,
            stride_percent: 10,
            monitor_frequency_secs: 2,
            ttl_threshold_percent: 10,
            recycle: false,
            recycle_after: 10_000,
            shrink_confidence: 3,
        }
    }
}

/// A hostname served from fixed addresses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StaticHost {
    pub host: String,
    pub addresses: Vec<String>,
}

/// DNS cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DnsConfig {
    /// Address set lifetime in seconds.
    pub ttl_secs: u64,

    /// Lookup timeout in seconds.
    pub timeout_secs: u64,

    /// Retries before a failing lookup is given up until the next TTL.
    pub retries: u32,

    pub retry_delay_secs: u64,

    #[serde(rename = "static")]
    pub static_hosts: Vec<StaticHost>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 360,
            timeout_secs: 60,
            retries: 3,
            retry_delay_secs: 5,
            static_hosts: Vec::new(),
        }
    }
}

impl DnsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Host group configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HostGroupConfig {
    /// Unique group name.
    pub name: String,

    /// Member hostnames or IP literals.
    pub hosts: Vec<String>,

    pub check_type: CheckType,

    /// Port to probe; defaults to the check type's well-known port.
    #[serde(default)]
    pub port: Option<u16>,

    /// HTTP path or DNS name, depending on the check type.
    #[serde(default)]
    pub check_info: Option<String>,

    #[serde(default)]
    pub dual_stack: DualStack,

    /// Overrides layered on `[defaults]`.
    #[serde(default, flatten)]
    pub params: ParamOverrides,
}

impl HostGroupConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.check_type.default_port())
    }

    pub fn to_host_group(&self, defaults: &CheckParams) -> HostGroup {
        HostGroup {
            name: self.name.clone(),
            hosts: self.hosts.clone(),
            target: CheckTarget::new(self.check_type, self.port(), self.check_info.clone()),
            dual_stack: self.dual_stack,
            params: Arc::new(self.params.apply(defaults)),
        }
    }
}

/// Result store backend.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    File,
}

/// Result store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,

    /// Snapshot path for the file store.
    pub path: String,

    /// Seconds between file store flushes.
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: "checkd-results.json".to_string(),
            flush_interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
