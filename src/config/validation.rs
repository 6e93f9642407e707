//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, fractions in [0, 1])
//! - Detect duplicate host groups
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::check::CheckParams;
use crate::config::schema::DaemonConfig;
use std::collections::HashSet;
use std::net::IpAddr;
use thiserror::Error;

/// Longest accepted check interval or timeout (30 days).
pub const MAX_INTERVAL_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Largest accepted `flap_backoff` multiplier.
pub const MAX_FLAP_BACKOFF: u32 = 100;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("host group #{index} has an empty name")]
    EmptyGroupName { index: usize },

    #[error("host group '{0}' is defined more than once")]
    DuplicateGroup(String),

    #[error("host group '{0}' has no hosts")]
    EmptyHostList(String),

    #[error("host group '{0}' contains an empty host name")]
    EmptyHostName(String),

    #[error("host group '{group}' needs a non-zero port for {check_type} checks")]
    MissingPort { group: String, check_type: String },

    #[error("scheduler.min_threads must be at least 1")]
    ZeroMinThreads,

    #[error("scheduler.min_threads ({min}) exceeds scheduler.max_threads ({max})")]
    ThreadBounds { min: usize, max: usize },

    #[error("scheduler.work_per_thread_ratio must be at least 1")]
    ZeroWorkRatio,

    #[error("{scope}: ttl must be greater than zero")]
    ZeroTtl { scope: String },

    #[error("{scope}: timeout must be greater than zero")]
    ZeroTimeout { scope: String },

    #[error("{scope}: timeout ({timeout_ms}ms) exceeds ttl ({ttl_ms}ms)")]
    TimeoutExceedsTtl { scope: String, timeout_ms: u64, ttl_ms: u64 },

    #[error("{scope}: {field} must be between 0 and 1, got {value}")]
    FractionOutOfRange { scope: String, field: &'static str, value: f64 },

    #[error("{scope}: smoothing_window must be at least 1")]
    ZeroSmoothingWindow { scope: String },

    #[error("{scope}: flap_backoff must be at least 2")]
    FlapBackoffTooSmall { scope: String },

    #[error("{scope}: flap_backoff must be at most {max}")]
    FlapBackoffTooLarge { scope: String, max: u32 },

    #[error("{scope}: {field} ({value_ms}ms) exceeds the {max_ms}ms limit")]
    IntervalTooLarge { scope: String, field: &'static str, value_ms: u64, max_ms: u64 },

    #[error("dns: ttl_secs must be greater than zero")]
    ZeroDnsTtl,

    #[error("dns static entry '{host}' has invalid address '{address}'")]
    InvalidStaticAddress { host: String, address: String },
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let scheduler = &config.scheduler;
    if scheduler.min_threads == 0 {
        errors.push(ValidationError::ZeroMinThreads);
    }
    if scheduler.min_threads > scheduler.max_threads {
        errors.push(ValidationError::ThreadBounds {
            min: scheduler.min_threads,
            max: scheduler.max_threads,
        });
    }
    if scheduler.work_per_thread_ratio == 0 {
        errors.push(ValidationError::ZeroWorkRatio);
    }

    if config.dns.ttl_secs == 0 {
        errors.push(ValidationError::ZeroDnsTtl);
    }
    for (field, secs) in [
        ("ttl_secs", config.dns.ttl_secs),
        ("timeout_secs", config.dns.timeout_secs),
        ("retry_delay_secs", config.dns.retry_delay_secs),
    ] {
        let value_ms = secs.saturating_mul(1000);
        if value_ms > MAX_INTERVAL_MS {
            errors.push(ValidationError::IntervalTooLarge {
                scope: "dns".to_string(),
                field,
                value_ms,
                max_ms: MAX_INTERVAL_MS,
            });
        }
    }
    for entry in &config.dns.static_hosts {
        for address in &entry.addresses {
            if address.parse::<IpAddr>().is_err() {
                errors.push(ValidationError::InvalidStaticAddress {
                    host: entry.host.clone(),
                    address: address.clone(),
                });
            }
        }
    }

    validate_params("defaults", &config.defaults, &mut errors);

    let mut seen = HashSet::new();
    for (index, group) in config.host_groups.iter().enumerate() {
        if group.name.trim().is_empty() {
            errors.push(ValidationError::EmptyGroupName { index });
        } else if !seen.insert(group.name.as_str()) {
            errors.push(ValidationError::DuplicateGroup(group.name.clone()));
        }

        if group.hosts.is_empty() {
            errors.push(ValidationError::EmptyHostList(group.name.clone()));
        }
        if group.hosts.iter().any(|h| h.trim().is_empty()) {
            errors.push(ValidationError::EmptyHostName(group.name.clone()));
        }
        if group.check_type.uses_port() && group.port() == 0 {
            errors.push(ValidationError::MissingPort {
                group: group.name.clone(),
                check_type: group.check_type.to_string(),
            });
        }

        let params = group.params.apply(&config.defaults);
        validate_params(&format!("host group '{}'", group.name), &params, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_params(scope: &str, params: &CheckParams, errors: &mut Vec<ValidationError>) {
    if params.ttl_ms == 0 {
        errors.push(ValidationError::ZeroTtl { scope: scope.to_string() });
    }
    if params.timeout_ms == 0 {
        errors.push(ValidationError::ZeroTimeout { scope: scope.to_string() });
    }
    if params.ttl_ms > 0 && params.timeout_ms > params.ttl_ms {
        errors.push(ValidationError::TimeoutExceedsTtl {
            scope: scope.to_string(),
            timeout_ms: params.timeout_ms,
            ttl_ms: params.ttl_ms,
        });
    }
    for (field, value) in [
        ("flap_threshold", params.flap_threshold),
        ("group_threshold", params.group_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::FractionOutOfRange {
                scope: scope.to_string(),
                field,
                value,
            });
        }
    }
    if params.smoothing_window == 0 {
        errors.push(ValidationError::ZeroSmoothingWindow { scope: scope.to_string() });
    }
    if params.flap_backoff < 2 {
        errors.push(ValidationError::FlapBackoffTooSmall { scope: scope.to_string() });
    } else if params.flap_backoff > MAX_FLAP_BACKOFF {
        errors.push(ValidationError::FlapBackoffTooLarge {
            scope: scope.to_string(),
            max: MAX_FLAP_BACKOFF,
        });
    }
    for (field, value_ms) in [
        ("ttl_ms", params.ttl_ms),
        ("timeout_ms", params.timeout_ms),
        ("retry_delay_ms", params.retry_delay_ms),
        ("flap_window_ms", params.flap_window_ms),
        ("slow_threshold_ms", params.slow_threshold_ms),
    ] {
        if value_ms > MAX_INTERVAL_MS {
            errors.push(ValidationError::IntervalTooLarge {
                scope: scope.to_string(),
                field,
                value_ms,
                max_ms: MAX_INTERVAL_MS,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckType, ParamOverrides};
    use crate::config::schema::{HostGroupConfig, StaticHost};

    fn group(name: &str, hosts: &[&str]) -> HostGroupConfig {
        HostGroupConfig {
            name: name.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            check_type: CheckType::Tcp,
            port: Some(443),
            check_info: None,
            dual_stack: Default::default(),
            params: ParamOverrides::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = DaemonConfig::default();
        config.host_groups.push(group("web", &["a.example.com"]));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = DaemonConfig::default();
        config.scheduler.min_threads = 0;
        config.host_groups.push(group("web", &["a.example.com"]));
        config.host_groups.push(group("web", &[]));
        let mut bad = group("", &["", "b"]);
        bad.port = None;
        bad.params.group_threshold = Some(1.5);
        config.host_groups.push(bad);
        config.dns.static_hosts.push(StaticHost {
            host: "db".into(),
            addresses: vec!["not-an-ip".into()],
        });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroMinThreads));
        assert!(errors.contains(&ValidationError::DuplicateGroup("web".into())));
        assert!(errors.contains(&ValidationError::EmptyHostList("web".into())));
        assert!(errors.contains(&ValidationError::EmptyGroupName { index: 2 }));
        assert!(errors.contains(&ValidationError::EmptyHostName(String::new())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::MissingPort { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::FractionOutOfRange { field: "group_threshold", .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidStaticAddress { .. })));
    }

    #[test]
    fn test_timeout_must_fit_in_ttl() {
        let mut config = DaemonConfig::default();
        let mut g = group("web", &["a"]);
        g.params.timeout_ms = Some(60_000);
        config.host_groups.push(g);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::TimeoutExceedsTtl { .. }));
    }

    #[test]
    fn test_rejects_extreme_intervals() {
        let mut config = DaemonConfig::default();
        let mut g = group("web", &["a"]);
        g.params.ttl_ms = Some(u64::MAX);
        g.params.flap_backoff = Some(u32::MAX);
        config.host_groups.push(g);
        config.dns.retry_delay_secs = u64::MAX;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::IntervalTooLarge { field: "ttl_ms", .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::IntervalTooLarge { field: "retry_delay_secs", .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::FlapBackoffTooLarge { .. })));
    }
}
