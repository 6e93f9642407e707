//! Host groups and group-level health aggregation.

use crate::check::key::{CheckKey, CheckTarget, DualStack};
use crate::check::params::CheckParams;
use crate::check::state::Health;
use serde::Serialize;
use std::sync::Arc;

/// A named set of hostnames probed with shared parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<String>,
    pub target: CheckTarget,
    pub dual_stack: DualStack,
    pub params: Arc<CheckParams>,
}

/// Health of one check key as seen by a group.
#[derive(Debug, Clone, Serialize)]
pub struct MemberHealth {
    pub key: CheckKey,
    pub health: Health,
    pub slow: bool,
}

/// Aggregated health of a host group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupHealth {
    pub name: String,
    pub total: usize,
    pub up: usize,
    pub fraction_up: f64,
    pub threshold: f64,
    pub healthy: bool,
    pub slow: Vec<CheckKey>,
    pub members: Vec<MemberHealth>,
}

impl GroupHealth {
    /// A group is up when the fraction of UP members reaches the threshold.
    /// A group without members is never up.
    pub fn aggregate(name: &str, threshold: f64, members: Vec<MemberHealth>) -> Self {
        let total = members.len();
        let up = members.iter().filter(|m| m.health.is_up()).count();
        let fraction_up = if total == 0 { 0.0 } else { up as f64 / total as f64 };
        let slow = members.iter().filter(|m| m.slow).map(|m| m.key.clone()).collect();

        Self {
            name: name.to_string(),
            total,
            up,
            fraction_up,
            threshold,
            healthy: total > 0 && fraction_up >= threshold,
            slow,
            members,
        }
    }
}
