//! Host group table: which hostnames are probed how, and for whom.

use crate::check::{CheckKey, CheckParams, CheckTarget, DualStack, HostGroup};
use crate::dns::DnsCache;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

/// One (hostname, target) pair and the groups interested in it.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub hostname: String,
    pub target: CheckTarget,
    pub dual_stack: DualStack,
    /// Parameters of the first group (in config order) naming this pair.
    pub params: Arc<CheckParams>,
    pub groups: Vec<String>,
}

/// Check keys wanted for the current DNS state.
#[derive(Debug, Clone)]
pub struct Desired {
    pub hosts: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub params: Arc<CheckParams>,
}

/// Immutable view of the configured host groups, deduplicated by target.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: Vec<HostGroup>,
    subscriptions: Vec<Subscription>,
}

impl GroupTable {
    pub fn build(groups: Vec<HostGroup>) -> Self {
        let mut subscriptions: Vec<Subscription> = Vec::new();
        let mut positions: HashMap<(String, CheckTarget), usize> = HashMap::new();

        for group in &groups {
            for host in &group.hosts {
                let pair = (host.clone(), group.target.clone());
                match positions.get(&pair) {
                    Some(&pos) => {
                        let sub = &mut subscriptions[pos];
                        if *sub.params != *group.params {
                            tracing::warn!(
                                host = %host,
                                group = %group.name,
                                governing_group = %sub.groups[0],
                                "Shared check has differing parameters; first group wins"
                            );
                        }
                        sub.dual_stack = sub.dual_stack.merge(group.dual_stack);
                        if !sub.groups.contains(&group.name) {
                            sub.groups.push(group.name.clone());
                        }
                    }
                    None => {
                        positions.insert(pair, subscriptions.len());
                        subscriptions.push(Subscription {
                            hostname: host.clone(),
                            target: group.target.clone(),
                            dual_stack: group.dual_stack,
                            params: group.params.clone(),
                            groups: vec![group.name.clone()],
                        });
                    }
                }
            }
        }

        Self { groups, subscriptions }
    }

    pub fn groups(&self) -> &[HostGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&HostGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Every hostname with the union of the address families wanted for it.
    pub fn hostnames(&self) -> BTreeMap<String, DualStack> {
        let mut hosts: BTreeMap<String, DualStack> = BTreeMap::new();
        for sub in &self.subscriptions {
            hosts
                .entry(sub.hostname.clone())
                .and_modify(|family| *family = family.merge(sub.dual_stack))
                .or_insert(sub.dual_stack);
        }
        hosts
    }

    /// Resolve subscriptions through the DNS cache into check keys.
    pub fn desired(&self, dns: &DnsCache, now: Instant) -> BTreeMap<CheckKey, Desired> {
        let mut desired: BTreeMap<CheckKey, Desired> = BTreeMap::new();
        for sub in &self.subscriptions {
            let Some(set) = dns.get_addresses(&sub.hostname, now) else {
                continue;
            };
            for addr in set.addresses.iter().filter(|a| sub.dual_stack.accepts(a)) {
                let key = CheckKey::new(*addr, &sub.target);
                let entry = desired.entry(key).or_insert_with(|| Desired {
                    hosts: BTreeSet::new(),
                    groups: BTreeSet::new(),
                    params: sub.params.clone(),
                });
                entry.hosts.insert(sub.hostname.clone());
                entry.groups.extend(sub.groups.iter().cloned());
            }
        }
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckType;

    fn group(name: &str, hosts: &[&str], target: CheckTarget, ttl_ms: u64) -> HostGroup {
        HostGroup {
            name: name.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            target,
            dual_stack: DualStack::V4,
            params: Arc::new(CheckParams {
                ttl_ms,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_shared_pairs_are_deduplicated() {
        let https = CheckTarget::new(CheckType::Http, 443, None);
        let table = GroupTable::build(vec![
            group("frontend", &["a.example.com", "b.example.com"], https.clone(), 10_000),
            group("canary", &["a.example.com"], https.clone(), 20_000),
            group("ssh", &["a.example.com"], CheckTarget::new(CheckType::Tcp, 22, None), 10_000),
        ]);

        assert_eq!(table.subscriptions().len(), 3);
        let shared = &table.subscriptions()[0];
        assert_eq!(shared.groups, vec!["frontend", "canary"]);
        assert_eq!(shared.params.ttl_ms, 10_000);
        assert_eq!(table.hostnames().len(), 2);
    }
}
