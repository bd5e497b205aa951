//! Domain write-ownership table.

use crate::model::ids::DomainName;
use std::collections::BTreeMap;

/// Who may write one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainOwner {
    /// Exactly one agent writes.
    Agent(String),
    /// Any configured agent writes.
    Shared,
}

/// Static domain -> owner mapping built at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipTable {
    domains: BTreeMap<DomainName, DomainOwner>,
}

impl OwnershipTable {
    pub fn new(domains: BTreeMap<DomainName, DomainOwner>) -> Self {
        Self { domains }
    }

    /// Returns `None` for unknown domains.
    pub fn owner(&self, domain: &str) -> Option<&DomainOwner> {
        self.domains.get(domain)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    /// Domain names in ascending order.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    /// Whether `agent` passes the single-writer check for `domain`.
    pub fn may_write(&self, agent: &str, domain: &str) -> bool {
        match self.domains.get(domain) {
            Some(DomainOwner::Agent(owner)) => owner == agent,
            Some(DomainOwner::Shared) => true,
            None => false,
        }
    }

    /// Domains exclusively owned by `agent`.
    pub fn owned_by(&self, agent: &str) -> Vec<&str> {
        self.domains
            .iter()
            .filter_map(|(name, owner)| match owner {
                DomainOwner::Agent(owner) if owner == agent => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}
