//! Cross-reference index
//!
//! Relations that a child object does not carry itself (owning cluster of a
//! host, name and clock speed of the host running a VM, display name of a
//! datastore) are resolved through tables produced by earlier passes of the
//! same cycle. Each producing pass returns a fresh table; the
//! [`CrossReferenceIndex`] keeps the latest accepted one of each kind and
//! hands them to consumers by reference.
//!
//! Lookups never fail: a missing entry resolves to a sentinel.

use std::collections::HashMap;

/// Sentinel for an unresolved cluster.
pub const NONE: &str = "none";
/// Sentinel for an unresolved host or datastore name.
pub const UNKNOWN: &str = "unknown";

/// Plain key -> value table with overwrite semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping<V> {
    entries: HashMap<String, V>,
}

impl<V> Default for Mapping<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> Mapping<V> {
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Fold `newer` into `self`; entries of `newer` win.
    pub fn merge(&mut self, newer: Mapping<V>) {
        self.entries.extend(newer.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Host id -> owning cluster name. Produced by the cluster pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMembership(Mapping<String>);

impl ClusterMembership {
    pub fn set(&mut self, host_id: impl Into<String>, cluster_name: impl Into<String>) {
        self.0.set(host_id, cluster_name.into());
    }

    pub fn get(&self, host_id: &str) -> Option<&str> {
        self.0.get(host_id).map(String::as_str)
    }

    pub fn cluster_of(&self, host_id: &str) -> &str {
        self.get(host_id).unwrap_or(NONE)
    }

    pub fn merge(&mut self, newer: ClusterMembership) {
        self.0.merge(newer.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Host id -> host name and host name -> core clock speed. Produced by the
/// host pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostDirectory {
    names: Mapping<String>,
    clocks: Mapping<i64>,
}

impl HostDirectory {
    pub fn set_name(&mut self, host_id: impl Into<String>, host_name: impl Into<String>) {
        self.names.set(host_id, host_name.into());
    }

    pub fn set_clock(&mut self, host_name: impl Into<String>, cpu_mhz: i64) {
        self.clocks.set(host_name, cpu_mhz);
    }

    pub fn name(&self, host_id: &str) -> Option<&str> {
        self.names.get(host_id).map(String::as_str)
    }

    pub fn clock(&self, host_name: &str) -> Option<i64> {
        self.clocks.get(host_name).copied()
    }

    pub fn name_of(&self, host_id: &str) -> &str {
        self.name(host_id).unwrap_or(UNKNOWN)
    }

    pub fn clock_of(&self, host_name: &str) -> i64 {
        self.clock(host_name).unwrap_or(0)
    }

    pub fn merge(&mut self, newer: HostDirectory) {
        self.names.merge(newer.names);
        self.clocks.merge(newer.clocks);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Datastore id -> display name. Produced by the datastore pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatastoreNames(Mapping<String>);

impl DatastoreNames {
    pub fn set(&mut self, datastore_id: impl Into<String>, name: impl Into<String>) {
        self.0.set(datastore_id, name.into());
    }

    pub fn get(&self, datastore_id: &str) -> Option<&str> {
        self.0.get(datastore_id).map(String::as_str)
    }

    pub fn name_of(&self, datastore_id: &str) -> &str {
        self.get(datastore_id).unwrap_or(UNKNOWN)
    }

    pub fn merge(&mut self, newer: DatastoreNames) {
        self.0.merge(newer.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a producing pass handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome<T> {
    /// Every scope answered: the table describes the whole inventory.
    Complete(T),
    /// Some scopes failed: the table only covers the ones that answered.
    Partial(T),
}

impl<T> PassOutcome<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, PassOutcome::Complete(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            PassOutcome::Complete(t) | PassOutcome::Partial(t) => t,
        }
    }
}

/// Latest accepted relation tables, owned by the scheduler.
///
/// A complete pass replaces its table, so entities deleted from vSphere
/// drop out. A partial pass is merged over the previous table, and a failed
/// pass leaves it untouched, so consumers keep resolving against the last
/// known state.
#[derive(Debug, Clone, Default)]
pub struct CrossReferenceIndex {
    pub membership: ClusterMembership,
    pub hosts: HostDirectory,
    pub datastores: DatastoreNames,
}

impl CrossReferenceIndex {
    pub fn accept_membership(&mut self, outcome: PassOutcome<ClusterMembership>) {
        match outcome {
            PassOutcome::Complete(m) => self.membership = m,
            PassOutcome::Partial(m) => self.membership.merge(m),
        }
    }

    pub fn accept_hosts(&mut self, outcome: PassOutcome<HostDirectory>) {
        match outcome {
            PassOutcome::Complete(h) => self.hosts = h,
            PassOutcome::Partial(h) => self.hosts.merge(h),
        }
    }

    pub fn accept_datastores(&mut self, outcome: PassOutcome<DatastoreNames>) {
        match outcome {
            PassOutcome::Complete(d) => self.datastores = d,
            PassOutcome::Partial(d) => self.datastores.merge(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_for_missing_relations() {
        let index = CrossReferenceIndex::default();
        assert_eq!(index.membership.cluster_of("host-1"), "none");
        assert_eq!(index.hosts.name_of("host-1"), "unknown");
        assert_eq!(index.hosts.clock_of("esx01"), 0);
        assert_eq!(index.datastores.name_of("datastore-1"), "unknown");
    }

    #[test]
    fn test_set_overwrites() {
        let mut m = ClusterMembership::default();
        m.set("host-1", "Prod");
        m.set("host-1", "Staging");
        assert_eq!(m.cluster_of("host-1"), "Staging");
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_complete_outcome_drops_deleted_entries() {
        let mut index = CrossReferenceIndex::default();
        let mut first = ClusterMembership::default();
        first.set("host-1", "Prod");
        first.set("host-2", "Prod");
        index.accept_membership(PassOutcome::Complete(first));

        let mut second = ClusterMembership::default();
        second.set("host-1", "Prod");
        index.accept_membership(PassOutcome::Complete(second));

        assert_eq!(index.membership.cluster_of("host-2"), NONE);
        assert_eq!(index.membership.len(), 1);
    }

    #[test]
    fn test_partial_outcome_merges_over_previous() {
        let mut index = CrossReferenceIndex::default();
        let mut first = HostDirectory::default();
        first.set_name("host-1", "esx01");
        first.set_clock("esx01", 2000);
        first.set_name("host-2", "esx02");
        index.accept_hosts(PassOutcome::Complete(first));

        let mut partial = HostDirectory::default();
        partial.set_name("host-1", "esx01-renamed");
        partial.set_clock("esx01-renamed", 2400);
        index.accept_hosts(PassOutcome::Partial(partial));

        assert_eq!(index.hosts.name_of("host-1"), "esx01-renamed");
        assert_eq!(index.hosts.clock_of("esx01-renamed"), 2400);
        assert_eq!(index.hosts.name_of("host-2"), "esx02");
    }

    #[test]
    fn test_outcome_accessors() {
        let o = PassOutcome::Partial(DatastoreNames::default());
        assert!(!o.is_complete());
        assert!(o.into_inner().is_empty());
    }
}
