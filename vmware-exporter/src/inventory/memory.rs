//! In-memory inventory for development without a vCenter.
//!
//! Serves a snapshot loaded from a JSON fixture (or built by the devkit),
//! can be swapped between cycles to simulate inventory changes, and can be
//! told to fail specific entity kinds or datacenters.

use super::{EntityKind, InventorySource, Scope};
use crate::error::{InventoryError, InventoryResult};
use crate::model::{Cluster, Datacenter, Datastore, Host, VirtualMachine};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// One datacenter and everything it contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatacenterSnapshot {
    #[serde(flatten)]
    pub datacenter: Datacenter,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub datastores: Vec<Datastore>,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub virtual_machines: Vec<VirtualMachine>,
}

/// Full inventory, the format of fixture files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub datacenters: Vec<DatacenterSnapshot>,
}

#[derive(Default)]
struct Faults {
    kinds: HashSet<EntityKind>,
    datacenters: HashSet<String>,
}

pub struct StaticInventory {
    snapshot: RwLock<InventorySnapshot>,
    faults: RwLock<Faults>,
}

impl StaticInventory {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            faults: RwLock::new(Faults::default()),
        }
    }

    /// Load a fixture file written as JSON.
    pub async fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let path = path.as_ref();
        let txt = tokio::fs::read_to_string(path).await?;
        let snapshot: InventorySnapshot = serde_json::from_str(&txt)?;
        info!(
            "Loaded inventory fixture {} ({} datacenters)",
            path.display(),
            snapshot.datacenters.len()
        );
        Ok(Self::new(snapshot))
    }

    /// Replace the whole inventory, as if vCenter changed between cycles.
    pub fn replace(&self, snapshot: InventorySnapshot) {
        *self.snapshot.write() = snapshot;
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        self.snapshot.read().clone()
    }

    /// Make every fetch of `kind` fail until [`recover`](Self::recover).
    pub fn fail(&self, kind: EntityKind) {
        self.faults.write().kinds.insert(kind);
    }

    /// Make every scoped fetch inside datacenter `dc_id` fail.
    pub fn fail_datacenter(&self, dc_id: &str) {
        self.faults.write().datacenters.insert(dc_id.to_string());
    }

    pub fn recover(&self, kind: EntityKind) {
        self.faults.write().kinds.remove(&kind);
    }

    pub fn recover_all(&self) {
        *self.faults.write() = Faults::default();
    }

    fn check(&self, kind: EntityKind, scope: &Scope) -> InventoryResult<()> {
        let faults = self.faults.read();
        if faults.kinds.contains(&kind) {
            return Err(InventoryError::Unavailable { kind });
        }
        if let Scope::Datacenter(id) = scope {
            if faults.datacenters.contains(id) {
                return Err(InventoryError::Unavailable { kind });
            }
        }
        Ok(())
    }

    fn collect<T: Clone>(
        &self,
        kind: EntityKind,
        scope: &Scope,
        pick: impl Fn(&DatacenterSnapshot) -> &Vec<T>,
    ) -> InventoryResult<Vec<T>> {
        self.check(kind, scope)?;
        let snapshot = self.snapshot.read();
        // Unknown datacenter ids yield nothing: the datacenter may have been
        // removed between enumeration and fetch.
        let items: Vec<T> = snapshot
            .datacenters
            .iter()
            .filter(|dc| match scope {
                Scope::Root => true,
                Scope::Datacenter(id) => &dc.datacenter.id == id,
            })
            .flat_map(|dc| pick(dc).iter().cloned())
            .collect();
        debug!("static inventory: {} {} entities in {:?}", items.len(), kind, scope);
        Ok(items)
    }
}

impl InventorySource for StaticInventory {
    async fn datacenters(&self) -> InventoryResult<Vec<Datacenter>> {
        self.check(EntityKind::Datacenter, &Scope::Root)?;
        Ok(self
            .snapshot
            .read()
            .datacenters
            .iter()
            .map(|dc| dc.datacenter.clone())
            .collect())
    }

    async fn clusters(&self, scope: &Scope) -> InventoryResult<Vec<Cluster>> {
        self.collect(EntityKind::Cluster, scope, |dc| &dc.clusters)
    }

    async fn hosts(&self, scope: &Scope) -> InventoryResult<Vec<Host>> {
        self.collect(EntityKind::Host, scope, |dc| &dc.hosts)
    }

    async fn datastores(&self, scope: &Scope) -> InventoryResult<Vec<Datastore>> {
        self.collect(EntityKind::Datastore, scope, |dc| &dc.datastores)
    }

    async fn virtual_machines(&self, scope: &Scope) -> InventoryResult<Vec<VirtualMachine>> {
        self.collect(EntityKind::VirtualMachine, scope, |dc| &dc.virtual_machines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> InventorySnapshot {
        serde_json::from_value(serde_json::json!({
            "datacenters": [
                {
                    "id": "datacenter-1",
                    "name": "DC1",
                    "clusters": [{ "id": "domain-c1", "name": "Prod", "host_ids": ["host-1"] }],
                    "hosts": [{ "id": "host-1", "name": "esx01" }],
                    "virtual_machines": [{ "id": "vm-1", "name": "web01", "host_id": "host-1" }]
                },
                {
                    "id": "datacenter-2",
                    "name": "DC2",
                    "hosts": [{ "id": "host-2", "name": "esx02" }]
                }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_scoped_fetches() {
        let inv = StaticInventory::new(fixture());

        assert_eq!(inv.datacenters().await.unwrap().len(), 2);
        assert_eq!(inv.hosts(&Scope::Root).await.unwrap().len(), 2);

        let dc2 = inv.hosts(&Scope::Datacenter("datacenter-2".into())).await.unwrap();
        assert_eq!(dc2.len(), 1);
        assert_eq!(dc2[0].name, "esx02");

        let gone = inv.virtual_machines(&Scope::Datacenter("datacenter-9".into())).await.unwrap();
        assert!(gone.is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let inv = StaticInventory::new(fixture());

        inv.fail(EntityKind::Cluster);
        assert!(matches!(
            inv.clusters(&Scope::Root).await,
            Err(InventoryError::Unavailable { kind: EntityKind::Cluster })
        ));
        inv.recover(EntityKind::Cluster);
        assert_eq!(inv.clusters(&Scope::Root).await.unwrap().len(), 1);

        inv.fail_datacenter("datacenter-1");
        assert!(inv.hosts(&Scope::Datacenter("datacenter-1".into())).await.is_err());
        assert!(inv.hosts(&Scope::Datacenter("datacenter-2".into())).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_example_fixture() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/inventory.example.json");
        let inv = StaticInventory::load(path).await.unwrap();

        let hosts = inv.hosts(&Scope::Root).await.unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].cpu_allocation.limit, Some(-1));
        assert_eq!(hosts[1].cpu_allocation.reservation, None);

        let vms = inv.virtual_machines(&Scope::Root).await.unwrap();
        assert_eq!(vms[1].host_id, None);
    }

    #[tokio::test]
    async fn test_replace_snapshot() {
        let inv = StaticInventory::new(fixture());
        inv.replace(InventorySnapshot::default());
        assert!(inv.datacenters().await.unwrap().is_empty());
    }
}
