//! Inventory source boundary
//!
//! Fetchers return typed snapshots for one entity type within a scope. They
//! never touch the cross-reference index nor the metrics sink; building
//! relations is the job of the passes in `collector`.
//!
//! Two implementations:
//! - [`VsphereClient`] talks to vCenter over the VI/JSON API
//! - [`StaticInventory`] serves an in-memory snapshot (fixture file, tests)

mod memory;
mod vsphere;
mod wire;

pub use memory::{DatacenterSnapshot, InventorySnapshot, StaticInventory};
pub use vsphere::VsphereClient;

use crate::error::InventoryResult;
use crate::model::{Cluster, Datacenter, Datastore, Host, VirtualMachine};
use std::fmt;
use std::future::Future;

/// Entity types the exporter knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Datacenter,
    Cluster,
    Host,
    Datastore,
    VirtualMachine,
}

impl EntityKind {
    /// Managed object type name in the vim25 API.
    pub fn vim_type(self) -> &'static str {
        match self {
            EntityKind::Datacenter => "Datacenter",
            EntityKind::Cluster => "ClusterComputeResource",
            EntityKind::Host => "HostSystem",
            EntityKind::Datastore => "Datastore",
            EntityKind::VirtualMachine => "VirtualMachine",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Datacenter => "datacenter",
            EntityKind::Cluster => "cluster",
            EntityKind::Host => "host",
            EntityKind::Datastore => "datastore",
            EntityKind::VirtualMachine => "virtual machine",
        };
        f.write_str(name)
    }
}

/// Root of a fetch: the whole inventory or a single datacenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Root,
    Datacenter(String),
}

impl Scope {
    pub fn datacenter(dc: &Datacenter) -> Self {
        Scope::Datacenter(dc.id.clone())
    }
}

/// Query capability over a live inventory.
///
/// Each call returns every live entity of one type under `scope`, projected
/// to the fields the exporter needs.
pub trait InventorySource: Send + Sync {
    fn datacenters(&self) -> impl Future<Output = InventoryResult<Vec<Datacenter>>> + Send;

    fn clusters(&self, scope: &Scope) -> impl Future<Output = InventoryResult<Vec<Cluster>>> + Send;

    fn hosts(&self, scope: &Scope) -> impl Future<Output = InventoryResult<Vec<Host>>> + Send;

    fn datastores(&self, scope: &Scope) -> impl Future<Output = InventoryResult<Vec<Datastore>>> + Send;

    fn virtual_machines(
        &self,
        scope: &Scope,
    ) -> impl Future<Output = InventoryResult<Vec<VirtualMachine>>> + Send;
}
