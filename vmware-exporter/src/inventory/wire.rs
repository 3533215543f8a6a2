//! vim25 JSON shapes and their conversion into model snapshots.
//!
//! Only the fields the exporter reads are declared; serde ignores the rest
//! (including `_typeName` discriminators). vSphere reports several memory
//! figures in MiB, they are scaled to bytes here.

use crate::model::{
    Allocation, Cluster, ClusterSummary, Datacenter, Datastore, DatastoreUsage, GuestDisk, Host,
    HostHardware, HostUsage, VirtualMachine, VmHardware, VmQuickStats,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const MIB: i64 = 1024 * 1024;

/// Scale a MiB figure to bytes. Negative values are vSphere sentinels
/// (-1 = unlimited) and pass through untouched.
fn mib_to_bytes(v: i64) -> i64 {
    if v < 0 {
        v
    } else {
        v.saturating_mul(MIB)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl MoRef {
    pub fn new(kind: &str, value: &str) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.to_string(),
        }
    }

    /// Request form, with the discriminator VI/JSON expects on inputs.
    pub fn to_json(&self) -> Value {
        json!({
            "_typeName": "ManagedObjectReference",
            "type": self.kind,
            "value": self.value,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub property_collector: MoRef,
    pub view_manager: MoRef,
    pub session_manager: MoRef,
}

#[derive(Debug, Deserialize)]
pub struct DynamicProperty {
    pub name: String,
    #[serde(default)]
    pub val: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectContent {
    pub obj: MoRef,
    #[serde(default)]
    pub prop_set: Vec<DynamicProperty>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrieveResult {
    #[serde(default)]
    pub objects: Vec<ObjectContent>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Body of a `RetrievePropertiesEx` call collecting `paths` of every object
/// of `vim_type` visible through `view`.
pub fn retrieve_spec(view: &MoRef, vim_type: &str, paths: &[&str]) -> Value {
    json!({
        "specSet": [{
            "_typeName": "PropertyFilterSpec",
            "propSet": [{
                "_typeName": "PropertySpec",
                "type": vim_type,
                "pathSet": paths,
            }],
            "objectSet": [{
                "_typeName": "ObjectSpec",
                "obj": view.to_json(),
                "skip": true,
                "selectSet": [{
                    "_typeName": "TraversalSpec",
                    "name": "traverseView",
                    "type": "ContainerView",
                    "path": "view",
                    "skip": false,
                }],
            }],
        }],
        "options": { "_typeName": "RetrieveOptions" },
    })
}

/// Property values of one object, keyed by property path.
pub struct Props {
    pub id: String,
    values: HashMap<String, Value>,
}

impl From<ObjectContent> for Props {
    fn from(oc: ObjectContent) -> Self {
        Self {
            id: oc.obj.value,
            values: oc.prop_set.into_iter().map(|p| (p.name, p.val)).collect(),
        }
    }
}

impl Props {
    /// Decode a property. Absent or null properties are `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, serde_json::Error> {
        match self.values.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some),
        }
    }

    fn name(&self) -> Result<String, serde_json::Error> {
        Ok(self.get::<String>("name")?.unwrap_or_else(|| self.id.clone()))
    }
}

// Property projections per type

pub const DATACENTER_PATHS: &[&str] = &["name"];
pub const CLUSTER_PATHS: &[&str] = &["name", "host", "summary"];
pub const HOST_PATHS: &[&str] = &[
    "name",
    "summary.hardware",
    "summary.quickStats",
    "config.systemResources",
];
pub const DATASTORE_PATHS: &[&str] = &["summary"];
pub const VM_PATHS: &[&str] = &[
    "name",
    "summary",
    "storage.perDatastoreUsage",
    "guest.disk",
    "config.hardware",
    "config.cpuAllocation",
    "config.memoryAllocation",
    "config.createDate",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSummaryWire {
    effective_cpu: Option<i64>,
    effective_memory: Option<i64>,
    num_cpu_cores: Option<i64>,
    num_cpu_threads: Option<i64>,
    num_effective_hosts: Option<i64>,
    num_hosts: Option<i64>,
    total_cpu: Option<i64>,
    total_memory: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostHardwareWire {
    cpu_mhz: i64,
    num_cpu_cores: i64,
    num_cpu_threads: i64,
    memory_size: i64,
    #[serde(default)]
    num_nics: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostQuickStatsWire {
    overall_cpu_usage: Option<i64>,
    overall_memory_usage: Option<i64>,
    uptime: Option<i64>,
    #[serde(rename = "availablePMemCapacity")]
    available_pmem_capacity: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocationWire {
    reservation: Option<i64>,
    limit: Option<i64>,
    overhead_limit: Option<i64>,
}

impl AllocationWire {
    fn cpu(self) -> Allocation {
        Allocation {
            reservation: self.reservation,
            limit: self.limit,
            overhead_limit: self.overhead_limit,
        }
    }

    fn memory(self) -> Allocation {
        Allocation {
            reservation: self.reservation.map(mib_to_bytes),
            limit: self.limit.map(mib_to_bytes),
            overhead_limit: self.overhead_limit.map(mib_to_bytes),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceConfigWire {
    cpu_allocation: Option<AllocationWire>,
    memory_allocation: Option<AllocationWire>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemResourcesWire {
    config: Option<ResourceConfigWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatastoreSummaryWire {
    datastore: Option<MoRef>,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    capacity: i64,
    #[serde(default)]
    free_space: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmRuntimeWire {
    host: Option<MoRef>,
    max_cpu_usage: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmQuickStatsWire {
    overall_cpu_usage: Option<i64>,
    overall_cpu_demand: Option<i64>,
    guest_memory_usage: Option<i64>,
    active_memory: Option<i64>,
    granted_memory: Option<i64>,
    static_cpu_entitlement: Option<i64>,
    static_memory_entitlement: Option<i64>,
    uptime_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmConfigSummaryWire {
    cpu_reservation: Option<i64>,
    memory_reservation: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct VmStorageSummaryWire {
    committed: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmSummaryWire {
    runtime: Option<VmRuntimeWire>,
    quick_stats: Option<VmQuickStatsWire>,
    config: Option<VmConfigSummaryWire>,
    storage: Option<VmStorageSummaryWire>,
}

#[derive(Debug, Deserialize)]
struct PerDatastoreUsageWire {
    datastore: MoRef,
    #[serde(default)]
    committed: i64,
    #[serde(default)]
    uncommitted: i64,
}

#[derive(Debug, Deserialize)]
struct DiskMappingWire {
    key: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestDiskWire {
    #[serde(default)]
    disk_path: String,
    #[serde(default)]
    capacity: i64,
    #[serde(default)]
    free_space: i64,
    #[serde(default)]
    mappings: Vec<DiskMappingWire>,
}

#[derive(Debug, Deserialize)]
struct VmHardwareWire {
    #[serde(rename = "numCPU")]
    num_cpu: i64,
    #[serde(rename = "memoryMB")]
    memory_mb: i64,
}

pub fn datacenter(props: Props) -> Result<Datacenter, serde_json::Error> {
    Ok(Datacenter {
        name: props.name()?,
        id: props.id,
    })
}

pub fn cluster(props: Props) -> Result<Cluster, serde_json::Error> {
    let hosts: Vec<MoRef> = props.get("host")?.unwrap_or_default();
    let s: ClusterSummaryWire = props.get("summary")?.unwrap_or_default();
    Ok(Cluster {
        name: props.name()?,
        host_ids: hosts.into_iter().map(|h| h.value).collect(),
        summary: ClusterSummary {
            effective_cpu_mhz: s.effective_cpu,
            total_cpu_mhz: s.total_cpu,
            cpu_cores: s.num_cpu_cores,
            cpu_threads: s.num_cpu_threads,
            effective_hosts: s.num_effective_hosts,
            total_hosts: s.num_hosts,
            effective_memory_bytes: s.effective_memory.map(mib_to_bytes),
            total_memory_bytes: s.total_memory,
        },
        id: props.id,
    })
}

pub fn host(props: Props) -> Result<Host, serde_json::Error> {
    let hardware: Option<HostHardwareWire> = props.get("summary.hardware")?;
    let stats: HostQuickStatsWire = props.get("summary.quickStats")?.unwrap_or_default();
    let resources: SystemResourcesWire = props.get("config.systemResources")?.unwrap_or_default();
    let config = resources.config.unwrap_or_default();

    Ok(Host {
        name: props.name()?,
        hardware: hardware.map(|hw| HostHardware {
            cpu_mhz: hw.cpu_mhz,
            cpu_cores: hw.num_cpu_cores,
            cpu_threads: hw.num_cpu_threads,
            memory_bytes: hw.memory_size,
            nics: hw.num_nics,
        }),
        usage: HostUsage {
            cpu_mhz: stats.overall_cpu_usage,
            memory_bytes: stats.overall_memory_usage.map(mib_to_bytes),
            uptime_seconds: stats.uptime,
            available_pmem_bytes: stats.available_pmem_capacity.map(mib_to_bytes),
        },
        cpu_allocation: config.cpu_allocation.unwrap_or_default().cpu(),
        memory_allocation: config.memory_allocation.unwrap_or_default().memory(),
        id: props.id,
    })
}

pub fn datastore(props: Props) -> Result<Datastore, serde_json::Error> {
    let s: DatastoreSummaryWire = match props.get("summary")? {
        Some(s) => s,
        None => {
            return Err(serde::de::Error::custom(format!(
                "datastore {} has no summary",
                props.id
            )))
        }
    };
    Ok(Datastore {
        id: s.datastore.map(|d| d.value).unwrap_or(props.id),
        name: s.name,
        kind: s.kind,
        capacity_bytes: s.capacity,
        free_bytes: s.free_space,
    })
}

pub fn virtual_machine(props: Props) -> Result<VirtualMachine, serde_json::Error> {
    let summary: VmSummaryWire = props.get("summary")?.unwrap_or_default();
    let runtime = summary.runtime.unwrap_or_default();
    let qs = summary.quick_stats.unwrap_or_default();
    let cfg = summary.config.unwrap_or_default();
    let usage: Vec<PerDatastoreUsageWire> = props.get("storage.perDatastoreUsage")?.unwrap_or_default();
    let disks: Vec<GuestDiskWire> = props.get("guest.disk")?.unwrap_or_default();
    let hardware: Option<VmHardwareWire> = props.get("config.hardware")?;
    let cpu_alloc: AllocationWire = props.get("config.cpuAllocation")?.unwrap_or_default();
    let mem_alloc: AllocationWire = props.get("config.memoryAllocation")?.unwrap_or_default();
    // Unparseable creation dates are dropped rather than failing the VM.
    let created_at = props
        .get::<String>("config.createDate")?
        .and_then(|s| OffsetDateTime::parse(&s, &Rfc3339).ok())
        .map(|t| t.unix_timestamp());

    Ok(VirtualMachine {
        name: props.name()?,
        host_id: runtime.host.map(|h| h.value),
        hardware: hardware.map(|hw| VmHardware {
            num_cpu: hw.num_cpu,
            memory_bytes: mib_to_bytes(hw.memory_mb),
        }),
        cpu_allocation: cpu_alloc.cpu(),
        memory_allocation: mem_alloc.memory(),
        stats: VmQuickStats {
            overall_cpu_usage_mhz: qs.overall_cpu_usage,
            overall_cpu_demand_mhz: qs.overall_cpu_demand,
            guest_memory_usage_bytes: qs.guest_memory_usage.map(mib_to_bytes),
            active_memory_bytes: qs.active_memory.map(mib_to_bytes),
            granted_memory_bytes: qs.granted_memory.map(mib_to_bytes),
            static_cpu_entitlement_mhz: qs.static_cpu_entitlement,
            static_memory_entitlement_bytes: qs.static_memory_entitlement.map(mib_to_bytes),
            uptime_seconds: qs.uptime_seconds,
        },
        max_cpu_usage_mhz: runtime.max_cpu_usage,
        cpu_reservation_mhz: cfg.cpu_reservation,
        memory_reservation_bytes: cfg.memory_reservation.map(mib_to_bytes),
        storage_committed_bytes: summary.storage.and_then(|s| s.committed),
        created_at,
        datastore_usage: usage
            .into_iter()
            .map(|u| DatastoreUsage {
                datastore_id: u.datastore.value,
                committed_bytes: u.committed,
                uncommitted_bytes: u.uncommitted,
            })
            .collect(),
        disks: disks
            .into_iter()
            .map(|d| GuestDisk {
                path: d.disk_path,
                capacity_bytes: d.capacity,
                free_bytes: d.free_space,
                mapping_keys: d.mappings.into_iter().map(|m| m.key).collect(),
            })
            .collect(),
        id: props.id,
    })
}
