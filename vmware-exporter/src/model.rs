//! Inventory snapshot types.
//!
//! These are the projections the exporter works with, independent of the
//! vSphere wire format. Every attribute the inventory may omit is an `Option`;
//! quantities are `i64` so derived values (free = total - used) stay signed.
//! Memory quantities are always bytes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datacenter {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub effective_cpu_mhz: Option<i64>,
    pub total_cpu_mhz: Option<i64>,
    pub cpu_cores: Option<i64>,
    pub cpu_threads: Option<i64>,
    pub effective_hosts: Option<i64>,
    pub total_hosts: Option<i64>,
    pub effective_memory_bytes: Option<i64>,
    pub total_memory_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    /// Member hosts, only used to build the host -> cluster relation.
    #[serde(default)]
    pub host_ids: Vec<String>,
    #[serde(default)]
    pub summary: ClusterSummary,
}

/// Reservation / limit / overhead triple of a resource allocation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub reservation: Option<i64>,
    pub limit: Option<i64>,
    pub overhead_limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostHardware {
    /// Clock speed of one core.
    pub cpu_mhz: i64,
    pub cpu_cores: i64,
    pub cpu_threads: i64,
    pub memory_bytes: i64,
    #[serde(default)]
    pub nics: i64,
}

impl HostHardware {
    /// Clock speed times physical cores. Hyper-threads share a core's cycles
    /// and are not counted, so this is lower than a `mhz × cores × threads`
    /// figure for the same host.
    pub fn cpu_total_mhz(&self) -> i64 {
        self.cpu_mhz.saturating_mul(self.cpu_cores)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostUsage {
    pub cpu_mhz: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub uptime_seconds: Option<i64>,
    pub available_pmem_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hardware: Option<HostHardware>,
    #[serde(default)]
    pub usage: HostUsage,
    #[serde(default)]
    pub cpu_allocation: Allocation,
    #[serde(default)]
    pub memory_allocation: Allocation,
}

impl Host {
    /// Unused CPU capacity. Negative when the host reports more usage than
    /// capacity, which happens transiently during inventory updates.
    pub fn free_cpu_mhz(&self) -> Option<i64> {
        let hw = self.hardware?;
        Some(hw.cpu_total_mhz().saturating_sub(self.usage.cpu_mhz?))
    }

    pub fn free_memory_bytes(&self) -> Option<i64> {
        let hw = self.hardware?;
        Some(hw.memory_bytes.saturating_sub(self.usage.memory_bytes?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datastore {
    pub id: String,
    pub name: String,
    /// Storage type as reported by vSphere (VMFS, NFS, vsan, ...).
    pub kind: String,
    pub capacity_bytes: i64,
    pub free_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreUsage {
    pub datastore_id: String,
    pub committed_bytes: i64,
    pub uncommitted_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestDisk {
    pub path: String,
    pub capacity_bytes: i64,
    pub free_bytes: i64,
    #[serde(default)]
    pub mapping_keys: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VmHardware {
    pub num_cpu: i64,
    pub memory_bytes: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VmQuickStats {
    pub overall_cpu_usage_mhz: Option<i64>,
    pub overall_cpu_demand_mhz: Option<i64>,
    pub guest_memory_usage_bytes: Option<i64>,
    pub active_memory_bytes: Option<i64>,
    pub granted_memory_bytes: Option<i64>,
    pub static_cpu_entitlement_mhz: Option<i64>,
    pub static_memory_entitlement_bytes: Option<i64>,
    pub uptime_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    /// Host currently running the VM, absent for unregistered/orphaned VMs.
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub hardware: Option<VmHardware>,
    #[serde(default)]
    pub cpu_allocation: Allocation,
    #[serde(default)]
    pub memory_allocation: Allocation,
    #[serde(default)]
    pub stats: VmQuickStats,
    #[serde(default)]
    pub max_cpu_usage_mhz: Option<i64>,
    #[serde(default)]
    pub cpu_reservation_mhz: Option<i64>,
    #[serde(default)]
    pub memory_reservation_bytes: Option<i64>,
    #[serde(default)]
    pub storage_committed_bytes: Option<i64>,
    /// Creation time, unix seconds.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub datastore_usage: Vec<DatastoreUsage>,
    #[serde(default)]
    pub disks: Vec<GuestDisk>,
}
