/*!
Construction d'inventaires de test

Évite d'écrire à la main le JSON d'un `InventorySnapshot` :
- `InventoryBuilder` empile datacenters, clusters, hosts, datastores et VMs
- `VmBuilder` décrit une VM (host, usage datastore, disques invités)
- `reference_inventory()` fournit l'inventaire minimal utilisé par les tests
  de bout en bout
*/

use anyhow::Result;
use std::path::Path;
use vmware_exporter::inventory::{DatacenterSnapshot, InventorySnapshot, StaticInventory};
use vmware_exporter::model::{
    Allocation, Cluster, ClusterSummary, Datacenter, Datastore, DatastoreUsage, GuestDisk, Host,
    HostHardware, HostUsage, VirtualMachine, VmHardware, VmQuickStats,
};

const GIB: i64 = 1024 * 1024 * 1024;

/// Inventaire construit datacenter par datacenter ; chaque entité est
/// ajoutée au dernier datacenter déclaré.
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    datacenters: Vec<DatacenterSnapshot>,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn datacenter(mut self, id: &str, name: &str) -> Self {
        self.datacenters.push(DatacenterSnapshot {
            datacenter: Datacenter {
                id: id.to_string(),
                name: name.to_string(),
            },
            clusters: Vec::new(),
            datastores: Vec::new(),
            hosts: Vec::new(),
            virtual_machines: Vec::new(),
        });
        self
    }

    fn current(&mut self) -> &mut DatacenterSnapshot {
        if self.datacenters.is_empty() {
            log::debug!("🏗️ No datacenter declared, adding datacenter-1");
            *self = std::mem::take(self).datacenter("datacenter-1", "DC1");
        }
        let last = self.datacenters.len() - 1;
        &mut self.datacenters[last]
    }

    /// Cluster avec ses hosts membres et un résumé dérivé du nombre de hosts
    pub fn cluster(mut self, id: &str, name: &str, host_ids: &[&str]) -> Self {
        let hosts = host_ids.len() as i64;
        self.current().clusters.push(Cluster {
            id: id.to_string(),
            name: name.to_string(),
            host_ids: host_ids.iter().map(|h| h.to_string()).collect(),
            summary: ClusterSummary {
                total_hosts: Some(hosts),
                effective_hosts: Some(hosts),
                ..Default::default()
            },
        });
        self
    }

    pub fn datastore(mut self, id: &str, name: &str, kind: &str, capacity_bytes: i64, free_bytes: i64) -> Self {
        self.current().datastores.push(Datastore {
            id: id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            capacity_bytes,
            free_bytes,
        });
        self
    }

    /// Host avec matériel réaliste : `cores` cœurs à `cpu_mhz`, 2 threads
    /// par cœur, 256 GiB de mémoire, 4 NICs, à moitié chargé.
    pub fn host(self, id: &str, name: &str, cpu_mhz: i64, cores: i64) -> Self {
        let memory = 256 * GIB;
        self.host_with(Host {
            id: id.to_string(),
            name: name.to_string(),
            hardware: Some(HostHardware {
                cpu_mhz,
                cpu_cores: cores,
                cpu_threads: cores * 2,
                memory_bytes: memory,
                nics: 4,
            }),
            usage: HostUsage {
                cpu_mhz: Some(cpu_mhz * cores / 2),
                memory_bytes: Some(memory / 2),
                uptime_seconds: Some(86_400),
                available_pmem_bytes: Some(0),
            },
            cpu_allocation: Allocation::default(),
            memory_allocation: Allocation::default(),
        })
    }

    pub fn host_with(mut self, host: Host) -> Self {
        self.current().hosts.push(host);
        self
    }

    pub fn vm(mut self, vm: VmBuilder) -> Self {
        self.current().virtual_machines.push(vm.build());
        self
    }

    pub fn build(self) -> InventorySnapshot {
        InventorySnapshot {
            datacenters: self.datacenters,
        }
    }

    pub fn into_inventory(self) -> StaticInventory {
        StaticInventory::new(self.build())
    }

    /// Écrit l'inventaire au format fixture (lisible par `StaticInventory::load`)
    pub fn write_json<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.build())?;
        std::fs::write(path.as_ref(), json)?;
        log::info!("💾 Wrote inventory fixture {}", path.as_ref().display());
        Ok(())
    }
}

/// Description fluide d'une VM
#[derive(Debug, Clone)]
pub struct VmBuilder {
    vm: VirtualMachine,
}

impl VmBuilder {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            vm: VirtualMachine {
                id: id.to_string(),
                name: name.to_string(),
                host_id: None,
                hardware: Some(VmHardware {
                    num_cpu: 2,
                    memory_bytes: 4 * GIB,
                }),
                cpu_allocation: Allocation::default(),
                memory_allocation: Allocation::default(),
                stats: VmQuickStats::default(),
                max_cpu_usage_mhz: None,
                cpu_reservation_mhz: None,
                memory_reservation_bytes: None,
                storage_committed_bytes: None,
                created_at: None,
                datastore_usage: Vec::new(),
                disks: Vec::new(),
            },
        }
    }

    pub fn on_host(mut self, host_id: &str) -> Self {
        self.vm.host_id = Some(host_id.to_string());
        self
    }

    pub fn datastore_usage(mut self, datastore_id: &str, committed_bytes: i64, uncommitted_bytes: i64) -> Self {
        self.vm.datastore_usage.push(DatastoreUsage {
            datastore_id: datastore_id.to_string(),
            committed_bytes,
            uncommitted_bytes,
        });
        self.vm.storage_committed_bytes =
            Some(self.vm.datastore_usage.iter().map(|u| u.committed_bytes).sum());
        self
    }

    pub fn disk(mut self, path: &str, capacity_bytes: i64, free_bytes: i64, mapping_keys: &[i64]) -> Self {
        self.vm.disks.push(GuestDisk {
            path: path.to_string(),
            capacity_bytes,
            free_bytes,
            mapping_keys: mapping_keys.to_vec(),
        });
        self
    }

    pub fn cpu_allocation(mut self, allocation: Allocation) -> Self {
        self.vm.cpu_allocation = allocation;
        self
    }

    pub fn stats(mut self, stats: VmQuickStats) -> Self {
        self.vm.stats = stats;
        self
    }

    pub fn build(self) -> VirtualMachine {
        self.vm
    }
}

/// Cluster c1 "Prod" avec le host h1 (2000 MHz), le datastore ds1
/// "datastore1" et une VM qui y consomme 100 octets engagés et 50 non engagés.
pub fn reference_inventory() -> InventorySnapshot {
    InventoryBuilder::new()
        .datacenter("datacenter-1", "DC1")
        .cluster("c1", "Prod", &["h1"])
        .datastore("ds1", "datastore1", "VMFS", 1000, 600)
        .host("h1", "h1", 2000, 8)
        .vm(VmBuilder::new("vm-1", "app01").on_host("h1").datastore_usage("ds1", 100, 50))
        .build()
}
