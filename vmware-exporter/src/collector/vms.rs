use super::{Emitter, PassResult, ScopeTally};
use crate::error::InventoryResult;
use crate::index::{CrossReferenceIndex, NONE, UNKNOWN};
use crate::inventory::{EntityKind, InventorySource, Scope};
use crate::model::VirtualMachine;
use crate::sink::MetricsSink;
use tracing::debug;

/// Relations of one VM, resolved through the index.
struct Placement<'a> {
    datacenter: &'a str,
    cluster: &'a str,
    host: &'a str,
    cpu_mhz: i64,
}

impl<'a> Placement<'a> {
    fn resolve(index: &'a CrossReferenceIndex, datacenter: &'a str, vm: &VirtualMachine) -> Self {
        match vm.host_id.as_deref() {
            Some(host_id) => {
                let host = index.hosts.name_of(host_id);
                Self {
                    datacenter,
                    cluster: index.membership.cluster_of(host_id),
                    host,
                    cpu_mhz: index.hosts.clock_of(host),
                }
            }
            None => Self {
                datacenter,
                cluster: NONE,
                host: UNKNOWN,
                cpu_mhz: 0,
            },
        }
    }
}

/// Walk every datacenter and emit VM, per-datastore and per-guest-disk
/// gauges with cluster, host and datastore names resolved from the earlier
/// passes.
pub async fn vm_pass<S: InventorySource>(
    source: &S,
    sink: &MetricsSink,
    index: &CrossReferenceIndex,
) -> InventoryResult<PassResult<()>> {
    let datacenters = source.datacenters().await?;

    let mut tally = ScopeTally::new(EntityKind::VirtualMachine);
    let mut emitted = 0;

    for dc in &datacenters {
        let vms = match source.virtual_machines(&Scope::datacenter(dc)).await {
            Ok(vms) => vms,
            Err(e) => {
                tally.failed(dc, &e);
                continue;
            }
        };
        tally.answered();

        for vm in &vms {
            let placement = Placement::resolve(index, &dc.name, vm);
            emit_vm(sink, vm, &placement);
            emit_datastores(sink, vm, &placement, index);
            emit_disks(sink, vm, &placement);
        }
        emitted += vms.len();
    }

    let complete = tally.finish()?;
    debug!(
        "vm pass: {} virtual machines in {} datacenters (complete: {})",
        emitted,
        datacenters.len(),
        complete
    );
    Ok(PassResult::new((), emitted, complete))
}

fn emit_vm(sink: &MetricsSink, vm: &VirtualMachine, at: &Placement<'_>) {
    let labels = [vm.name.as_str(), at.datacenter, at.cluster];
    let e = Emitter::new(sink, &labels);
    let q = &vm.stats;

    e.gauge("vm_cpu_allocation_limit_mhz", vm.cpu_allocation.limit);
    e.gauge("vm_cpu_allocation_reservation_mhz", vm.cpu_allocation.reservation);
    e.gauge("vm_cpu_entitled_mhz", q.static_cpu_entitlement_mhz);
    e.gauge("vm_cpu_usage_max", vm.max_cpu_usage_mhz);
    e.gauge("vm_cpu_mhz", at.cpu_mhz);
    e.gauge("vm_cpu_usage_mhz", q.overall_cpu_demand_mhz);
    e.gauge("vm_cpu_mhz_total", q.overall_cpu_usage_mhz);
    e.gauge("vm_cpu_reservation_mhz", vm.cpu_reservation_mhz);
    e.gauge("vm_creation_date_seconds", vm.created_at);
    e.gauge("vm_memory_active_bytes", q.active_memory_bytes);
    e.gauge("vm_memory_allocation_limit_bytes", vm.memory_allocation.limit);
    e.gauge("vm_memory_allocation_reservation_bytes", vm.memory_allocation.reservation);
    e.gauge("vm_memory_entitled_bytes", q.static_memory_entitlement_bytes);
    e.gauge("vm_memory_granted_bytes", q.granted_memory_bytes);
    e.gauge("vm_memory_reservation_bytes", vm.memory_reservation_bytes);
    e.gauge("vm_memory_used_bytes", q.guest_memory_usage_bytes);
    e.gauge("vm_storage_committed_bytes", vm.storage_committed_bytes);
    e.gauge("vm_uptime_seconds", q.uptime_seconds);

    if let Some(hw) = &vm.hardware {
        e.gauge("vm_cpu_cores_total", hw.num_cpu);
        e.gauge("vm_memory_bytes_total", hw.memory_bytes);
    }
}

fn emit_datastores(
    sink: &MetricsSink,
    vm: &VirtualMachine,
    at: &Placement<'_>,
    index: &CrossReferenceIndex,
) {
    for usage in &vm.datastore_usage {
        let labels = [
            vm.name.as_str(),
            at.host,
            at.datacenter,
            at.cluster,
            usage.datastore_id.as_str(),
            index.datastores.name_of(&usage.datastore_id),
        ];
        let e = Emitter::new(sink, &labels);
        e.gauge("vm_datastore_committed_bytes", usage.committed_bytes);
        e.gauge("vm_datastore_uncommitted_bytes", usage.uncommitted_bytes);
    }
}

fn emit_disks(sink: &MetricsSink, vm: &VirtualMachine, at: &Placement<'_>) {
    for disk in &vm.disks {
        let labels = [
            vm.name.as_str(),
            at.host,
            at.datacenter,
            at.cluster,
            disk.path.as_str(),
        ];
        let e = Emitter::new(sink, &labels);
        // one series per disk: with several backing keys the last one wins
        e.gauge("vm_disk_mapping_key", disk.mapping_keys.last().copied());
        e.gauge("vm_disk_capacity_bytes", disk.capacity_bytes);
        e.gauge("vm_disk_free_space_bytes", disk.free_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ClusterMembership, DatastoreNames, HostDirectory, PassOutcome};
    use crate::inventory::{InventorySnapshot, StaticInventory};
    use crate::sink::SeriesPolicy;
    use serde_json::json;

    fn inventory() -> StaticInventory {
        let snapshot: InventorySnapshot = serde_json::from_value(json!({
            "datacenters": [{
                "id": "datacenter-1",
                "name": "DC1",
                "virtual_machines": [
                    {
                        "id": "vm-1",
                        "name": "web01",
                        "host_id": "host-1",
                        "hardware": { "num_cpu": 2, "memory_bytes": 4096 },
                        "stats": { "overall_cpu_usage_mhz": 150, "overall_cpu_demand_mhz": 180 },
                        "datastore_usage": [
                            { "datastore_id": "datastore-11", "committed_bytes": 100, "uncommitted_bytes": 50 },
                            { "datastore_id": "datastore-99", "committed_bytes": 7, "uncommitted_bytes": 0 }
                        ],
                        "disks": [
                            { "path": "/", "capacity_bytes": 1000, "free_bytes": 300, "mapping_keys": [2000, 2001] },
                            { "path": "/data", "capacity_bytes": 500, "free_bytes": 500 }
                        ]
                    },
                    { "id": "vm-2", "name": "orphan", "host_id": "host-404" },
                    { "id": "vm-3", "name": "template" }
                ]
            }]
        }))
        .unwrap();
        StaticInventory::new(snapshot)
    }

    fn index() -> CrossReferenceIndex {
        let mut membership = ClusterMembership::default();
        membership.set("host-1", "Prod");
        let mut hosts = HostDirectory::default();
        hosts.set_name("host-1", "esx01");
        hosts.set_clock("esx01", 2000);
        let mut datastores = DatastoreNames::default();
        datastores.set("datastore-11", "datastore1");

        let mut index = CrossReferenceIndex::default();
        index.accept_membership(PassOutcome::Complete(membership));
        index.accept_hosts(PassOutcome::Complete(hosts));
        index.accept_datastores(PassOutcome::Complete(datastores));
        index
    }

    #[tokio::test]
    async fn test_transitive_resolution() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        let result = vm_pass(&inventory(), &sink, &index()).await.unwrap();
        assert_eq!(result.entities, 3);

        assert_eq!(
            sink.value("vm_cpu_mhz", &[("machine_name", "web01"), ("cluster_name", "Prod")]),
            Some(2000.0)
        );
        assert_eq!(
            sink.value(
                "vm_datastore_committed_bytes",
                &[("datastore_name", "datastore1"), ("host_name", "esx01"), ("cluster_name", "Prod")]
            ),
            Some(100.0)
        );
        assert_eq!(
            sink.value("vm_datastore_uncommitted_bytes", &[("datastore_id", "datastore-11")]),
            Some(50.0)
        );
        assert_eq!(
            sink.value(
                "vm_datastore_committed_bytes",
                &[("datastore_id", "datastore-99"), ("datastore_name", "unknown")]
            ),
            Some(7.0)
        );
    }

    #[tokio::test]
    async fn test_unknown_host_sentinels() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        vm_pass(&inventory(), &sink, &index()).await.unwrap();

        for name in ["orphan", "template"] {
            assert_eq!(
                sink.value("vm_cpu_mhz", &[("machine_name", name), ("cluster_name", "none")]),
                Some(0.0)
            );
        }
    }

    #[tokio::test]
    async fn test_disks_last_mapping_key_wins() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        vm_pass(&inventory(), &sink, &index()).await.unwrap();

        assert_eq!(sink.value("vm_disk_mapping_key", &[("disk_path", "/")]), Some(2001.0));
        assert_eq!(sink.series_count("vm_disk_mapping_key"), 1);
        assert_eq!(
            sink.value("vm_disk_free_space_bytes", &[("disk_path", "/data"), ("host_name", "esx01")]),
            Some(500.0)
        );
    }

    #[tokio::test]
    async fn test_absent_optional_fields() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        vm_pass(&inventory(), &sink, &index()).await.unwrap();

        assert_eq!(sink.series_count("vm_cpu_allocation_limit_mhz"), 0);
        assert_eq!(sink.series_count("vm_cpu_cores_total"), 1);
        assert_eq!(sink.series_count("vm_creation_date_seconds"), 0);
        assert_eq!(sink.series_count("vm_cpu_mhz"), 3);
        assert_eq!(
            sink.value("vm_cpu_usage_mhz", &[("machine_name", "web01")]),
            Some(180.0)
        );
    }
}
