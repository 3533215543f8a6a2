use super::{Emitter, PassResult, ScopeTally};
use crate::error::InventoryResult;
use crate::index::{ClusterMembership, HostDirectory};
use crate::inventory::{EntityKind, InventorySource, Scope};
use crate::model::Host;
use crate::sink::MetricsSink;
use tracing::debug;

/// Walk every datacenter, emit host gauges labelled with the owning cluster
/// and record host names and clock speeds for the VM pass.
pub async fn host_pass<S: InventorySource>(
    source: &S,
    sink: &MetricsSink,
    membership: &ClusterMembership,
) -> InventoryResult<PassResult<HostDirectory>> {
    let datacenters = source.datacenters().await?;

    let mut directory = HostDirectory::default();
    let mut tally = ScopeTally::new(EntityKind::Host);
    let mut emitted = 0;

    for dc in &datacenters {
        let hosts = match source.hosts(&Scope::datacenter(dc)).await {
            Ok(hosts) => hosts,
            Err(e) => {
                tally.failed(dc, &e);
                continue;
            }
        };
        tally.answered();

        for host in &hosts {
            directory.set_name(host.id.as_str(), host.name.as_str());
            if let Some(hw) = &host.hardware {
                directory.set_clock(host.name.as_str(), hw.cpu_mhz);
            }
            let cluster = membership.cluster_of(&host.id);
            emit(sink, host, &dc.name, cluster);
        }
        emitted += hosts.len();
    }

    let complete = tally.finish()?;
    debug!(
        "host pass: {} hosts in {} datacenters (complete: {})",
        emitted,
        datacenters.len(),
        complete
    );
    Ok(PassResult::new(directory, emitted, complete))
}

fn emit(sink: &MetricsSink, host: &Host, datacenter: &str, cluster: &str) {
    let labels = [host.name.as_str(), host.id.as_str(), datacenter, cluster];
    let e = Emitter::new(sink, &labels);

    e.gauge("host_available_pmem_bytes", host.usage.available_pmem_bytes);
    e.gauge("host_cpu_allocation_reservation_mhz", host.cpu_allocation.reservation);
    e.gauge("host_cpu_allocation_limit_mhz", host.cpu_allocation.limit);
    e.gauge("host_cpu_allocation_overhead_mhz", host.cpu_allocation.overhead_limit);
    e.gauge("host_cpu_usage_mhz", host.usage.cpu_mhz);
    e.gauge("host_cpu_free_mhz", host.free_cpu_mhz());
    e.gauge("host_memory_allocation_bytes", host.memory_allocation.reservation);
    e.gauge("host_memory_allocation_limit_bytes", host.memory_allocation.limit);
    e.gauge("host_memory_usage_bytes", host.usage.memory_bytes);
    e.gauge("host_memory_free_bytes", host.free_memory_bytes());
    e.gauge("host_uptime_seconds", host.usage.uptime_seconds);

    if let Some(hw) = &host.hardware {
        e.gauge("host_cpu_cores_total", hw.cpu_cores);
        e.gauge("host_cpu_core_mhz", hw.cpu_mhz);
        e.gauge("host_cpu_mhz_total", hw.cpu_total_mhz());
        e.gauge("host_cpu_threads_total", hw.cpu_threads);
        e.gauge("host_memory_bytes_total", hw.memory_bytes);
        e.gauge("host_nics_total", hw.nics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InventoryError;
    use crate::inventory::{InventorySnapshot, StaticInventory};
    use crate::sink::SeriesPolicy;
    use serde_json::json;

    fn inventory() -> StaticInventory {
        let snapshot: InventorySnapshot = serde_json::from_value(json!({
            "datacenters": [
                {
                    "id": "datacenter-1",
                    "name": "DC1",
                    "hosts": [
                        {
                            "id": "host-1",
                            "name": "esx01",
                            "hardware": { "cpu_mhz": 2000, "cpu_cores": 4, "cpu_threads": 8, "memory_bytes": 1000, "nics": 2 },
                            "usage": { "cpu_mhz": 9000, "memory_bytes": 400 },
                            "cpu_allocation": { "reservation": 100 }
                        },
                        { "id": "host-2", "name": "esx02" }
                    ]
                },
                {
                    "id": "datacenter-2",
                    "name": "DC2",
                    "hosts": [{ "id": "host-3", "name": "esx03" }]
                }
            ]
        }))
        .unwrap();
        StaticInventory::new(snapshot)
    }

    fn membership() -> ClusterMembership {
        let mut m = ClusterMembership::default();
        m.set("host-1", "Prod");
        m
    }

    #[tokio::test]
    async fn test_cluster_label_resolution() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        let result = host_pass(&inventory(), &sink, &membership()).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(result.entities, 3);
        assert_eq!(
            sink.value("host_cpu_core_mhz", &[("host_name", "esx01"), ("cluster_name", "Prod")]),
            Some(2000.0)
        );
        assert_eq!(
            sink.value("host_nics_total", &[("host_name", "esx01"), ("datacenter", "DC1")]),
            Some(2.0)
        );

        let directory = result.outcome.into_inner();
        assert_eq!(directory.name_of("host-3"), "esx03");
        assert_eq!(directory.clock_of("esx01"), 2000);
        assert_eq!(directory.clock_of("esx02"), 0);
    }

    #[tokio::test]
    async fn test_unclustered_host_gets_none() {
        let inv = inventory();
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        let mut snapshot = inv.snapshot();
        snapshot.datacenters[0].hosts[1].usage.uptime_seconds = Some(60);
        inv.replace(snapshot);

        host_pass(&inv, &sink, &membership()).await.unwrap();
        assert_eq!(
            sink.value("host_uptime_seconds", &[("host_name", "esx02"), ("cluster_name", "none")]),
            Some(60.0)
        );
    }

    #[tokio::test]
    async fn test_free_capacity_is_signed() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        host_pass(&inventory(), &sink, &membership()).await.unwrap();

        let esx01 = [("host_name", "esx01")];
        assert_eq!(sink.value("host_cpu_mhz_total", &esx01), Some(8000.0));
        assert_eq!(sink.value("host_cpu_free_mhz", &esx01), Some(-1000.0));
        assert_eq!(sink.value("host_memory_free_bytes", &esx01), Some(600.0));
    }

    #[tokio::test]
    async fn test_absent_allocations_produce_no_series() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        host_pass(&inventory(), &sink, &membership()).await.unwrap();

        assert_eq!(sink.series_count("host_cpu_allocation_reservation_mhz"), 1);
        assert_eq!(sink.series_count("host_cpu_allocation_limit_mhz"), 0);
        assert_eq!(sink.series_count("host_memory_allocation_bytes"), 0);
        // esx02 and esx03 report no hardware
        assert_eq!(sink.series_count("host_cpu_cores_total"), 1);
    }

    #[tokio::test]
    async fn test_partial_and_failed_datacenters() {
        let inv = inventory();
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();

        inv.fail_datacenter("datacenter-2");
        let result = host_pass(&inv, &sink, &membership()).await.unwrap();
        assert!(!result.is_complete());
        assert_eq!(result.entities, 2);

        inv.fail_datacenter("datacenter-1");
        let err = host_pass(&inv, &sink, &membership()).await.unwrap_err();
        assert!(matches!(err, InventoryError::AllScopesFailed { failed: 2, .. }));
    }
}
