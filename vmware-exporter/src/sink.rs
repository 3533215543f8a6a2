//! Metric emission sink
//!
//! Owns a `prometheus::Registry` with the fixed gauge catalogue. Passes write
//! into it with [`MetricsSink::record`]; the HTTP layer reads it with
//! [`MetricsSink::encode`]. Gauges are atomics so scrapes never wait on a
//! pass; only the series bookkeeping used for eviction sits behind a mutex.

use crate::collector::Pass;
use crate::error::SinkError;
use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, Opts, Registry, TextEncoder};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error};

pub const NAMESPACE: &str = "vmware";

pub const CLUSTER_LABELS: &[&str] = &["cluster_name", "cluster_id"];
pub const DATASTORE_LABELS: &[&str] = &["datastore_name", "datastore_type"];
pub const HOST_LABELS: &[&str] = &["host_name", "host_id", "datacenter", "cluster_name"];
pub const VM_LABELS: &[&str] = &["machine_name", "datacenter", "cluster_name"];
pub const VM_DATASTORE_LABELS: &[&str] = &[
    "machine_name",
    "host_name",
    "datacenter",
    "cluster_name",
    "datastore_id",
    "datastore_name",
];
pub const VM_DISK_LABELS: &[&str] = &[
    "machine_name",
    "host_name",
    "datacenter",
    "cluster_name",
    "disk_path",
];

/// What happens to series of entities that vanished from the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesPolicy {
    /// Keep the last value until the same label set is written again.
    #[default]
    Retain,
    /// Drop series not rewritten during a complete pass.
    Evict,
}

struct GaugeDef {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    pass: Pass,
}

const fn def(
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    pass: Pass,
) -> GaugeDef {
    GaugeDef { name, help, labels, pass }
}

const CATALOGUE: &[GaugeDef] = &[
    // clusters
    def("cluster_cpu_effective_mhz", "Effective CPU resources of the cluster", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_cpu_cores_total", "Number of physical CPU cores in the cluster", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_cpu_mhz_total", "Aggregated CPU resources of all hosts", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_hosts_effective_total", "Number of effective hosts", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_hosts_total", "Number of hosts in the cluster", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_memory_effective_bytes", "Effective memory resources of the cluster", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_memory_bytes_total", "Aggregated memory resources of all hosts", CLUSTER_LABELS, Pass::Cluster),
    def("cluster_threads_total", "Number of physical CPU threads in the cluster", CLUSTER_LABELS, Pass::Cluster),
    // datastores
    def("ds_capacity_bytes", "Datastore capacity", DATASTORE_LABELS, Pass::Datastore),
    def("ds_free_bytes", "Datastore free space", DATASTORE_LABELS, Pass::Datastore),
    // hosts
    def("host_available_pmem_bytes", "Available persistent memory", HOST_LABELS, Pass::Host),
    def("host_cpu_allocation_reservation_mhz", "CPU reservation of the host resource pool", HOST_LABELS, Pass::Host),
    def("host_cpu_allocation_limit_mhz", "CPU limit of the host resource pool", HOST_LABELS, Pass::Host),
    def("host_cpu_allocation_overhead_mhz", "CPU overhead limit of the host resource pool", HOST_LABELS, Pass::Host),
    def("host_cpu_cores_total", "Number of physical CPU cores", HOST_LABELS, Pass::Host),
    def("host_cpu_free_mhz", "Unused CPU capacity", HOST_LABELS, Pass::Host),
    def("host_cpu_usage_mhz", "CPU usage", HOST_LABELS, Pass::Host),
    def("host_cpu_core_mhz", "Clock speed of one CPU core", HOST_LABELS, Pass::Host),
    def("host_cpu_mhz_total", "Total CPU capacity", HOST_LABELS, Pass::Host),
    def("host_cpu_threads_total", "Number of physical CPU threads", HOST_LABELS, Pass::Host),
    def("host_memory_allocation_bytes", "Memory reservation of the host resource pool", HOST_LABELS, Pass::Host),
    def("host_memory_allocation_limit_bytes", "Memory limit of the host resource pool", HOST_LABELS, Pass::Host),
    def("host_memory_free_bytes", "Unused memory", HOST_LABELS, Pass::Host),
    def("host_memory_bytes_total", "Physical memory", HOST_LABELS, Pass::Host),
    def("host_memory_usage_bytes", "Memory usage", HOST_LABELS, Pass::Host),
    def("host_nics_total", "Number of network interfaces", HOST_LABELS, Pass::Host),
    def("host_uptime_seconds", "Host uptime", HOST_LABELS, Pass::Host),
    // virtual machines
    def("vm_cpu_allocation_limit_mhz", "CPU limit of the VM", VM_LABELS, Pass::Vm),
    def("vm_cpu_allocation_reservation_mhz", "CPU reservation of the VM", VM_LABELS, Pass::Vm),
    def("vm_cpu_entitled_mhz", "Static CPU entitlement", VM_LABELS, Pass::Vm),
    def("vm_cpu_mhz", "Clock speed of one core of the running host", VM_LABELS, Pass::Vm),
    def("vm_cpu_reservation_mhz", "CPU reservation from the VM summary", VM_LABELS, Pass::Vm),
    def("vm_cpu_usage_mhz", "CPU demand", VM_LABELS, Pass::Vm),
    def("vm_cpu_usage_max", "Maximum CPU usage the VM can reach", VM_LABELS, Pass::Vm),
    def("vm_cpu_cores_total", "Number of virtual CPUs", VM_LABELS, Pass::Vm),
    def("vm_cpu_mhz_total", "Overall CPU usage", VM_LABELS, Pass::Vm),
    def("vm_creation_date_seconds", "Creation time, unix seconds", VM_LABELS, Pass::Vm),
    def("vm_memory_active_bytes", "Active guest memory", VM_LABELS, Pass::Vm),
    def("vm_memory_allocation_limit_bytes", "Memory limit of the VM", VM_LABELS, Pass::Vm),
    def("vm_memory_allocation_reservation_bytes", "Memory reservation of the VM", VM_LABELS, Pass::Vm),
    def("vm_memory_granted_bytes", "Granted memory", VM_LABELS, Pass::Vm),
    def("vm_memory_reservation_bytes", "Memory reservation from the VM summary", VM_LABELS, Pass::Vm),
    def("vm_memory_used_bytes", "Guest memory usage", VM_LABELS, Pass::Vm),
    def("vm_memory_entitled_bytes", "Static memory entitlement", VM_LABELS, Pass::Vm),
    def("vm_memory_bytes_total", "Configured memory", VM_LABELS, Pass::Vm),
    def("vm_storage_committed_bytes", "Storage committed by the VM", VM_LABELS, Pass::Vm),
    def("vm_uptime_seconds", "VM uptime", VM_LABELS, Pass::Vm),
    def("vm_datastore_committed_bytes", "Storage committed on one datastore", VM_DATASTORE_LABELS, Pass::Vm),
    def("vm_datastore_uncommitted_bytes", "Storage that could still be committed on one datastore", VM_DATASTORE_LABELS, Pass::Vm),
    def("vm_disk_capacity_bytes", "Guest disk capacity", VM_DISK_LABELS, Pass::Vm),
    def("vm_disk_free_space_bytes", "Guest disk free space", VM_DISK_LABELS, Pass::Vm),
    def("vm_disk_mapping_key", "Virtual disk key backing the guest disk", VM_DISK_LABELS, Pass::Vm),
];

struct Entry {
    gauge: GaugeVec,
    labels: usize,
    pass: Pass,
}

#[derive(Default)]
struct SeriesBook {
    live: HashSet<Vec<String>>,
    touched: HashSet<Vec<String>>,
}

struct SelfMetrics {
    pass_duration: GaugeVec,
    pass_success: GaugeVec,
    pass_entities: GaugeVec,
    cycles: IntCounter,
    last_cycle: Gauge,
}

pub struct MetricsSink {
    registry: Registry,
    policy: SeriesPolicy,
    gauges: HashMap<&'static str, Entry>,
    series: Mutex<HashMap<&'static str, SeriesBook>>,
    own: SelfMetrics,
}

impl MetricsSink {
    pub fn new(policy: SeriesPolicy) -> Result<Self, SinkError> {
        let registry = Registry::new();

        let mut gauges = HashMap::with_capacity(CATALOGUE.len());
        for d in CATALOGUE {
            let gauge = GaugeVec::new(Opts::new(d.name, d.help).namespace(NAMESPACE), d.labels)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(
                d.name,
                Entry {
                    gauge,
                    labels: d.labels.len(),
                    pass: d.pass,
                },
            );
        }

        let own = SelfMetrics {
            pass_duration: GaugeVec::new(
                Opts::new("exporter_pass_duration_seconds", "Duration of the last run of each pass")
                    .namespace(NAMESPACE),
                &["pass"],
            )?,
            pass_success: GaugeVec::new(
                Opts::new("exporter_pass_success", "Whether the last run of each pass succeeded")
                    .namespace(NAMESPACE),
                &["pass"],
            )?,
            pass_entities: GaugeVec::new(
                Opts::new("exporter_pass_entities", "Entities emitted by the last run of each pass")
                    .namespace(NAMESPACE),
                &["pass"],
            )?,
            cycles: IntCounter::with_opts(
                Opts::new("exporter_cycles_total", "Completed collection cycles").namespace(NAMESPACE),
            )?,
            last_cycle: Gauge::with_opts(
                Opts::new(
                    "exporter_last_cycle_timestamp_seconds",
                    "End of the last collection cycle, unix seconds",
                )
                .namespace(NAMESPACE),
            )?,
        };
        registry.register(Box::new(own.pass_duration.clone()))?;
        registry.register(Box::new(own.pass_success.clone()))?;
        registry.register(Box::new(own.pass_entities.clone()))?;
        registry.register(Box::new(own.cycles.clone()))?;
        registry.register(Box::new(own.last_cycle.clone()))?;

        debug!("registered {} gauges ({:?} policy)", gauges.len(), policy);
        Ok(Self {
            registry,
            policy,
            gauges,
            series: Mutex::new(HashMap::new()),
            own,
        })
    }

    pub fn policy(&self) -> SeriesPolicy {
        self.policy
    }

    /// Set one series. `labels` follow the metric's label order; the previous
    /// value of the same label set is overwritten.
    pub fn record(&self, metric: &str, labels: &[&str], value: f64) {
        let Some((&name, entry)) = self.gauges.get_key_value(metric) else {
            debug_assert!(false, "unknown metric {metric}");
            error!("dropping sample for unknown metric {}", metric);
            return;
        };
        if labels.len() != entry.labels {
            debug_assert!(false, "{metric}: expected {} labels, got {}", entry.labels, labels.len());
            error!(
                "dropping sample for {}: expected {} labels, got {}",
                metric,
                entry.labels,
                labels.len()
            );
            return;
        }

        entry.gauge.with_label_values(labels).set(value);

        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let mut series = self.series.lock();
        let book = series.entry(name).or_default();
        book.touched.insert(key.clone());
        book.live.insert(key);
    }

    /// Start tracking which series `pass` rewrites.
    pub fn begin_pass(&self, pass: Pass) {
        let mut series = self.series.lock();
        for (name, book) in series.iter_mut() {
            if self.pass_of(name) == Some(pass) {
                book.touched.clear();
            }
        }
    }

    /// Close `pass`. Under [`SeriesPolicy::Evict`], a complete pass drops
    /// every series of its metrics that it did not rewrite. Returns the
    /// number of series removed.
    pub fn finish_pass(&self, pass: Pass, complete: bool) -> usize {
        if self.policy != SeriesPolicy::Evict || !complete {
            return 0;
        }
        let mut removed = 0;
        let mut series = self.series.lock();
        for (name, book) in series.iter_mut() {
            let Some(entry) = self.gauges.get(name) else { continue };
            if entry.pass != pass {
                continue;
            }
            let stale: Vec<Vec<String>> = book.live.difference(&book.touched).cloned().collect();
            for key in stale {
                let values: Vec<&str> = key.iter().map(String::as_str).collect();
                if let Err(e) = entry.gauge.remove_label_values(&values) {
                    debug!("{}: series already gone: {}", name, e);
                }
                book.live.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("{} pass evicted {} stale series", pass, removed);
        }
        removed
    }

    fn pass_of(&self, metric: &str) -> Option<Pass> {
        self.gauges.get(metric).map(|e| e.pass)
    }

    pub fn observe_pass(&self, pass: Pass, elapsed: Duration, ok: bool, entities: usize) {
        let label = [pass.as_str()];
        self.own.pass_duration.with_label_values(&label).set(elapsed.as_secs_f64());
        self.own.pass_success.with_label_values(&label).set(if ok { 1.0 } else { 0.0 });
        if ok {
            self.own.pass_entities.with_label_values(&label).set(entities as f64);
        }
    }

    pub fn cycle_finished(&self, unix_seconds: f64) {
        self.own.cycles.inc();
        self.own.last_cycle.set(unix_seconds);
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, SinkError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Current value of the first series of `metric` (short name, without
    /// namespace) whose labels contain every pair of `labels`.
    pub fn value(&self, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let full = format!("{NAMESPACE}_{metric}");
        self.registry
            .gather()
            .into_iter()
            .find(|mf| mf.get_name() == full)?
            .get_metric()
            .iter()
            .find(|m| {
                labels.iter().all(|(k, v)| {
                    m.get_label()
                        .iter()
                        .any(|lp| lp.get_name() == *k && lp.get_value() == *v)
                })
            })
            .map(|m| m.get_gauge().get_value())
    }

    /// Number of series currently exposed for `metric`.
    pub fn series_count(&self, metric: &str) -> usize {
        let full = format!("{NAMESPACE}_{metric}");
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.get_name() == full)
            .map(|mf| mf.get_metric().len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_labels(name: &str) -> [&str; 4] {
        [name, "host-1", "DC1", "Prod"]
    }

    #[test]
    fn test_record_overwrites_series() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        sink.record("host_cpu_usage_mhz", &host_labels("esx01"), 100.0);
        sink.record("host_cpu_usage_mhz", &host_labels("esx01"), 250.0);

        assert_eq!(sink.series_count("host_cpu_usage_mhz"), 1);
        assert_eq!(
            sink.value("host_cpu_usage_mhz", &[("host_name", "esx01")]),
            Some(250.0)
        );
    }

    #[test]
    fn test_value_matches_label_subset() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        sink.record("ds_capacity_bytes", &["datastore1", "VMFS"], 10.0);
        sink.record("ds_capacity_bytes", &["datastore2", "NFS"], 20.0);

        assert_eq!(sink.value("ds_capacity_bytes", &[("datastore_type", "NFS")]), Some(20.0));
        assert_eq!(sink.value("ds_capacity_bytes", &[("datastore_name", "nope")]), None);
        assert_eq!(sink.value("ds_free_bytes", &[]), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "expected 4 labels")]
    fn test_label_count_mismatch_asserts_in_debug() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        sink.record("host_cpu_usage_mhz", &["esx01"], 1.0);
    }

    #[test]
    fn test_retain_keeps_unwritten_series() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        sink.begin_pass(Pass::Host);
        sink.record("host_uptime_seconds", &host_labels("esx01"), 1.0);
        sink.record("host_uptime_seconds", &host_labels("esx02"), 1.0);
        sink.finish_pass(Pass::Host, true);

        sink.begin_pass(Pass::Host);
        sink.record("host_uptime_seconds", &host_labels("esx01"), 2.0);
        assert_eq!(sink.finish_pass(Pass::Host, true), 0);

        assert_eq!(sink.series_count("host_uptime_seconds"), 2);
    }

    #[test]
    fn test_evict_drops_unwritten_series_after_complete_pass() {
        let sink = MetricsSink::new(SeriesPolicy::Evict).unwrap();
        sink.begin_pass(Pass::Host);
        sink.record("host_uptime_seconds", &host_labels("esx01"), 1.0);
        sink.record("host_uptime_seconds", &host_labels("esx02"), 1.0);
        sink.record("ds_free_bytes", &["datastore1", "VMFS"], 5.0);
        sink.finish_pass(Pass::Host, true);

        sink.begin_pass(Pass::Host);
        sink.record("host_uptime_seconds", &host_labels("esx01"), 2.0);
        assert_eq!(sink.finish_pass(Pass::Host, true), 1);

        assert_eq!(sink.series_count("host_uptime_seconds"), 1);
        assert_eq!(sink.value("host_uptime_seconds", &[("host_name", "esx02")]), None);
        // other passes' series are untouched
        assert_eq!(sink.series_count("ds_free_bytes"), 1);
    }

    #[test]
    fn test_evict_skips_partial_pass() {
        let sink = MetricsSink::new(SeriesPolicy::Evict).unwrap();
        sink.begin_pass(Pass::Datastore);
        sink.record("ds_free_bytes", &["datastore1", "VMFS"], 5.0);
        sink.finish_pass(Pass::Datastore, true);

        sink.begin_pass(Pass::Datastore);
        assert_eq!(sink.finish_pass(Pass::Datastore, false), 0);
        assert_eq!(sink.series_count("ds_free_bytes"), 1);
    }

    #[test]
    fn test_encode_exposes_namespaced_text() {
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();
        sink.record("cluster_hosts_total", &["Prod", "domain-c1"], 3.0);
        sink.observe_pass(Pass::Cluster, Duration::from_millis(1500), true, 1);
        sink.cycle_finished(1_700_000_000.0);

        let text = sink.encode().unwrap();
        assert!(text.contains("# TYPE vmware_cluster_hosts_total gauge"));
        assert!(text.contains("cluster_name=\"Prod\""));
        assert!(text.contains("vmware_exporter_pass_duration_seconds{pass=\"cluster\"} 1.5"));
        assert!(text.contains("vmware_exporter_cycles_total 1"));
    }
}
