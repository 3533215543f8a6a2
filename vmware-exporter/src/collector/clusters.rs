use super::{Emitter, PassResult};
use crate::error::InventoryResult;
use crate::index::ClusterMembership;
use crate::inventory::{InventorySource, Scope};
use crate::model::Cluster;
use crate::sink::MetricsSink;
use tracing::debug;

/// Fetch every cluster, emit its capacity summary and record which cluster
/// owns each host.
pub async fn cluster_pass<S: InventorySource>(
    source: &S,
    sink: &MetricsSink,
) -> InventoryResult<PassResult<ClusterMembership>> {
    let clusters = source.clusters(&Scope::Root).await?;

    let mut membership = ClusterMembership::default();
    for cluster in &clusters {
        for host_id in &cluster.host_ids {
            membership.set(host_id.as_str(), cluster.name.as_str());
        }
        emit(sink, cluster);
    }

    debug!(
        "cluster pass: {} clusters, {} member hosts",
        clusters.len(),
        membership.len()
    );
    Ok(PassResult::new(membership, clusters.len(), true))
}

fn emit(sink: &MetricsSink, cluster: &Cluster) {
    let labels = [cluster.name.as_str(), cluster.id.as_str()];
    let e = Emitter::new(sink, &labels);
    let s = &cluster.summary;

    e.gauge("cluster_cpu_effective_mhz", s.effective_cpu_mhz);
    e.gauge("cluster_cpu_cores_total", s.cpu_cores);
    e.gauge("cluster_cpu_mhz_total", s.total_cpu_mhz);
    e.gauge("cluster_hosts_effective_total", s.effective_hosts);
    e.gauge("cluster_hosts_total", s.total_hosts);
    e.gauge("cluster_memory_effective_bytes", s.effective_memory_bytes);
    e.gauge("cluster_memory_bytes_total", s.total_memory_bytes);
    e.gauge("cluster_threads_total", s.cpu_threads);
}
