use super::{Emitter, PassResult};
use crate::error::InventoryResult;
use crate::index::DatastoreNames;
use crate::inventory::{InventorySource, Scope};
use crate::sink::MetricsSink;
use tracing::debug;

/// Fetch every datastore, emit capacity and free space and record the
/// display name of each datastore id.
pub async fn datastore_pass<S: InventorySource>(
    source: &S,
    sink: &MetricsSink,
) -> InventoryResult<PassResult<DatastoreNames>> {
    let datastores = source.datastores(&Scope::Root).await?;

    let mut names = DatastoreNames::default();
    for ds in &datastores {
        names.set(ds.id.as_str(), ds.name.as_str());

        let labels = [ds.name.as_str(), ds.kind.as_str()];
        let e = Emitter::new(sink, &labels);
        e.gauge("ds_capacity_bytes", ds.capacity_bytes);
        e.gauge("ds_free_bytes", ds.free_bytes);
    }

    debug!("datastore pass: {} datastores", datastores.len());
    Ok(PassResult::new(names, datastores.len(), true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventorySnapshot, StaticInventory};
    use crate::sink::SeriesPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn test_names_and_gauges() {
        let snapshot: InventorySnapshot = serde_json::from_value(json!({
            "datacenters": [{
                "id": "datacenter-1",
                "name": "DC1",
                "datastores": [
                    { "id": "datastore-11", "name": "datastore1", "kind": "VMFS", "capacity_bytes": 1000, "free_bytes": 400 },
                    { "id": "datastore-12", "name": "nfs01", "kind": "NFS", "capacity_bytes": 5000, "free_bytes": 5000 }
                ]
            }]
        }))
        .unwrap();
        let sink = MetricsSink::new(SeriesPolicy::Retain).unwrap();

        let result = datastore_pass(&StaticInventory::new(snapshot), &sink).await.unwrap();
        let names = result.outcome.into_inner();

        assert_eq!(names.name_of("datastore-11"), "datastore1");
        assert_eq!(names.name_of("datastore-99"), "unknown");
        assert_eq!(
            sink.value("ds_free_bytes", &[("datastore_name", "datastore1"), ("datastore_type", "VMFS")]),
            Some(400.0)
        );
        assert_eq!(sink.series_count("ds_capacity_bytes"), 2);
    }
}
