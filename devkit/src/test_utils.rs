/*!
Test Harness pour l'exporter

Fait tourner de vrais cycles de collecte contre un inventaire en mémoire :
- scheduler, index et registre Prometheus réels, sans vCenter
- modification de l'inventaire et injection de pannes entre deux cycles
- assertions sur les séries exposées
*/

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use vmware_exporter::health::{ExporterHealth, HealthTracker};
use vmware_exporter::index::CrossReferenceIndex;
use vmware_exporter::inventory::{EntityKind, InventorySnapshot, StaticInventory};
use vmware_exporter::scheduler::PollScheduler;
use vmware_exporter::sink::{MetricsSink, SeriesPolicy};

/// Harness de test complet : un scheduler branché sur un `StaticInventory`
pub struct TestHarness {
    inventory: Arc<StaticInventory>,
    scheduler: PollScheduler<StaticInventory>,
}

impl TestHarness {
    /// Harness avec la politique par défaut (séries conservées)
    pub fn new(snapshot: InventorySnapshot) -> Result<Self> {
        Self::with_policy(snapshot, SeriesPolicy::Retain)
    }

    pub fn with_policy(snapshot: InventorySnapshot, policy: SeriesPolicy) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let inventory = Arc::new(StaticInventory::new(snapshot));
        let sink = Arc::new(MetricsSink::new(policy)?);
        let scheduler = PollScheduler::new(
            inventory.clone(),
            sink,
            HealthTracker::new(),
            Duration::from_secs(300),
        );
        Ok(Self { inventory, scheduler })
    }

    /// Exécute un cycle complet (cluster, datastore, host, vm)
    pub async fn cycle(&mut self) -> &mut Self {
        self.scheduler.run_cycle().await;
        log::info!("🔄 Cycle {} done", self.health().cycles_completed);
        self
    }

    /// Remplace l'inventaire servi au prochain cycle
    pub fn replace(&self, snapshot: InventorySnapshot) {
        self.inventory.replace(snapshot);
        log::info!("🔀 Inventory replaced");
    }

    pub fn fail(&self, kind: EntityKind) {
        self.inventory.fail(kind);
        log::info!("💥 {} fetches now fail", kind);
    }

    pub fn fail_datacenter(&self, dc_id: &str) {
        self.inventory.fail_datacenter(dc_id);
        log::info!("💥 datacenter {} now fails", dc_id);
    }

    pub fn recover_all(&self) {
        self.inventory.recover_all();
        log::info!("🩹 All faults cleared");
    }

    pub fn inventory(&self) -> &StaticInventory {
        &self.inventory
    }

    pub fn sink(&self) -> &MetricsSink {
        self.scheduler.sink()
    }

    pub fn index(&self) -> &CrossReferenceIndex {
        self.scheduler.index()
    }

    pub fn health(&self) -> ExporterHealth {
        self.scheduler.health().get_health()
    }

    /// Valeur de la première série de `metric` portant ces labels
    pub fn gauge(&self, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.sink().value(metric, labels)
    }

    pub fn series_count(&self, metric: &str) -> usize {
        self.sink().series_count(metric)
    }

    /// Exposition texte telle que servie sur /metrics
    pub fn exposition(&self) -> Result<String> {
        Ok(self.sink().encode()?)
    }

    /// Assert qu'une série existe avec la valeur attendue
    pub fn assert_gauge(&self, metric: &str, labels: &[(&str, &str)], expected: f64) -> Result<()> {
        match self.gauge(metric, labels) {
            Some(actual) if actual == expected => {
                log::info!("✅ {}{:?} = {}", metric, labels, expected);
                Ok(())
            }
            Some(actual) => {
                anyhow::bail!("{}{:?}: expected {}, got {}", metric, labels, expected, actual)
            }
            None => anyhow::bail!("{}{:?}: series not found", metric, labels),
        }
    }

    /// Assert qu'aucune série ne porte ces labels
    pub fn assert_absent(&self, metric: &str, labels: &[(&str, &str)]) -> Result<()> {
        if let Some(actual) = self.gauge(metric, labels) {
            anyhow::bail!("{}{:?}: expected no series, found value {}", metric, labels, actual);
        }
        log::info!("✅ {}{:?} absent", metric, labels);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::reference_inventory;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new(reference_inventory()).unwrap();
        harness.cycle().await;

        assert_eq!(harness.health().cycles_completed, 1);
        harness
            .assert_gauge("ds_capacity_bytes", &[("datastore_name", "datastore1")], 1000.0)
            .unwrap();
        harness
            .assert_absent("ds_capacity_bytes", &[("datastore_name", "datastore2")])
            .unwrap();
        assert!(harness
            .assert_gauge("ds_capacity_bytes", &[("datastore_name", "datastore1")], 1.0)
            .is_err());
        assert!(harness.exposition().unwrap().contains("vmware_exporter_cycles_total 1"));
    }
}
