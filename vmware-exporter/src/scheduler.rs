//! Poll scheduler
//!
//! Runs the four passes in order, once per interval, on a single task.
//! A failing pass is logged and recorded; the cycle moves on to the next pass,
//! which then resolves relations against the last accepted tables.
//! Cancellation is honoured between cycles and while sleeping, never in the
//! middle of a pass.

use crate::collector::{cluster_pass, datastore_pass, host_pass, vm_pass, Pass, PassResult};
use crate::error::InventoryResult;
use crate::health::HealthTracker;
use crate::index::{CrossReferenceIndex, PassOutcome};
use crate::inventory::InventorySource;
use crate::sink::MetricsSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    ClusterPass,
    DatastorePass,
    HostPass,
    VmPass,
    Sleeping,
    Terminated,
}

impl From<Pass> for SchedulerState {
    fn from(pass: Pass) -> Self {
        match pass {
            Pass::Cluster => SchedulerState::ClusterPass,
            Pass::Datastore => SchedulerState::DatastorePass,
            Pass::Host => SchedulerState::HostPass,
            Pass::Vm => SchedulerState::VmPass,
        }
    }
}

pub struct PollScheduler<S> {
    source: Arc<S>,
    sink: Arc<MetricsSink>,
    health: HealthTracker,
    index: CrossReferenceIndex,
    interval: Duration,
}

impl<S: InventorySource> PollScheduler<S> {
    pub fn new(
        source: Arc<S>,
        sink: Arc<MetricsSink>,
        health: HealthTracker,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            health,
            index: CrossReferenceIndex::default(),
            interval,
        }
    }

    pub fn index(&self) -> &CrossReferenceIndex {
        &self.index
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn sink(&self) -> &Arc<MetricsSink> {
        &self.sink
    }

    /// One full cycle: cluster, datastore, host then VM pass.
    pub async fn run_cycle(&mut self) {
        let cycle_start = Instant::now();

        let started = self.begin(Pass::Cluster);
        let result = cluster_pass(&*self.source, &self.sink).await;
        if let Some(outcome) = self.conclude(Pass::Cluster, started, result) {
            self.index.accept_membership(outcome);
        }

        let started = self.begin(Pass::Datastore);
        let result = datastore_pass(&*self.source, &self.sink).await;
        if let Some(outcome) = self.conclude(Pass::Datastore, started, result) {
            self.index.accept_datastores(outcome);
        }

        let started = self.begin(Pass::Host);
        let result = host_pass(&*self.source, &self.sink, &self.index.membership).await;
        if let Some(outcome) = self.conclude(Pass::Host, started, result) {
            self.index.accept_hosts(outcome);
        }

        let started = self.begin(Pass::Vm);
        let result = vm_pass(&*self.source, &self.sink, &self.index).await;
        self.conclude(Pass::Vm, started, result);

        let now = OffsetDateTime::now_utc().unix_timestamp() as f64;
        self.sink.cycle_finished(now);
        self.health.cycle_completed();
        info!("Cycle completed in {:.2}s", cycle_start.elapsed().as_secs_f64());
    }

    fn begin(&self, pass: Pass) -> Instant {
        self.health.set_state(pass.into());
        self.sink.begin_pass(pass);
        Instant::now()
    }

    fn conclude<T>(
        &self,
        pass: Pass,
        started: Instant,
        result: InventoryResult<PassResult<T>>,
    ) -> Option<PassOutcome<T>> {
        let elapsed = started.elapsed();
        match result {
            Ok(run) => {
                let complete = run.is_complete();
                let evicted = self.sink.finish_pass(pass, complete);
                info!(
                    "{} pass: {} entities in {:.2}s{}{}",
                    pass,
                    run.entities,
                    elapsed.as_secs_f64(),
                    if complete { "" } else { " (partial)" },
                    if evicted > 0 {
                        format!(", {evicted} stale series evicted")
                    } else {
                        String::new()
                    }
                );
                self.sink.observe_pass(pass, elapsed, true, run.entities);
                self.health.record_pass(pass, elapsed, Ok(run.entities));
                Some(run.outcome)
            }
            Err(e) => {
                self.sink.finish_pass(pass, false);
                warn!("{} pass failed after {:.2}s: {}", pass, elapsed.as_secs_f64(), e);
                self.sink.observe_pass(pass, elapsed, false, 0);
                self.health.record_pass(pass, elapsed, Err(e.to_string()));
                None
            }
        }
    }

    /// Cycle until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Poll scheduler started (interval {}s)", self.interval.as_secs());
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.run_cycle().await;

            self.health.set_state(SchedulerState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        self.health.set_state(SchedulerState::Terminated);
        info!("Poll scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{EntityKind, InventorySnapshot, StaticInventory};
    use crate::sink::SeriesPolicy;
    use serde_json::json;

    fn snapshot() -> InventorySnapshot {
        serde_json::from_value(json!({
            "datacenters": [{
                "id": "datacenter-1",
                "name": "DC1",
                "clusters": [{ "id": "domain-c1", "name": "Prod", "host_ids": ["host-1"] }],
                "datastores": [{ "id": "datastore-11", "name": "datastore1", "kind": "VMFS", "capacity_bytes": 10, "free_bytes": 5 }],
                "hosts": [{
                    "id": "host-1",
                    "name": "esx01",
                    "hardware": { "cpu_mhz": 2000, "cpu_cores": 2, "cpu_threads": 4, "memory_bytes": 100 }
                }],
                "virtual_machines": [{ "id": "vm-1", "name": "web01", "host_id": "host-1" }]
            }]
        }))
        .unwrap()
    }

    fn scheduler(inv: Arc<StaticInventory>) -> PollScheduler<StaticInventory> {
        let sink = Arc::new(MetricsSink::new(SeriesPolicy::Retain).unwrap());
        PollScheduler::new(inv, sink, HealthTracker::new(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_cycle_fills_index_and_health() {
        let mut s = scheduler(Arc::new(StaticInventory::new(snapshot())));
        s.run_cycle().await;

        assert_eq!(s.index().membership.cluster_of("host-1"), "Prod");
        assert_eq!(s.index().hosts.clock_of("esx01"), 2000);
        assert_eq!(s.index().datastores.name_of("datastore-11"), "datastore1");

        let report = s.health().get_health();
        assert_eq!(report.cycles_completed, 1);
        assert!(report.passes.iter().all(|p| p.success));
        assert_eq!(s.sink().value("exporter_pass_success", &[("pass", "vm")]), Some(1.0));
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_relations_and_later_passes_run() {
        let inv = Arc::new(StaticInventory::new(snapshot()));
        let mut s = scheduler(inv.clone());
        s.run_cycle().await;

        inv.fail(EntityKind::Cluster);
        s.run_cycle().await;

        assert_eq!(s.index().membership.cluster_of("host-1"), "Prod");
        assert_eq!(
            s.sink().value("vm_cpu_mhz", &[("machine_name", "web01"), ("cluster_name", "Prod")]),
            Some(2000.0)
        );
        assert_eq!(s.sink().value("exporter_pass_success", &[("pass", "cluster")]), Some(0.0));
        assert_eq!(s.sink().value("exporter_pass_success", &[("pass", "host")]), Some(1.0));
        assert_eq!(s.health().get_health().cycles_completed, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let inv = Arc::new(StaticInventory::new(snapshot()));
        let s = scheduler(inv);
        let health = s.health().clone();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(s.run(cancel.clone()));
        for _ in 0..100 {
            if health.state() == SchedulerState::Sleeping {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(health.get_health().cycles_completed, 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(health.state(), SchedulerState::Terminated);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_cycle() {
        let s = scheduler(Arc::new(StaticInventory::new(snapshot())));
        let health = s.health().clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        s.run(cancel).await;
        assert_eq!(health.get_health().cycles_completed, 0);
        assert_eq!(health.state(), SchedulerState::Terminated);
    }
}
