/**
 * SANTÉ DE L'EXPORTER - Suivi de l'état du scheduler
 *
 * RÔLE : Garde la trace de ce que fait la boucle de collecte (état courant,
 * cycles terminés, résultat de la dernière exécution de chaque passe) pour
 * l'exposer sur GET /status.
 *
 * UTILITÉ : Diagnostiquer un exporter qui sert des métriques figées sans
 * devoir lire ses logs.
 */

use crate::collector::Pass;
use crate::scheduler::SchedulerState;
use crate::state::{new_state, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassStatus {
    pub pass: String,
    pub success: bool,
    pub duration_ms: u64,
    pub entities: usize,
    pub error: Option<String>,
    pub finished_at: String, // RFC3339
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExporterHealth {
    pub uptime_seconds: u64,
    pub cycles_completed: u64,
    pub state: SchedulerState,
    pub passes: Vec<PassStatus>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    cycles: Arc<AtomicU64>,
    state: Shared<SchedulerState>,
    passes: Shared<HashMap<Pass, PassStatus>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: Arc::new(AtomicU64::new(0)),
            state: new_state(SchedulerState::Idle),
            passes: new_state(HashMap::new()),
        }
    }

    pub fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    pub fn record_pass(&self, pass: Pass, elapsed: Duration, outcome: Result<usize, String>) {
        let finished_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let (success, entities, error) = match outcome {
            Ok(n) => (true, n, None),
            Err(e) => (false, 0, Some(e)),
        };
        let status = PassStatus {
            pass: pass.to_string(),
            success,
            duration_ms: elapsed.as_millis() as u64,
            entities,
            error,
            finished_at,
        };
        self.passes.lock().insert(pass, status);
    }

    pub fn cycle_completed(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> ExporterHealth {
        let passes = self.passes.lock();
        // ordre d'exécution, pas l'ordre de la HashMap
        let passes = Pass::ORDER
            .iter()
            .filter_map(|p| passes.get(p).cloned())
            .collect();

        ExporterHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            cycles_completed: self.cycles.load(Ordering::Relaxed),
            state: self.state(),
            passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_status_in_run_order() {
        let health = HealthTracker::new();
        health.record_pass(Pass::Vm, Duration::from_millis(30), Ok(12));
        health.record_pass(Pass::Cluster, Duration::from_millis(5), Err("boom".into()));
        health.cycle_completed();

        let report = health.get_health();
        assert_eq!(report.cycles_completed, 1);
        assert_eq!(report.passes.len(), 2);
        assert_eq!(report.passes[0].pass, "cluster");
        assert!(!report.passes[0].success);
        assert_eq!(report.passes[0].error.as_deref(), Some("boom"));
        assert_eq!(report.passes[1].entities, 12);
        assert!(OffsetDateTime::parse(&report.passes[1].finished_at, &Rfc3339).is_ok());
    }

    #[test]
    fn test_state_is_shared_between_clones() {
        let health = HealthTracker::new();
        let clone = health.clone();
        clone.set_state(SchedulerState::HostPass);
        assert_eq!(health.state(), SchedulerState::HostPass);
    }
}
