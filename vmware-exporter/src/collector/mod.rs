//! Collection passes
//!
//! One pass per entity type, run in this order every cycle:
//!
//! 1. clusters: emits cluster gauges, produces [`ClusterMembership`]
//! 2. datastores: emits datastore gauges, produces [`DatastoreNames`]
//! 3. hosts: consumes the membership, produces [`HostDirectory`]
//! 4. virtual machines: consumes all three tables
//!
//! A pass only reports what it fetched; deciding what to keep from it is the
//! scheduler's business.
//!
//! [`ClusterMembership`]: crate::index::ClusterMembership
//! [`DatastoreNames`]: crate::index::DatastoreNames
//! [`HostDirectory`]: crate::index::HostDirectory

mod clusters;
mod datastores;
mod hosts;
mod vms;

pub use clusters::cluster_pass;
pub use datastores::datastore_pass;
pub use hosts::host_pass;
pub use vms::vm_pass;

use crate::error::{InventoryError, InventoryResult};
use crate::index::PassOutcome;
use crate::inventory::EntityKind;
use crate::model::Datacenter;
use crate::sink::MetricsSink;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Cluster,
    Datastore,
    Host,
    Vm,
}

impl Pass {
    pub const ORDER: [Pass; 4] = [Pass::Cluster, Pass::Datastore, Pass::Host, Pass::Vm];

    pub fn as_str(self) -> &'static str {
        match self {
            Pass::Cluster => "cluster",
            Pass::Datastore => "datastore",
            Pass::Host => "host",
            Pass::Vm => "vm",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table produced by a pass plus the number of entities it emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct PassResult<T> {
    pub outcome: PassOutcome<T>,
    pub entities: usize,
}

impl<T> PassResult<T> {
    fn new(table: T, entities: usize, complete: bool) -> Self {
        let outcome = if complete {
            PassOutcome::Complete(table)
        } else {
            PassOutcome::Partial(table)
        };
        Self { outcome, entities }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_complete()
    }
}

/// Per-datacenter bookkeeping of the host and VM passes.
struct ScopeTally {
    kind: EntityKind,
    answered: usize,
    failed: usize,
}

impl ScopeTally {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            answered: 0,
            failed: 0,
        }
    }

    fn answered(&mut self) {
        self.answered += 1;
    }

    fn failed(&mut self, dc: &Datacenter, err: &InventoryError) {
        warn!("Skipping datacenter {} for {} fetch: {}", dc.name, self.kind, err);
        self.failed += 1;
    }

    /// `Ok(true)` when every datacenter answered, `Ok(false)` when some did,
    /// an error when none did.
    fn finish(self) -> InventoryResult<bool> {
        if self.failed > 0 && self.answered == 0 {
            return Err(InventoryError::AllScopesFailed {
                kind: self.kind,
                failed: self.failed,
            });
        }
        Ok(self.failed == 0)
    }
}

/// Writes gauges sharing one label set, skipping absent values.
struct Emitter<'a> {
    sink: &'a MetricsSink,
    labels: &'a [&'a str],
}

impl<'a> Emitter<'a> {
    fn new(sink: &'a MetricsSink, labels: &'a [&'a str]) -> Self {
        Self { sink, labels }
    }

    fn gauge(&self, metric: &str, value: impl Into<Option<i64>>) {
        if let Some(v) = value.into() {
            self.sink.record(metric, self.labels, v as f64);
        }
    }
}
