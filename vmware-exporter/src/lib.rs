//! vSphere inventory exporter
//!
//! Snapshots a vCenter inventory on a fixed interval and republishes it as
//! labelled Prometheus gauges. The binary in `main.rs` wires these modules
//! together; the devkit drives them directly in tests.

pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod index;
pub mod inventory;
pub mod model;
pub mod scheduler;
pub mod sink;
pub mod state;
