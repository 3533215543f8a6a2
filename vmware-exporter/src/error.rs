//! Error types for the exporter.
//!
//! Only connection-fatal errors ever reach `main`; everything raised during a
//! poll cycle is logged by the scheduler and the cycle carries on.

use crate::inventory::EntityKind;

/// Failures talking to the inventory source.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vSphere returned {status} for {method}: {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },
    #[error("Login rejected: {0}")]
    Login(String),
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Fixture IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("{kind} inventory unavailable")]
    Unavailable { kind: EntityKind },
    #[error("all {failed} datacenter(s) failed during the {kind} fetch")]
    AllScopesFailed { kind: EntityKind, failed: usize },
}

/// Failures building or encoding the metrics registry.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Exposition is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Configuration problems detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub type InventoryResult<T> = Result<T, InventoryError>;
