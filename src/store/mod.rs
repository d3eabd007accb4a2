//! Persistence boundary for completed sessions.
//!
//! The acquisition core hands a [`SessionResult`] to a [`ResultSink`] and gets
//! back per-sensor counts. Which backend receives it is decided here, never in
//! the core.

pub mod export;
pub mod gateway;
pub mod local;
pub mod routing;

pub use export::{export_records, write_records, ExportFormat, ExportRecord};
pub use gateway::{GatewayConfig, GatewayError, GatewayResponse};
pub use local::{LocalStore, SessionSummary};
pub use routing::PreferRemote;

#[cfg(feature = "gateway")]
pub use gateway::{BlockingGatewayClient, GatewayClient};

use crate::core::SessionResult;
use serde::{Deserialize, Serialize};

/// What a sink reports back after persisting one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReport {
    pub diagnoses_saved: usize,
    pub diagnoses_failed: usize,
    pub samples_saved: usize,
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Accepts completed sessions.
pub trait ResultSink {
    fn persist(&self, result: &SessionResult) -> Result<PersistReport, StoreError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}
