//! IMU Drift Monitor - live drift diagnosis for multi-sensor inertial rigs.
//!
//! This library ingests a live IMU telemetry stream, collects a fixed window of
//! samples per session, extracts kinematic features per sensor and classifies
//! each sensor as normal or faulty with an injected drift model.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       IMU Drift Monitor                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────────┐  │
//! │  │ Supervisor │──▶│   Sample   │──▶│ Windowing → Features  │  │
//! │  │ (receive)  │   │   Buffer   │   │  → Drift classifier   │  │
//! │  └────────────┘   └────────────┘   └───────────────────────┘  │
//! │        │                                       │              │
//! │        ▼                                       ▼              │
//! │  ┌────────────────────────────┐        ┌──────────────┐       │
//! │  │ Acquisition state machine  │───────▶│ SessionResult│──▶ store
//! │  └────────────────────────────┘        └──────────────┘       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imu_drift_monitor::{
//!     AcquisitionStateMachine, Config, IngestStats, LinearDriftModel, WebSocketConnector,
//! };
//!
//! let config = Config::load().unwrap_or_default();
//! let connector = Arc::new(WebSocketConnector::new(config.telemetry_url.clone()));
//! let mut machine =
//!     AcquisitionStateMachine::new(config.clone(), connector, Arc::new(IngestStats::new()))
//!         .expect("failed to create state machine");
//!
//! let model = LinearDriftModel::load(&config.model_path).expect("failed to load model");
//! machine.load_model(Arc::new(model));
//! machine.start().expect("failed to start session");
//!
//! if let Some(outcome) = machine.run_to_completion() {
//!     println!("{:?}", outcome.session().status);
//! }
//! ```

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod core;
pub mod stats;
pub mod store;
pub mod stream;

// Re-export key types at crate root for convenience
pub use acquisition::{AcquisitionStateMachine, CancelHandle, ConfigureError, StartError};
pub use buffer::{BufferMetrics, SampleBuffer};
pub use config::{Config, ConfigError, SessionConfig};
pub use crate::core::{
    analyze, AnalysisConfig, AnalysisFailure, Axis, DiagnosisResult, DriftModel, FailureReason,
    FeatureVector, FnDriftModel, LinearDriftModel, RawPrediction, SensorSkip, Session,
    SessionOutcome, SessionResult, SessionStatus, Verdict,
};
pub use stats::{IngestStats, SharedStats, StatsSnapshot};
pub use store::{LocalStore, PersistReport, PreferRemote, ResultSink, StoreError};
pub use stream::{
    Connector, ReplayConnector, Sample, StreamSupervisor, TransportError, WebSocketConnector,
};

// Gateway re-exports (when enabled)
#[cfg(feature = "gateway")]
pub use store::{BlockingGatewayClient, GatewayClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
