//! Analysis core.
//!
//! This module contains:
//! - Per-sensor window selection
//! - Kinematic feature extraction
//! - The drift model adapter and classifier
//! - Session and result types

pub mod analysis;
pub mod classifier;
pub mod features;
pub mod model;
pub mod session;
pub mod windowing;

// Re-export commonly used types
pub use analysis::{
    analyze, analyze_sensor, AnalysisConfig, AnalysisFailure, AnalysisReport, SensorSkip,
    DEFAULT_SENSOR_COUNT,
};
pub use classifier::{
    classify, diagnose, Axis, DiagnosisResult, DriftEstimate, Verdict, DEFAULT_FAULT_THRESHOLD,
};
pub use features::{compute_features, FeatureVector, FeatureWindow, FEATURE_NAMES};
pub use model::{
    DriftModel, FnDriftModel, LinearDriftModel, ModelError, PredictionError, RawPrediction,
};
pub use session::{
    FailureReason, Producer, Session, SessionFailure, SessionOutcome, SessionResult,
    SessionStatus, Transition, PRODUCER_NAME,
};
pub use windowing::{select_window, AnalysisWindow, WindowSpec};
