//! One analysis pass over a buffer snapshot.
//!
//! Each sensor in `0..sensor_count` goes through window selection, feature
//! extraction and classification on its own. A sensor that cannot be analyzed is
//! skipped with a reason; the pass only fails when no sensor produced a result.

use crate::core::classifier::{diagnose, DiagnosisResult, DEFAULT_FAULT_THRESHOLD};
use crate::core::features::compute_features;
use crate::core::model::DriftModel;
use crate::core::windowing::{select_window, WindowSpec};
use crate::stream::Sample;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of sensors on the rig.
pub const DEFAULT_SENSOR_COUNT: u32 = 8;

/// Why one sensor produced no diagnosis. None of these fail the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SensorSkip {
    #[error("insufficient data ({available} samples)")]
    InsufficientData { available: usize },
    #[error("insufficient data in analysis window ({in_window} samples)")]
    EmptyWindow { in_window: usize },
    #[error("analysis window has zero elapsed time")]
    ZeroElapsed,
    #[error("feature {feature} is not finite")]
    NonFiniteFeature { feature: String },
    #[error("{message}")]
    Prediction { message: String },
    #[error("model output has {finite_values} finite values, need 3")]
    UnusableOutput { finite_values: usize },
}

/// Session-scoped analysis failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisFailure {
    #[error("no sensor produced a usable result ({} skipped)", .skipped.len())]
    NoUsableSensor { skipped: BTreeMap<u32, SensorSkip> },
    #[error("analysis aborted: {0}")]
    Aborted(String),
}

/// Parameters of one analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub sensor_count: u32,
    pub threshold: f64,
    pub window: WindowSpec,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sensor_count: DEFAULT_SENSOR_COUNT,
            threshold: DEFAULT_FAULT_THRESHOLD,
            window: WindowSpec::default(),
        }
    }
}

/// Result of a successful pass.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub results: BTreeMap<u32, DiagnosisResult>,
    pub skipped: BTreeMap<u32, SensorSkip>,
    /// Samples in the snapshot
    pub samples_analyzed: usize,
    /// Distinct sensor ids present in the snapshot
    pub active_sensors: usize,
    pub model_version: String,
}

impl AnalysisReport {
    pub fn fault_count(&self) -> usize {
        self.results.values().filter(|r| r.is_faulty).count()
    }
}

/// Analyze one sensor end to end.
pub fn analyze_sensor(
    snapshot: &[Sample],
    sensor_id: u32,
    config: &AnalysisConfig,
    model: &dyn DriftModel,
) -> Result<DiagnosisResult, SensorSkip> {
    let window = select_window(snapshot, sensor_id, &config.window)?;
    let features = compute_features(&window)?;
    tracing::debug!(
        sensor_id,
        samples = features.sample_count,
        features = ?features.features.0,
        "features computed"
    );
    diagnose(model, &features, config.threshold)
}

/// Analyze every known sensor in `snapshot`.
pub fn analyze(
    snapshot: &[Sample],
    config: &AnalysisConfig,
    model: &dyn DriftModel,
) -> Result<AnalysisReport, AnalysisFailure> {
    let mut results = BTreeMap::new();
    let mut skipped = BTreeMap::new();

    for sensor_id in 0..config.sensor_count {
        match analyze_sensor(snapshot, sensor_id, config, model) {
            Ok(result) => {
                tracing::info!(
                    sensor_id,
                    max_axis = %result.max_axis,
                    max_signed = result.max_signed,
                    verdict = %result.verdict(),
                    "sensor diagnosed"
                );
                results.insert(sensor_id, result);
            }
            Err(skip) => {
                tracing::warn!(sensor_id, "sensor skipped: {skip}");
                skipped.insert(sensor_id, skip);
            }
        }
    }

    let seen: BTreeSet<u32> = snapshot.iter().map(|s| s.sensor_id).collect();
    let unknown = seen.iter().filter(|id| **id >= config.sensor_count).count();
    if unknown > 0 {
        tracing::debug!(unknown, "ignoring sensor ids outside the configured range");
    }

    if results.is_empty() {
        return Err(AnalysisFailure::NoUsableSensor { skipped });
    }

    Ok(AnalysisReport {
        results,
        skipped,
        samples_analyzed: snapshot.len(),
        active_sensors: seen.len(),
        model_version: model.version().to_string(),
    })
}
