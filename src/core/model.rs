//! Drift model adapter.
//!
//! The regression model that turns a feature vector into per-axis drift is an
//! external artifact. The pipeline only needs [`DriftModel`]; [`LinearDriftModel`]
//! is the JSON artifact the CLI ships with, and [`FnDriftModel`] wraps any
//! closure.

use crate::core::features::{FeatureVector, FEATURE_COUNT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of outputs the pipeline expects (roll, pitch, yaw).
pub const OUTPUT_AXES: usize = 3;

/// Output of a model call before interpretation.
///
/// Models disagree on shape: some return a bare number, some a flat vector, some
/// a batch-of-one matrix. The classifier flattens once and decides from there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPrediction {
    Scalar(f64),
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

impl RawPrediction {
    /// All values in row-major order.
    pub fn flatten(&self) -> Vec<f64> {
        match self {
            RawPrediction::Scalar(value) => vec![*value],
            RawPrediction::Flat(values) => values.clone(),
            RawPrediction::Nested(rows) => rows.iter().flatten().copied().collect(),
        }
    }
}

/// A model call that failed for one input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("prediction failed: {0}")]
pub struct PredictionError(pub String);

/// Predicts per-axis drift from a sensor's feature vector.
pub trait DriftModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<RawPrediction, PredictionError>;

    /// Version string recorded with every session result.
    fn version(&self) -> &str;
}

/// Errors raised while loading a model artifact.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model shape mismatch: {0}")]
    Shape(String),
}

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    version: String,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

/// Linear drift regressor: `drift = W · features + b`, with `W` shaped 3×9.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearDriftModel {
    version: String,
    weights: [[f64; FEATURE_COUNT]; OUTPUT_AXES],
    bias: [f64; OUTPUT_AXES],
}

impl LinearDriftModel {
    pub fn new(
        version: impl Into<String>,
        weights: [[f64; FEATURE_COUNT]; OUTPUT_AXES],
        bias: [f64; OUTPUT_AXES],
    ) -> Self {
        Self {
            version: version.into(),
            weights,
            bias,
        }
    }

    /// Load and dimension-check a JSON artifact.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json(&content)?;
        tracing::info!(path = %path.display(), version = %model.version, "drift model loaded");
        Ok(model)
    }

    /// Parse `{"version": .., "weights": [[..9..] x3], "bias": [..3..]}`.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let artifact: LinearArtifact = serde_json::from_str(json)?;

        if artifact.weights.len() != OUTPUT_AXES {
            return Err(ModelError::Shape(format!(
                "expected {OUTPUT_AXES} weight rows, got {}",
                artifact.weights.len()
            )));
        }
        if artifact.bias.len() != OUTPUT_AXES {
            return Err(ModelError::Shape(format!(
                "expected {OUTPUT_AXES} bias terms, got {}",
                artifact.bias.len()
            )));
        }

        let mut weights = [[0.0; FEATURE_COUNT]; OUTPUT_AXES];
        for (axis, row) in artifact.weights.iter().enumerate() {
            if row.len() != FEATURE_COUNT {
                return Err(ModelError::Shape(format!(
                    "weight row {axis} has {} columns, expected {FEATURE_COUNT}",
                    row.len()
                )));
            }
            weights[axis].copy_from_slice(row);
        }

        let mut bias = [0.0; OUTPUT_AXES];
        bias.copy_from_slice(&artifact.bias);

        if weights.iter().flatten().chain(bias.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::Shape("non-finite coefficient".to_string()));
        }

        Ok(Self::new(artifact.version, weights, bias))
    }
}

impl DriftModel for LinearDriftModel {
    fn predict(&self, features: &FeatureVector) -> Result<RawPrediction, PredictionError> {
        let row: Vec<f64> = self
            .weights
            .iter()
            .zip(self.bias)
            .map(|(w, b)| {
                w.iter()
                    .zip(features.as_slice())
                    .map(|(w, x)| w * x)
                    .sum::<f64>()
                    + b
            })
            .collect();

        // Batch of one, like a regressor called on a single-row matrix.
        Ok(RawPrediction::Nested(vec![row]))
    }

    fn version(&self) -> &str {
        &self.version
    }
}

type PredictFn = dyn Fn(&FeatureVector) -> Result<RawPrediction, PredictionError> + Send + Sync;

/// Adapts a closure into a [`DriftModel`].
pub struct FnDriftModel {
    version: String,
    predict: Box<PredictFn>,
}

impl FnDriftModel {
    pub fn new<F>(version: impl Into<String>, predict: F) -> Self
    where
        F: Fn(&FeatureVector) -> Result<RawPrediction, PredictionError> + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            predict: Box::new(predict),
        }
    }

    /// A model that returns the same output for every input.
    pub fn constant(version: impl Into<String>, output: RawPrediction) -> Self {
        Self::new(version, move |_| Ok(output.clone()))
    }
}

impl std::fmt::Debug for FnDriftModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDriftModel")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl DriftModel for FnDriftModel {
    fn predict(&self, features: &FeatureVector) -> Result<RawPrediction, PredictionError> {
        (self.predict)(features)
    }

    fn version(&self) -> &str {
        &self.version
    }
}
