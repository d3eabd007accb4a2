//! Drift classification.
//!
//! The model output is interpreted exactly once, into a [`DriftEstimate`]. Every
//! later step works on that tagged value instead of re-checking the raw shape.

use crate::core::features::FeatureWindow;
use crate::core::model::{DriftModel, RawPrediction, OUTPUT_AXES};
use crate::core::SensorSkip;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Default fault threshold in degrees.
pub const DEFAULT_FAULT_THRESHOLD: f64 = 3.3;

/// Rotation axes, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Roll,
    Pitch,
    Yaw,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Roll => "Roll",
            Axis::Pitch => "Pitch",
            Axis::Yaw => "Yaw",
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreted model output for one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftEstimate {
    ThreeAxis { roll: f64, pitch: f64, yaw: f64 },
    /// Fewer than three leading finite values
    Unusable { finite_values: usize },
}

impl DriftEstimate {
    /// Flatten the raw output and read it positionally as roll, pitch, yaw.
    ///
    /// Extra trailing values are ignored. The first three must all be finite.
    pub fn from_prediction(raw: &RawPrediction) -> Self {
        let values = raw.flatten();
        match values.as_slice() {
            [roll, pitch, yaw, ..] if roll.is_finite() && pitch.is_finite() && yaw.is_finite() => {
                DriftEstimate::ThreeAxis {
                    roll: *roll,
                    pitch: *pitch,
                    yaw: *yaw,
                }
            }
            _ => DriftEstimate::Unusable {
                finite_values: values.iter().filter(|v| v.is_finite()).count(),
            },
        }
    }
}

/// Sensor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Faulty,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Normal => f.write_str("NORMAL"),
            Verdict::Faulty => f.write_str("FAULTY"),
        }
    }
}

/// Per-sensor diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub sensor_id: u32,
    pub roll_drift: f64,
    pub pitch_drift: f64,
    pub yaw_drift: f64,
    /// Axis with the largest absolute drift
    pub max_axis: Axis,
    /// Absolute drift on `max_axis`
    pub max_value: f64,
    /// Signed drift on `max_axis`
    pub max_signed: f64,
    pub is_faulty: bool,
    /// Threshold the verdict was taken against
    pub threshold: f64,
}

impl DiagnosisResult {
    pub fn verdict(&self) -> Verdict {
        if self.is_faulty {
            Verdict::Faulty
        } else {
            Verdict::Normal
        }
    }

    pub fn drift(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Roll => self.roll_drift,
            Axis::Pitch => self.pitch_drift,
            Axis::Yaw => self.yaw_drift,
        }
    }
}

/// Derive the verdict for one sensor from an interpreted estimate.
pub fn classify(
    sensor_id: u32,
    estimate: DriftEstimate,
    threshold: f64,
) -> Result<DiagnosisResult, SensorSkip> {
    let (roll, pitch, yaw) = match estimate {
        DriftEstimate::ThreeAxis { roll, pitch, yaw } => (roll, pitch, yaw),
        DriftEstimate::Unusable { finite_values } => {
            return Err(SensorSkip::UnusableOutput { finite_values })
        }
    };

    let mut max_axis = Axis::Roll;
    let mut max_signed = roll;
    for (axis, value) in [(Axis::Pitch, pitch), (Axis::Yaw, yaw)] {
        // Strictly greater, so earlier axes win ties.
        if value.abs() > max_signed.abs() {
            max_axis = axis;
            max_signed = value;
        }
    }
    let max_value = max_signed.abs();

    Ok(DiagnosisResult {
        sensor_id,
        roll_drift: roll,
        pitch_drift: pitch,
        yaw_drift: yaw,
        max_axis,
        max_value,
        max_signed,
        is_faulty: max_value > threshold,
        threshold,
    })
}

/// Run the model on one sensor's features and classify the result.
///
/// A model error or panic skips the sensor; it never fails the session.
pub fn diagnose(
    model: &dyn DriftModel,
    window: &FeatureWindow,
    threshold: f64,
) -> Result<DiagnosisResult, SensorSkip> {
    let raw = match catch_unwind(AssertUnwindSafe(|| model.predict(&window.features))) {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            return Err(SensorSkip::Prediction {
                message: e.to_string(),
            })
        }
        Err(panic) => {
            return Err(SensorSkip::Prediction {
                message: format!("model panicked: {}", panic_message(panic.as_ref())),
            })
        }
    };

    let estimate = DriftEstimate::from_prediction(&raw);
    if let DriftEstimate::Unusable { finite_values } = estimate {
        tracing::debug!(
            sensor_id = window.sensor_id,
            finite_values,
            expected = OUTPUT_AXES,
            "model output unusable"
        );
    }
    classify(window.sensor_id, estimate, threshold)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
