//! Kinematic feature extraction from an analysis window.
//!
//! Nine features per sensor, in the fixed order the drift model was trained on:
//!
//! | index | name    | meaning                                             |
//! |-------|---------|-----------------------------------------------------|
//! | 0-2   | p5 q5 r5 | mean body rates (mounting-frame corrected gyro)    |
//! | 3-5   | Rd5 Pd5 Yd5 | finite-difference Euler rates, first to last   |
//! | 6-8   | Rdot5 Pdot5 Ydot5 | mean Euler rates from the body-rate transform |
//!
//! The body-rate to Euler-rate transform is singular at pitch = ±90° (gimbal lock).
//! `tan P` is clamped and `cos P` is floored away from zero; any non-finite rate
//! that still slips through is zeroed before averaging.

use crate::core::windowing::{seconds_between, AnalysisWindow};
use crate::core::SensorSkip;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Number of features per sensor.
pub const FEATURE_COUNT: usize = 9;

/// Feature names in model input order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "p5", "q5", "r5", "Rd5", "Pd5", "Yd5", "Rdot5", "Pdot5", "Ydot5",
];

/// Bound applied to `tan(pitch)`.
const TAN_PITCH_LIMIT: f64 = 100.0;

/// Smallest magnitude allowed for `cos(pitch)` as a divisor.
const COS_PITCH_FLOOR: f64 = 1e-10;

/// The model input for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Name/value pairs in model order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

/// Features computed for one sensor over its analysis window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub sensor_id: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Samples that contributed
    pub sample_count: usize,
    pub features: FeatureVector,
}

/// Euler angle rates (degrees or radians follow the input rates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerRates {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Body rates in the vehicle frame, corrected for the sensor's mounting.
///
/// The sensor's x axis points backwards, its z axis is the vehicle's pitch axis and
/// its y axis is the vehicle's yaw axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyRates {
    pub p: f64,
    pub q: f64,
    pub r: f64,
}

impl BodyRates {
    pub fn from_gyro(gyro_x: f64, gyro_y: f64, gyro_z: f64) -> Self {
        Self {
            p: -gyro_x,
            q: -gyro_z,
            r: gyro_y,
        }
    }
}

/// Transform body rates into Euler angle rates at the given attitude.
///
/// `roll_deg` and `pitch_deg` are in degrees. Near gimbal lock the divisor is
/// floored, so the result is large but finite unless the inputs are not.
pub fn euler_rates(body: BodyRates, roll_deg: f64, pitch_deg: f64) -> EulerRates {
    let (sin_r, cos_r) = roll_deg.to_radians().sin_cos();
    let pitch = pitch_deg.to_radians();

    let mut cos_p = pitch.cos();
    if cos_p.abs() < COS_PITCH_FLOOR {
        cos_p = COS_PITCH_FLOOR * sign(cos_p);
    }
    let tan_p = pitch.tan().clamp(-TAN_PITCH_LIMIT, TAN_PITCH_LIMIT);

    let coupled = body.q * sin_r + body.r * cos_r;
    EulerRates {
        roll: body.p + coupled * tan_p,
        pitch: body.q * cos_r - body.r * sin_r,
        yaw: coupled / cos_p,
    }
}

/// Compute the feature vector for one sensor's window.
pub fn compute_features(window: &AnalysisWindow) -> Result<FeatureWindow, SensorSkip> {
    let samples = &window.samples;
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) if samples.len() >= 2 => (first, last),
        _ => {
            return Err(SensorSkip::EmptyWindow {
                in_window: samples.len(),
            })
        }
    };

    let body: Vec<BodyRates> = samples
        .iter()
        .map(|s| BodyRates::from_gyro(s.gyro_x, s.gyro_y, s.gyro_z))
        .collect();

    let p5 = body.iter().map(|b| b.p).mean();
    let q5 = body.iter().map(|b| b.q).mean();
    let r5 = body.iter().map(|b| b.r).mean();

    let dt = seconds_between(first.arrival_time, last.arrival_time);
    if dt == 0.0 {
        return Err(SensorSkip::ZeroElapsed);
    }
    let rd5 = (last.roll - first.roll) / dt;
    let pd5 = (last.pitch - first.pitch) / dt;
    let yd5 = (last.yaw - first.yaw) / dt;

    let rates: Vec<EulerRates> = samples
        .iter()
        .zip(&body)
        .map(|(s, b)| euler_rates(*b, s.roll, s.pitch))
        .collect();

    let rdot5 = rates.iter().map(|e| finite_or_zero(e.roll)).mean();
    let pdot5 = rates.iter().map(|e| finite_or_zero(e.pitch)).mean();
    let ydot5 = rates.iter().map(|e| finite_or_zero(e.yaw)).mean();

    let features = FeatureVector([p5, q5, r5, rd5, pd5, yd5, rdot5, pdot5, ydot5]);
    if let Some(index) = features.0.iter().position(|v| !v.is_finite()) {
        return Err(SensorSkip::NonFiniteFeature {
            feature: FEATURE_NAMES[index].to_string(),
        });
    }

    Ok(FeatureWindow {
        sensor_id: window.sensor_id,
        window_start: window.start,
        window_end: window.end,
        sample_count: samples.len(),
        features,
    })
}

/// Sign with zero mapping to zero (unlike `f64::signum`).
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
