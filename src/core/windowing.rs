//! Per-sensor analysis window selection.
//!
//! Each sensor is aligned on its own first sample: the window opens a fixed
//! settle offset after that sample and spans a fixed measurement duration. Sensors
//! never share a time base, so a late-starting sensor is analyzed over its own
//! window rather than a truncated global one.

use crate::core::SensorSkip;
use crate::stream::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Offset between a sensor's first sample and its window start.
pub const DEFAULT_SETTLE_OFFSET_SECS: f64 = 1.0;

/// Length of the measurement window.
pub const DEFAULT_MEASUREMENT_SPAN_SECS: f64 = 4.0;

/// Shape of the analysis window relative to a sensor's first sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub settle_offset: std::time::Duration,
    pub measurement_span: std::time::Duration,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            settle_offset: std::time::Duration::from_secs_f64(DEFAULT_SETTLE_OFFSET_SECS),
            measurement_span: std::time::Duration::from_secs_f64(DEFAULT_MEASUREMENT_SPAN_SECS),
        }
    }
}

/// The samples of one sensor that fall inside its analysis window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub sensor_id: u32,
    /// Window start (first sample time plus the settle offset)
    pub start: DateTime<Utc>,
    /// Window end, inclusive
    pub end: DateTime<Utc>,
    /// Samples inside `[start, end]`, sorted by arrival time
    pub samples: Vec<Sample>,
}

impl AnalysisWindow {
    /// Check if a timestamp falls within this window (both ends inclusive).
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Seconds between the first and last sample in the window.
    pub fn elapsed_secs(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => seconds_between(first.arrival_time, last.arrival_time),
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// All samples of `sensor_id` from `snapshot`, sorted by arrival time.
///
/// The sort is stable, so samples stamped with the same arrival time keep their
/// buffer order.
pub fn sensor_samples(snapshot: &[Sample], sensor_id: u32) -> Vec<Sample> {
    let mut samples: Vec<Sample> = snapshot
        .iter()
        .filter(|s| s.sensor_id == sensor_id)
        .copied()
        .collect();
    samples.sort_by_key(|s| s.arrival_time);
    samples
}

/// Select the analysis window for one sensor.
///
/// Fewer than two samples overall, or fewer than two inside the window, is an
/// insufficient-data skip rather than an error.
pub fn select_window(
    snapshot: &[Sample],
    sensor_id: u32,
    spec: &WindowSpec,
) -> Result<AnalysisWindow, SensorSkip> {
    let samples = sensor_samples(snapshot, sensor_id);
    if samples.len() < 2 {
        return Err(SensorSkip::InsufficientData {
            available: samples.len(),
        });
    }

    let t0 = samples[0].arrival_time;
    let start = t0 + to_chrono(spec.settle_offset);
    let end = start + to_chrono(spec.measurement_span);

    let in_window: Vec<Sample> = samples
        .into_iter()
        .filter(|s| s.arrival_time >= start && s.arrival_time <= end)
        .collect();

    if in_window.len() < 2 {
        return Err(SensorSkip::EmptyWindow {
            in_window: in_window.len(),
        });
    }

    Ok(AnalysisWindow {
        sensor_id,
        start,
        end,
        samples: in_window,
    })
}

/// Signed seconds from `from` to `to`, with sub-millisecond precision.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(sensor_id: u32, t0: DateTime<Utc>, offset_ms: i64) -> Sample {
        Sample {
            sensor_id,
            arrival_time: t0 + Duration::milliseconds(offset_ms),
            roll: offset_ms as f64,
            pitch: 0.0,
            yaw: 0.0,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: 0.0,
        }
    }

    #[test]
    fn test_window_selects_settled_span() {
        let t0 = Utc::now();
        let snapshot: Vec<Sample> = [0, 500, 1200, 3900, 5500]
            .iter()
            .map(|&ms| sample_at(0, t0, ms))
            .collect();

        let window = select_window(&snapshot, 0, &WindowSpec::default()).unwrap();
        let offsets: Vec<f64> = window.samples.iter().map(|s| s.roll).collect();
        assert_eq!(offsets, vec![1200.0, 3900.0]);
        assert_eq!(window.start, t0 + Duration::seconds(1));
        assert_eq!(window.end, t0 + Duration::seconds(5));
        assert!((window.elapsed_secs() - 2.7).abs() < 1e-9);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let t0 = Utc::now();
        let snapshot: Vec<Sample> = [0, 1000, 5000].iter().map(|&ms| sample_at(2, t0, ms)).collect();

        let window = select_window(&snapshot, 2, &WindowSpec::default()).unwrap();
        assert_eq!(window.len(), 2);
        assert!(window.contains(window.start));
        assert!(window.contains(window.end));
        assert!(!window.contains(window.end + Duration::milliseconds(1)));
    }

    #[test]
    fn test_windows_are_aligned_per_sensor() {
        let t0 = Utc::now();
        let mut snapshot = Vec::new();
        for ms in (0..6000).step_by(100) {
            snapshot.push(sample_at(0, t0, ms));
            // Sensor 1 starts two seconds late.
            snapshot.push(sample_at(1, t0, ms + 2000));
        }

        let w0 = select_window(&snapshot, 0, &WindowSpec::default()).unwrap();
        let w1 = select_window(&snapshot, 1, &WindowSpec::default()).unwrap();
        assert_eq!(w1.start - w0.start, Duration::seconds(2));
        assert_eq!(w0.len(), w1.len());
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let t0 = Utc::now();
        let snapshot = vec![
            sample_at(0, t0, 2000),
            sample_at(0, t0, 0),
            sample_at(0, t0, 1500),
        ];

        let window = select_window(&snapshot, 0, &WindowSpec::default()).unwrap();
        let offsets: Vec<f64> = window.samples.iter().map(|s| s.roll).collect();
        assert_eq!(offsets, vec![1500.0, 2000.0]);
    }

    #[test]
    fn test_insufficient_samples() {
        let t0 = Utc::now();
        assert_eq!(
            select_window(&[sample_at(0, t0, 0)], 0, &WindowSpec::default()).unwrap_err(),
            SensorSkip::InsufficientData { available: 1 }
        );
        assert_eq!(
            select_window(&[], 4, &WindowSpec::default()).unwrap_err(),
            SensorSkip::InsufficientData { available: 0 }
        );

        // Two samples overall, but only one lands in the window.
        let snapshot = vec![sample_at(0, t0, 0), sample_at(0, t0, 1500)];
        assert_eq!(
            select_window(&snapshot, 0, &WindowSpec::default()).unwrap_err(),
            SensorSkip::EmptyWindow { in_window: 1 }
        );
    }
}
