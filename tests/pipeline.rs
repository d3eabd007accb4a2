//! Window → features → classifier over synthetic rig data.

use chrono::{DateTime, Duration, Utc};
use imu_drift_monitor::core::{
    analyze, AnalysisConfig, AnalysisFailure, Axis, FnDriftModel, LinearDriftModel,
    PredictionError, RawPrediction, SensorSkip,
};
use imu_drift_monitor::Sample;

fn at_rest(sensor_id: u32, t0: DateTime<Utc>, offset_ms: i64) -> Sample {
    Sample {
        sensor_id,
        arrival_time: t0 + Duration::milliseconds(offset_ms),
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        gyro_x: 0.0,
        gyro_y: 0.0,
        gyro_z: 0.0,
    }
}

/// 8 sensors × 60 evenly spaced samples over 6 seconds.
fn rig_snapshot() -> Vec<Sample> {
    let t0 = Utc::now();
    let mut snapshot = Vec::new();
    for i in 0..60 {
        for sensor_id in 0..8 {
            snapshot.push(at_rest(sensor_id, t0, i * 100));
        }
    }
    snapshot
}

#[test]
fn test_end_to_end_rig_at_rest() {
    let model = FnDriftModel::constant("fixed", RawPrediction::Flat(vec![0.1, -0.2, 0.05]));
    let report = analyze(&rig_snapshot(), &AnalysisConfig::default(), &model).unwrap();

    assert_eq!(report.results.len(), 8);
    assert!(report.skipped.is_empty());
    assert!(report.results.values().all(|r| !r.is_faulty));

    let sensor0 = &report.results[&0];
    assert_eq!(sensor0.max_axis, Axis::Pitch);
    assert_eq!(sensor0.max_signed, -0.2);
    assert_eq!(sensor0.max_value, 0.2);
    assert_eq!(sensor0.threshold, 3.3);
    assert_eq!(report.samples_analyzed, 480);
    assert_eq!(report.active_sensors, 8);
}

#[test]
fn test_features_reach_the_model_in_order() {
    let t0 = Utc::now();
    // Sensor rolls at 2°/s and reports a constant gyro.
    let snapshot: Vec<Sample> = (0..60)
        .map(|i| Sample {
            roll: 0.2 * i as f64,
            gyro_x: -1.0,
            gyro_y: 2.0,
            gyro_z: -3.0,
            ..at_rest(0, t0, i * 100)
        })
        .collect();

    let model = FnDriftModel::new("echo", |features| {
        // Echo p5, q5 and Rd5 back as drift.
        let f = features.0;
        Ok(RawPrediction::Flat(vec![f[0], f[1], f[3]]))
    });
    let config = AnalysisConfig {
        sensor_count: 1,
        ..AnalysisConfig::default()
    };

    let report = analyze(&snapshot, &config, &model).unwrap();
    let result = &report.results[&0];
    assert!((result.roll_drift - 1.0).abs() < 1e-9);
    assert!((result.pitch_drift - 3.0).abs() < 1e-9);
    assert!((result.yaw_drift - 2.0).abs() < 1e-9);
    assert_eq!(result.max_axis, Axis::Pitch);
}

#[test]
fn test_single_sample_in_window_is_skipped_silently() {
    let t0 = Utc::now();
    let mut snapshot = rig_snapshot();
    snapshot.retain(|s| s.sensor_id != 5);
    // Sensor 5: one sample before the window, one inside, one after.
    for ms in [0, 2000, 6000] {
        snapshot.push(at_rest(5, t0, ms));
    }

    let model = FnDriftModel::constant("fixed", RawPrediction::Flat(vec![0.1, -0.2, 0.05]));
    let report = analyze(&snapshot, &AnalysisConfig::default(), &model).unwrap();

    assert!(!report.results.contains_key(&5));
    assert_eq!(report.skipped[&5], SensorSkip::EmptyWindow { in_window: 1 });
    assert_eq!(report.results.len(), 7);
}

#[test]
fn test_failing_predictor_on_some_sensors() {
    let model = FnDriftModel::new("flaky", |features| {
        if features.0.iter().all(|v| *v == 0.0) {
            Err(PredictionError("rejected all-zero input".to_string()))
        } else {
            Ok(RawPrediction::Nested(vec![vec![4.0, 0.0, 0.0]]))
        }
    });

    let err = analyze(&rig_snapshot(), &AnalysisConfig::default(), &model).unwrap_err();
    match err {
        AnalysisFailure::NoUsableSensor { skipped } => {
            assert_eq!(skipped.len(), 8);
            assert!(skipped
                .values()
                .all(|s| matches!(s, SensorSkip::Prediction { .. })));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[test]
fn test_gimbal_lock_rig_is_still_diagnosed() {
    let t0 = Utc::now();
    let snapshot: Vec<Sample> = (0..60)
        .map(|i| Sample {
            pitch: 90.0,
            gyro_y: 0.5,
            gyro_z: 0.1,
            ..at_rest(0, t0, i * 100)
        })
        .collect();

    let model = LinearDriftModel::from_json(
        r#"{
            "version": "linear-test",
            "weights": [
                [0, 0, 0, 0, 0, 0, 1e-12, 0, 0],
                [0, 0, 0, 0, 0, 0, 0, 1, 0],
                [0, 0, 0, 0, 0, 0, 0, 0, 1e-12]
            ],
            "bias": [0, 0, 0]
        }"#,
    )
    .unwrap();
    let config = AnalysisConfig {
        sensor_count: 1,
        ..AnalysisConfig::default()
    };

    let report = analyze(&snapshot, &config, &model).unwrap();
    let result = &report.results[&0];
    assert!(result.roll_drift.is_finite());
    assert!(result.yaw_drift.is_finite());
    assert_eq!(report.model_version, "linear-test");
}

#[test]
fn test_non_finite_feature_skips_only_that_sensor() {
    let t0 = Utc::now();
    let mut snapshot = rig_snapshot();
    snapshot.retain(|s| s.sensor_id != 3);
    // Roll swings across the whole f64 range inside the window, so Rd5 overflows.
    for i in 0..60 {
        let roll = if i < 30 { -1.7e308 } else { 1.7e308 };
        snapshot.push(Sample {
            roll,
            ..at_rest(3, t0, i * 100)
        });
    }

    let model = FnDriftModel::constant("fixed", RawPrediction::Flat(vec![0.1, -0.2, 0.05]));
    let report = analyze(&snapshot, &AnalysisConfig::default(), &model).unwrap();

    assert_eq!(
        report.skipped[&3],
        SensorSkip::NonFiniteFeature {
            feature: "Rd5".to_string()
        }
    );
    assert!(!report.results.contains_key(&3));
    assert_eq!(report.results.len(), 7);
}
