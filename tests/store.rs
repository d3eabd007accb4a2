//! Local persistence, history listing and export.

use chrono::{Duration, Utc};
use imu_drift_monitor::core::{
    analyze, AnalysisConfig, FnDriftModel, RawPrediction, Session, SessionResult, SessionStatus,
};
use imu_drift_monitor::store::{
    export_records, write_records, ExportFormat, ExportRecord, LocalStore, PreferRemote,
    ResultSink,
};
use imu_drift_monitor::Sample;

fn completed_session(yaw_drift: f64) -> SessionResult {
    let t0 = Utc::now();
    let samples: Vec<Sample> = (0..60)
        .flat_map(|i| {
            (0..2).map(move |sensor_id| Sample {
                sensor_id,
                arrival_time: t0 + Duration::milliseconds(i * 100),
                roll: 0.0,
                pitch: 0.0,
                yaw: 0.0,
                gyro_x: 0.0,
                gyro_y: 0.0,
                gyro_z: 0.0,
            })
        })
        .collect();

    let model = FnDriftModel::constant("store-test", RawPrediction::Flat(vec![0.0, 0.0, yaw_drift]));
    let report = analyze(&samples, &AnalysisConfig::default(), &model).unwrap();

    let mut session = Session::new();
    session.status = SessionStatus::Complete;
    session.end_time = Some(Utc::now());
    SessionResult::from_report(session, report, samples, 5.0, 3.3)
}

#[test]
fn test_persist_then_list_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path().join("sessions"));

    let result = completed_session(4.0);
    let report = store.persist(&result).unwrap();
    assert_eq!(report.diagnoses_saved, 2);
    assert_eq!(report.diagnoses_failed, 0);
    assert_eq!(report.samples_saved, 120);

    let summaries = store.list().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].session_id, result.session.id);
    assert_eq!(summaries[0].faulty, 2);
    assert_eq!(summaries[0].total_data_points, 120);

    let loaded = store.load(&result.session.id.to_string()).unwrap();
    assert_eq!(loaded.samples.len(), 120);
    assert_eq!(loaded.skipped.len(), 6);
    assert_eq!(loaded.diagnoses, result.diagnoses);
}

#[test]
fn test_unreadable_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    store.persist(&completed_session(1.0)).unwrap();
    std::fs::write(dir.path().join("session_broken.json"), "{ not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    assert_eq!(store.list().unwrap().len(), 1);
    assert_eq!(store.load_all().unwrap().len(), 1);
}

#[test]
fn test_history_is_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());

    let mut older = completed_session(1.0);
    older.session.start_time = Utc::now() - Duration::hours(2);
    let newer = completed_session(5.0);

    store.persist(&newer).unwrap();
    store.persist(&older).unwrap();

    let ids: Vec<_> = store.list().unwrap().iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec![older.session.id, newer.session.id]);
}

#[test]
fn test_export_stored_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let sink = PreferRemote::local_only(LocalStore::new(dir.path()));
    sink.persist(&completed_session(1.0)).unwrap();
    sink.persist(&completed_session(-6.0)).unwrap();

    let results = LocalStore::new(dir.path()).load_all().unwrap();
    let records = export_records(&results);
    assert_eq!(records.len(), 4);
    assert_eq!(records.iter().filter(|r| r.is_faulty).count(), 2);

    let path = dir.path().join("export.jsonl");
    let file = std::fs::File::create(&path).unwrap();
    write_records(&records, ExportFormat::JsonLines, file).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: Vec<ExportRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed, records);
}
