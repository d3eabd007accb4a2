//! Flat export of stored diagnoses.

use crate::core::{Axis, SessionResult};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

/// Export file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One pretty-printed JSON array
    Json,
    /// One record per line
    JsonLines,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::JsonLines => "jsonl",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" => Ok(ExportFormat::JsonLines),
            other => Err(format!("unknown export format '{other}' (expected json or jsonl)")),
        }
    }
}

/// One sensor's diagnosis with its session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub sensor_id: u32,
    pub roll_drift: f64,
    pub pitch_drift: f64,
    pub yaw_drift: f64,
    pub max_axis: Axis,
    pub max_value: f64,
    pub max_signed: f64,
    pub is_faulty: bool,
    pub threshold: f64,
    pub model_version: String,
}

/// Flatten sessions into per-sensor records, in session then sensor order.
pub fn export_records(results: &[SessionResult]) -> Vec<ExportRecord> {
    results
        .iter()
        .flat_map(|result| {
            result.diagnoses.values().map(move |d| ExportRecord {
                session_id: result.session.id,
                session_start: result.session.start_time,
                sensor_id: d.sensor_id,
                roll_drift: d.roll_drift,
                pitch_drift: d.pitch_drift,
                yaw_drift: d.yaw_drift,
                max_axis: d.max_axis,
                max_value: d.max_value,
                max_signed: d.max_signed,
                is_faulty: d.is_faulty,
                threshold: d.threshold,
                model_version: result.model_version.clone(),
            })
        })
        .collect()
}

/// Write records in the given format.
pub fn write_records<W: Write>(
    records: &[ExportRecord],
    format: ExportFormat,
    mut out: W,
) -> Result<(), StoreError> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut out, records)?;
            writeln!(out)?;
        }
        ExportFormat::JsonLines => {
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                writeln!(out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{classify, DriftEstimate, Producer, Session};
    use std::collections::BTreeMap;

    fn result(drifts: &[f64]) -> SessionResult {
        let diagnoses = drifts
            .iter()
            .enumerate()
            .map(|(id, &yaw)| {
                let id = id as u32;
                let estimate = DriftEstimate::ThreeAxis {
                    roll: 0.0,
                    pitch: 0.0,
                    yaw,
                };
                (id, classify(id, estimate, 3.3).unwrap())
            })
            .collect();

        SessionResult {
            session: Session::new(),
            producer: Producer::current(),
            collection_duration_secs: 5.0,
            active_sensors: drifts.len(),
            total_data_points: 0,
            model_version: "m1".to_string(),
            fault_threshold: 3.3,
            diagnoses,
            skipped: BTreeMap::new(),
            samples: Vec::new(),
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert_eq!("JSONL".parse::<ExportFormat>(), Ok(ExportFormat::JsonLines));
        assert!("csv".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_records_flatten_sessions() {
        let records = export_records(&[result(&[1.0, 5.0]), result(&[-4.0])]);
        assert_eq!(records.len(), 3);
        assert!(!records[0].is_faulty);
        assert!(records[1].is_faulty);
        assert_eq!(records[2].max_signed, -4.0);
        assert_eq!(records[2].max_axis, Axis::Yaw);
    }

    #[test]
    fn test_jsonl_one_record_per_line() {
        let records = export_records(&[result(&[1.0, 2.0, 3.0])]);
        let mut out = Vec::new();
        write_records(&records, ExportFormat::JsonLines, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: ExportRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.sensor_id, 1);
    }

    #[test]
    fn test_json_is_an_array() {
        let records = export_records(&[result(&[1.0])]);
        let mut out = Vec::new();
        write_records(&records, ExportFormat::Json, &mut out).unwrap();

        let parsed: Vec<ExportRecord> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, records);
    }
}
