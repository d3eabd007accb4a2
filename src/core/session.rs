//! Measurement sessions and their results.

use crate::core::analysis::{AnalysisReport, SensorSkip};
use crate::core::classifier::DiagnosisResult;
use crate::stream::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The name of this producer, stamped into every result.
pub const PRODUCER_NAME: &str = "imu-drift-monitor";

/// Lifecycle of a measurement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Standby,
    Connecting,
    Collecting,
    Analyzing,
    Complete,
    Failed,
}

impl SessionStatus {
    /// A session is in flight (start is rejected, cancel applies).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Collecting | SessionStatus::Analyzing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Standby => "STANDBY",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Collecting => "COLLECTING",
            SessionStatus::Analyzing => "ANALYZING",
            SessionStatus::Complete => "COMPLETE",
            SessionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measurement-and-diagnosis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Standby,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub at: DateTime<Utc>,
}

/// Why a session ended in FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    #[error("no data within {timeout_secs:.1}s of connecting")]
    ConnectionTimeout { timeout_secs: f64 },
    #[error("analysis failed: {message}")]
    AnalysisError { message: String },
    #[error("session cancelled")]
    Cancelled,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            FailureReason::AnalysisError { .. } => "ANALYSIS_ERROR",
            FailureReason::Cancelled => "CANCELLED",
        }
    }
}

/// A failed session, with the reason and when it was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub session: Session,
    pub reason: FailureReason,
    pub at: DateTime<Utc>,
}

/// Metadata about the software that produced a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    /// Host the measurement ran on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Producer {
    pub fn current() -> Self {
        let host = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().to_string());
        Self {
            name: PRODUCER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host,
        }
    }
}

/// Everything a completed session hands to the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session: Session,
    pub producer: Producer,
    /// Seconds spent in COLLECTING
    pub collection_duration_secs: f64,
    /// Distinct sensor ids seen in the buffer
    pub active_sensors: usize,
    pub total_data_points: usize,
    pub model_version: String,
    pub fault_threshold: f64,
    pub diagnoses: BTreeMap<u32, DiagnosisResult>,
    /// Sensors that produced no diagnosis, with the reason
    #[serde(default)]
    pub skipped: BTreeMap<u32, SensorSkip>,
    /// Buffer snapshot the analysis ran on
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl SessionResult {
    /// Assemble a result from a finished analysis pass.
    pub fn from_report(
        session: Session,
        report: AnalysisReport,
        samples: Vec<Sample>,
        collection_duration_secs: f64,
        fault_threshold: f64,
    ) -> Self {
        Self {
            session,
            producer: Producer::current(),
            collection_duration_secs,
            active_sensors: report.active_sensors,
            total_data_points: samples.len(),
            model_version: report.model_version,
            fault_threshold,
            diagnoses: report.results,
            skipped: report.skipped,
            samples,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn diagnosis(&self, sensor_id: u32) -> Option<&DiagnosisResult> {
        self.diagnoses.get(&sensor_id)
    }

    pub fn faulty_sensors(&self) -> Vec<u32> {
        self.diagnoses
            .values()
            .filter(|d| d.is_faulty)
            .map(|d| d.sensor_id)
            .collect()
    }

    pub fn fault_count(&self) -> usize {
        self.diagnoses.values().filter(|d| d.is_faulty).count()
    }
}

/// Terminal outcome of a session, handed out once.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Complete(SessionResult),
    Failed(SessionFailure),
}

impl SessionOutcome {
    pub fn session(&self) -> &Session {
        match self {
            SessionOutcome::Complete(result) => &result.session,
            SessionOutcome::Failed(failure) => &failure.session,
        }
    }

    pub fn result(&self) -> Option<&SessionResult> {
        match self {
            SessionOutcome::Complete(result) => Some(result),
            SessionOutcome::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<SessionResult, SessionFailure> {
        match self {
            SessionOutcome::Complete(result) => Ok(result),
            SessionOutcome::Failed(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{classify, DriftEstimate};

    fn result_with(drifts: &[(u32, f64)]) -> SessionResult {
        let diagnoses = drifts
            .iter()
            .map(|&(id, roll)| {
                let estimate = DriftEstimate::ThreeAxis {
                    roll,
                    pitch: 0.0,
                    yaw: 0.0,
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
            model_version: "test".to_string(),
            fault_threshold: 3.3,
            diagnoses,
            skipped: BTreeMap::new(),
            samples: Vec::new(),
        }
    }

    #[test]
    fn test_status_classes() {
        assert!(SessionStatus::Collecting.is_active());
        assert!(!SessionStatus::Standby.is_active());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Analyzing.is_terminal());
        assert_eq!(SessionStatus::Analyzing.to_string(), "ANALYZING");
    }

    #[test]
    fn test_fault_summary() {
        let result = result_with(&[(0, 0.5), (1, 4.0), (2, -5.0)]);
        assert_eq!(result.fault_count(), 2);
        assert_eq!(result.faulty_sensors(), vec![1, 2]);
        assert!(result.diagnosis(0).is_some());
        assert!(result.diagnosis(7).is_none());
    }

    #[test]
    fn test_result_json_round_trip_keeps_sensor_keys() {
        let mut result = result_with(&[(0, 0.5), (6, 4.0)]);
        result.skipped.insert(3, SensorSkip::ZeroElapsed);

        let json = serde_json::to_string(&result).unwrap();
        let parsed: SessionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_failure_reason_codes() {
        let reason = FailureReason::ConnectionTimeout { timeout_secs: 10.0 };
        assert_eq!(reason.code(), "CONNECTION_TIMEOUT");
        assert!(reason.to_string().contains("10.0s"));

        let json = serde_json::to_value(&FailureReason::Cancelled).unwrap();
        assert_eq!(json["code"], "CANCELLED");
    }
}
