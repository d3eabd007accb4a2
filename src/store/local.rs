//! Session results on the local filesystem, one JSON document per session.

use crate::core::SessionResult;
use crate::store::{PersistReport, ResultSink, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory of `session_<start>_<id>.json` files.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub sensors_diagnosed: usize,
    pub faulty: usize,
    pub total_data_points: usize,
    pub model_version: String,
    pub path: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(result: &SessionResult) -> String {
        format!(
            "session_{}_{}.json",
            result.session.start_time.format("%Y%m%d_%H%M%S"),
            result.session.id
        )
    }

    /// Write one session. The file appears atomically.
    pub fn save(&self, result: &SessionResult) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.root)?;

        let path = self.root.join(Self::file_name(result));
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// All session files, oldest first.
    fn session_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().map(|e| e == "json").unwrap_or(false)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("session_"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn read(path: &Path) -> Result<SessionResult, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every readable stored session, oldest first. Unreadable files are logged
    /// and skipped.
    pub fn load_all(&self) -> Result<Vec<SessionResult>, StoreError> {
        let mut results = Vec::new();
        for path in self.session_files()? {
            match Self::read(&path) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable session: {e}"),
            }
        }
        results.sort_by_key(|r| r.session.start_time);
        Ok(results)
    }

    /// Summaries of every stored session, oldest first.
    pub fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for path in self.session_files()? {
            match Self::read(&path) {
                Ok(result) => summaries.push(SessionSummary {
                    session_id: result.session.id,
                    start_time: result.session.start_time,
                    end_time: result.session.end_time,
                    sensors_diagnosed: result.diagnoses.len(),
                    faulty: result.fault_count(),
                    total_data_points: result.total_data_points,
                    model_version: result.model_version,
                    path,
                }),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable session: {e}"),
            }
        }
        summaries.sort_by_key(|s| s.start_time);
        Ok(summaries)
    }

    /// Load a session by full id or unique id prefix.
    pub fn load(&self, id: &str) -> Result<SessionResult, StoreError> {
        let matches: Vec<PathBuf> = self
            .session_files()?
            .into_iter()
            .filter(|p| {
                p.file_stem()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.rsplit('_').next())
                    .is_some_and(|session_id| session_id.starts_with(id))
            })
            .collect();

        match matches.as_slice() {
            [path] => Self::read(path),
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

impl ResultSink for LocalStore {
    fn persist(&self, result: &SessionResult) -> Result<PersistReport, StoreError> {
        let path = self.save(result)?;
        tracing::info!(
            session_id = %result.session_id(),
            path = %path.display(),
            "session saved locally"
        );
        Ok(PersistReport {
            diagnoses_saved: result.diagnoses.len(),
            diagnoses_failed: 0,
            samples_saved: result.samples.len(),
        })
    }

    fn describe(&self) -> String {
        format!("local store {}", self.root.display())
    }
}
