//! Ingest and session counters.
//!
//! Shared between the receive loop and the controller; all counters are atomics
//! so neither side ever waits on the other to record progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for one process, optionally merged with persisted totals.
#[derive(Debug)]
pub struct IngestStats {
    /// Messages received from the telemetry source
    messages_received: AtomicU64,
    /// Messages dropped because they failed to decode
    messages_dropped: AtomicU64,
    /// Samples appended to the buffer
    samples_buffered: AtomicU64,
    /// Successful connections to the telemetry source
    connections: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            samples_buffered: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters that start from (and save back to) the totals at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("could not load previous ingest stats: {e}");
        }

        stats
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_message(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_samples(&self, count: u64) {
        self.samples_buffered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            samples_buffered: self.samples_buffered.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Human-readable summary for the CLI.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Ingest Statistics:\n\
             - Messages received: {}\n\
             - Messages dropped (malformed): {}\n\
             - Samples buffered: {}\n\
             - Connections: {}\n\
             - Sessions completed: {}\n\
             - Sessions failed: {}",
            stats.messages_received,
            stats.messages_dropped,
            stats.samples_buffered,
            stats.connections,
            stats.sessions_completed,
            stats.sessions_failed,
        )
    }

    /// Save the totals to disk, if this instance was created with persistence.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = self.snapshot();
        let persisted = PersistedStats {
            messages_received: snapshot.messages_received,
            messages_dropped: snapshot.messages_dropped,
            samples_buffered: snapshot.samples_buffered,
            connections: snapshot.connections,
            sessions_completed: snapshot.sessions_completed,
            sessions_failed: snapshot.sessions_failed,
            last_updated: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;

        self.messages_received
            .store(persisted.messages_received, Ordering::Relaxed);
        self.messages_dropped
            .store(persisted.messages_dropped, Ordering::Relaxed);
        self.samples_buffered
            .store(persisted.samples_buffered, Ordering::Relaxed);
        self.connections.store(persisted.connections, Ordering::Relaxed);
        self.sessions_completed
            .store(persisted.sessions_completed, Ordering::Relaxed);
        self.sessions_failed
            .store(persisted.sessions_failed, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub samples_buffered: u64,
    pub connections: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    messages_received: u64,
    messages_dropped: u64,
    samples_buffered: u64,
    connections: u64,
    sessions_completed: u64,
    sessions_failed: u64,
    last_updated: DateTime<Utc>,
}

/// Counters shared between the receive loop and the controller.
pub type SharedStats = Arc<IngestStats>;
