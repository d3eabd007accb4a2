//! Configuration for the drift monitor.

use crate::buffer::DEFAULT_CAPACITY;
use crate::core::{AnalysisConfig, WindowSpec, DEFAULT_FAULT_THRESHOLD, DEFAULT_SENSOR_COUNT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default WebSocket endpoint of the device gateway.
pub const DEFAULT_TELEMETRY_URL: &str = "ws://192.168.4.1:81";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Drift (degrees) above which a sensor is faulty
    pub fault_threshold: f64,

    /// How long samples are collected once data is flowing
    #[serde(with = "duration_serde")]
    pub collection_duration: Duration,

    /// How long to wait for data after starting a session
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Maximum number of buffered samples
    pub buffer_capacity: usize,

    /// Sensors `0..sensor_count` are analyzed
    pub sensor_count: u32,

    /// Offset between a sensor's first sample and its analysis window
    #[serde(with = "duration_serde")]
    pub settle_offset: Duration,

    /// Length of the analysis window
    #[serde(with = "duration_serde")]
    pub measurement_span: Duration,

    /// Delay before reconnecting a dropped stream; `None` disables reconnects
    #[serde(with = "option_duration_serde")]
    pub reconnect_delay: Option<Duration>,

    /// WebSocket URL of the telemetry source
    pub telemetry_url: String,

    /// Drift model artifact
    pub model_path: PathBuf,

    /// Path for session results and ingest statistics
    pub data_path: PathBuf,

    /// Path for exported diagnoses
    pub export_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imu-drift-monitor");
        let window = WindowSpec::default();

        Self {
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
            collection_duration: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(10),
            buffer_capacity: DEFAULT_CAPACITY,
            sensor_count: DEFAULT_SENSOR_COUNT,
            settle_offset: window.settle_offset,
            measurement_span: window.measurement_span,
            reconnect_delay: Some(Duration::from_secs(1)),
            telemetry_url: DEFAULT_TELEMETRY_URL.to_string(),
            model_path: data_dir.join("model.json"),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`; a missing file yields the defaults.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        self.validate()?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imu-drift-monitor")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Where session results are stored.
    pub fn sessions_path(&self) -> PathBuf {
        self.data_path.join("sessions")
    }

    /// Where cumulative ingest statistics are stored.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fault_threshold.is_finite() || self.fault_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "fault_threshold must be a non-negative number, got {}",
                self.fault_threshold
            )));
        }

        for (name, duration) in [
            ("collection_duration", self.collection_duration),
            ("connection_timeout", self.connection_timeout),
            ("measurement_span", self.measurement_span),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_capacity must be at least 1".to_string()));
        }
        if self.sensor_count == 0 {
            return Err(ConfigError::Invalid("sensor_count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Freeze the settings one session runs with.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            fault_threshold: self.fault_threshold,
            collection_duration: self.collection_duration,
            connection_timeout: self.connection_timeout,
            sensor_count: self.sensor_count,
            window: WindowSpec {
                settle_offset: self.settle_offset,
                measurement_span: self.measurement_span,
            },
        }
    }
}

/// Immutable settings for the lifetime of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub fault_threshold: f64,
    pub collection_duration: Duration,
    pub connection_timeout: Duration,
    pub sensor_count: u32,
    pub window: WindowSpec,
}

impl SessionConfig {
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            sensor_count: self.sensor_count,
            threshold: self.fault_threshold,
            window: self.window,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
