//! Remote ingest client for session results.
//!
//! Posts completed sessions to the fleet gateway's HTTP ingest endpoint with a
//! bearer token. The HTTP client itself is behind the `gateway` feature.

use crate::core::{DiagnosisResult, SessionResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variable holding the gateway URL.
pub const GATEWAY_URL_ENV: &str = "IMU_DRIFT_GATEWAY_URL";

/// Environment variable holding the bearer token.
pub const GATEWAY_TOKEN_ENV: &str = "IMU_DRIFT_GATEWAY_TOKEN";

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL, e.g. `https://fleet.example.net`
    pub base_url: String,
    /// Bearer authentication token; empty means not signed in
    pub token: String,
}

impl GatewayConfig {
    /// Create a new gateway configuration.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Read the URL and token from the environment.
    pub fn from_env() -> Result<Self, GatewayError> {
        let base_url = std::env::var(GATEWAY_URL_ENV)
            .map_err(|_| GatewayError::Config(format!("{GATEWAY_URL_ENV} is not set")))?;
        let token = std::env::var(GATEWAY_TOKEN_ENV).unwrap_or_default();
        Ok(Self::new(base_url, token.trim()))
    }

    /// Whether requests would carry credentials.
    pub fn is_authenticated(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Get the ingest endpoint URL.
    pub fn ingest_url(&self) -> String {
        format!("{}/v1/sessions", self.base_url)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Gateway client error types.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway config error: {0}")]
    Config(String),
    #[error("Gateway network error: {0}")]
    Network(String),
    #[error("Gateway server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Gateway serialization error: {0}")]
    Serialization(String),
}

/// Upload body for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload<'a> {
    pub session_id: String,
    pub device_id: &'a str,
    pub timezone: String,
    /// RFC3339
    pub start_time: String,
    /// RFC3339
    pub end_time: Option<String>,
    pub model_version: &'a str,
    pub fault_threshold: f64,
    pub diagnoses: Vec<&'a DiagnosisResult>,
    pub meta: PayloadMeta,
}

/// Payload metadata.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadMeta {
    pub source: String,
    pub version: String,
    pub active_sensors: usize,
    pub total_data_points: usize,
}

impl<'a> SessionPayload<'a> {
    pub fn new(result: &'a SessionResult, device_id: &'a str) -> Self {
        Self {
            session_id: result.session.id.to_string(),
            device_id,
            timezone: chrono_tz::Tz::UTC.to_string(),
            start_time: result.session.start_time.to_rfc3339(),
            end_time: result.session.end_time.map(|t| t.to_rfc3339()),
            model_version: &result.model_version,
            fault_threshold: result.fault_threshold,
            diagnoses: result.diagnoses.values().collect(),
            meta: PayloadMeta {
                source: result.producer.name.clone(),
                version: result.producer.version.clone(),
                active_sensors: result.active_sensors,
                total_data_points: result.total_data_points,
            },
        }
    }
}

/// Gateway response from the ingest endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayResponse {
    /// Per-sensor acceptance, keyed by sensor id
    #[serde(default)]
    pub accepted: BTreeMap<u32, bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GatewayResponse {
    /// Count (saved, failed) for the diagnoses that were sent.
    ///
    /// A gateway that does not report per-sensor acceptance accepted everything.
    pub fn counts(&self, sent: usize) -> (usize, usize) {
        if self.accepted.is_empty() {
            return (sent, 0);
        }
        let saved = self.accepted.values().filter(|ok| **ok).count();
        (saved, sent.saturating_sub(saved))
    }
}

/// Device identifier derived from the hostname plus a per-process suffix.
pub fn device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "imu-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Gateway client.
#[cfg(feature = "gateway")]
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
    device_id: String,
}

#[cfg(feature = "gateway")]
impl GatewayClient {
    /// Create a new gateway client.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            device_id: device_id(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Test connection to the gateway.
    pub async fn test_connection(&self) -> Result<bool, GatewayError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Upload one session's diagnoses.
    pub async fn upload(&self, result: &SessionResult) -> Result<GatewayResponse, GatewayError> {
        if !self.config.is_authenticated() {
            return Err(GatewayError::Config("No gateway token".to_string()));
        }

        let payload = SessionPayload::new(result, &self.device_id);
        let response = self
            .client
            .post(self.config.ingest_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        // An empty body is a plain acknowledgement.
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(GatewayResponse::default());
        }
        serde_json::from_str(&body).map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Blocking gateway client for use in synchronous contexts.
#[cfg(feature = "gateway")]
pub struct BlockingGatewayClient {
    inner: GatewayClient,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "gateway")]
impl BlockingGatewayClient {
    /// Create a new blocking gateway client.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: GatewayClient::new(config)?,
            runtime,
        })
    }

    /// Create a client from the environment.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        self.inner.config()
    }

    /// Test connection to the gateway.
    pub fn test_connection(&self) -> Result<bool, GatewayError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    /// Upload one session's diagnoses.
    pub fn upload(&self, result: &SessionResult) -> Result<GatewayResponse, GatewayError> {
        self.runtime.block_on(self.inner.upload(result))
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        self.inner.device_id()
    }
}

#[cfg(feature = "gateway")]
impl crate::store::ResultSink for BlockingGatewayClient {
    fn persist(
        &self,
        result: &SessionResult,
    ) -> Result<crate::store::PersistReport, crate::store::StoreError> {
        let response = self.upload(result)?;
        let (diagnoses_saved, diagnoses_failed) = response.counts(result.diagnoses.len());
        tracing::info!(
            session_id = %result.session_id(),
            diagnoses_saved,
            diagnoses_failed,
            "session uploaded"
        );
        Ok(crate::store::PersistReport {
            diagnoses_saved,
            diagnoses_failed,
            // Raw samples stay local; the gateway only takes diagnoses.
            samples_saved: 0,
        })
    }

    fn describe(&self) -> String {
        format!("gateway {}", self.config().base_url)
    }
}
