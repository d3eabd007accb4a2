//! Backend selection for completed sessions.

use crate::core::SessionResult;
use crate::store::{LocalStore, PersistReport, ResultSink, StoreError};

/// Remote sink when one is configured with credentials, else local. A remote
/// failure falls back to the local store.
pub struct PreferRemote {
    remote: Option<Box<dyn ResultSink + Send + Sync>>,
    local: LocalStore,
}

impl PreferRemote {
    pub fn new(remote: Option<Box<dyn ResultSink + Send + Sync>>, local: LocalStore) -> Self {
        Self { remote, local }
    }

    pub fn local_only(local: LocalStore) -> Self {
        Self::new(None, local)
    }

    /// Use the gateway when `config` carries a token.
    #[cfg(feature = "gateway")]
    pub fn with_gateway(config: Option<crate::store::GatewayConfig>, local: LocalStore) -> Self {
        let remote = config
            .filter(|c| c.is_authenticated())
            .and_then(|c| match crate::store::BlockingGatewayClient::new(c) {
                Ok(client) => Some(Box::new(client) as Box<dyn ResultSink + Send + Sync>),
                Err(e) => {
                    tracing::warn!("gateway unavailable, storing locally: {e}");
                    None
                }
            });
        Self::new(remote, local)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

impl ResultSink for PreferRemote {
    fn persist(&self, result: &SessionResult) -> Result<PersistReport, StoreError> {
        if let Some(remote) = &self.remote {
            match remote.persist(result) {
                Ok(report) => return Ok(report),
                Err(e) => tracing::warn!(
                    session_id = %result.session_id(),
                    remote = %remote.describe(),
                    "remote persist failed, falling back to local store: {e}"
                ),
            }
        }
        self.local.persist(result)
    }

    fn describe(&self) -> String {
        match &self.remote {
            Some(remote) => format!("{} (fallback: {})", remote.describe(), self.local.describe()),
            None => self.local.describe(),
        }
    }
}
