use std::sync::Arc;
use std::time::Duration;

use crate::claim_store::ClaimStore;
use crate::config::SentinelConfig;
use crate::contract_cache::ContractCache;
use crate::error::SentinelError;
use crate::metadata::Metadata;

/// Shared application state, built once and handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SentinelConfig>,
    pub contracts: Arc<ContractCache>,
    pub claims: Arc<dyn ClaimStore>,
    pub metadata: Arc<Metadata>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: SentinelConfig,
        contracts: Arc<ContractCache>,
        claims: Arc<dyn ClaimStore>,
    ) -> Result<Self, SentinelError> {
        // Only a connect timeout: proxied bodies stream for as long as the backend sends.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SentinelError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            metadata: Arc::new(Metadata::from_config(&config)),
            config: Arc::new(config),
            contracts,
            claims,
            http_client,
        })
    }
}
