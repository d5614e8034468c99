use mercury::{Amount, Chain, PubKey};
use serde::Serialize;

use crate::config::SentinelConfig;

/// Static description of this gateway served at `/metadata.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub moniker: String,
    pub website: String,
    pub description: String,
    pub location: String,
    pub version: &'static str,
    pub source_chain: String,
    pub provider: ProviderMetadata,
    pub fees: FeeSchedule,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetadata {
    pub pubkey: PubKey,
    pub chains: Vec<Chain>,
}

/// Advertised rates, as decimal strings.
#[derive(Debug, Clone, Serialize)]
pub struct FeeSchedule {
    #[serde(with = "mercury::amount::amount_string")]
    pub subscription_rate: Amount,
    #[serde(with = "mercury::amount::amount_string")]
    pub pay_as_you_go_rate: Amount,
}

impl Metadata {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            moniker: config.moniker.clone(),
            website: config.website.clone(),
            description: config.description.clone(),
            location: config.location.clone(),
            version: env!("CARGO_PKG_VERSION"),
            source_chain: config.source_chain.clone(),
            provider: ProviderMetadata {
                pubkey: config.provider_pubkey,
                chains: config.backends.chains().cloned().collect(),
            },
            fees: FeeSchedule {
                subscription_rate: config.subscription_rate,
                pay_as_you_go_rate: config.pay_as_you_go_rate,
            },
        }
    }
}
