//! Metering reverse proxy for the mercury service network.
//!
//! The sentinel sits in front of a provider's backends. It mirrors the
//! provider's on-ledger contracts from the ledger event feed, admits
//! requests that carry a valid usage voucher, records the freshest voucher
//! per contract as a claim, and forwards admitted requests to the backend
//! named by the first path segment.

pub mod auth;
pub mod claim_store;
pub mod config;
pub mod contract_cache;
pub mod cors;
pub mod error;
pub mod events;
pub mod metadata;
pub mod metrics;
pub mod proxy;
pub mod routes;
pub mod state;

pub use claim_store::{ClaimStore, InMemoryClaimStore, SqliteClaimStore};
pub use config::SentinelConfig;
pub use contract_cache::ContractCache;
pub use error::SentinelError;
pub use events::LedgerEvent;
pub use state::AppState;

use actix_web::web;

/// Mount every sentinel route. The proxy is the default service, so it
/// must be configured on the same `App` as the named routes.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    routes::health::configure(cfg);
    routes::contracts::configure(cfg);
    routes::gateway::configure(cfg);
}
