use std::sync::Arc;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mercury_sentinel::{
    config::SentinelConfig, cors::build_cors, events::spawn_event_listener,
    metrics::register_metrics, AppState, ClaimStore, ContractCache, InMemoryClaimStore,
    SqliteClaimStore,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SentinelConfig::from_env().expect("Failed to load configuration");
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting sentinel on port {}", port);
    tracing::info!("Provider pubkey: {}", config.provider_pubkey);
    tracing::info!("Backends: {:?}", config.backends);

    let claims: Arc<dyn ClaimStore> = match config.claim_store_location {
        Some(ref path) => {
            let store = SqliteClaimStore::open(path).expect("Failed to open claim store");
            tracing::info!("Claim store opened at: {}", path);
            Arc::new(store)
        }
        None => {
            tracing::warn!("CLAIM_STORE_LOCATION not set, claims are kept in memory only");
            Arc::new(InMemoryClaimStore::new())
        }
    };
    let contracts = Arc::new(ContractCache::new());

    register_metrics();

    let event_stream_host = config.event_stream_host.clone();
    let state = AppState::new(config, Arc::clone(&contracts), Arc::clone(&claims))
        .expect("Failed to build application state");

    match event_stream_host {
        Some(url) => {
            tracing::info!("Following ledger events at: {}", url);
            spawn_event_listener(state.http_client.clone(), url, contracts, claims);
        }
        None => tracing::warn!("EVENT_STREAM_HOST not set, contract cache will stay empty"),
    }

    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("Failed to create rate limiter config");

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .configure(mercury_sentinel::configure_app)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
