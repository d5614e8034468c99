use actix_web::{web, HttpResponse};
use mercury::{Chain, ContractKey, PubKey};
use serde::Serialize;

use crate::error::SentinelError;
use crate::metrics::CLAIMS_EVICTED;
use crate::state::AppState;

fn json_response<T: Serialize + ?Sized>(value: &T) -> Result<HttpResponse, SentinelError> {
    let body = serde_json::to_string(value)?;
    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(body))
}

/// Parse `{provider}/{chain}/{spender}`; extra trailing segments are ignored.
fn parse_key(tail: &str) -> Result<ContractKey, SentinelError> {
    let mut parts = tail.split('/');
    let (Some(provider), Some(chain), Some(spender)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(SentinelError::MalformedInput(
            "not enough parameters".to_string(),
        ));
    };

    let provider: PubKey = provider
        .parse()
        .map_err(|e| SentinelError::MalformedInput(format!("bad provider pubkey: {e}")))?;
    let chain: Chain = chain
        .parse()
        .map_err(|e| SentinelError::MalformedInput(format!("bad chain: {e}")))?;
    let spender: PubKey = spender
        .parse()
        .map_err(|e| SentinelError::MalformedInput(format!("bad spender pubkey: {e}")))?;

    Ok(ContractKey::new(provider, chain, spender))
}

/// GET /metadata.json
pub async fn metadata(state: web::Data<AppState>) -> Result<HttpResponse, SentinelError> {
    json_response(state.metadata.as_ref())
}

/// GET /contract/{provider}/{chain}/{spender}
pub async fn contract(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, SentinelError> {
    let key = parse_key(&path)?;
    let contract = state.contracts.get(&key)?;
    json_response(&contract)
}

/// GET /claim/{provider}/{chain}/{spender}
pub async fn claim(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, SentinelError> {
    let key = parse_key(&path)?;
    let claim = state.claims.get(&key)?;
    json_response(&claim)
}

/// GET /open_claims/ - Unsettled claims whose contracts are still open.
/// Claims of closed contracts are evicted on the way.
pub async fn open_claims(state: web::Data<AppState>) -> Result<HttpResponse, SentinelError> {
    let height = state.contracts.current_height();
    let mut open = Vec::new();

    for claim in state.claims.list()? {
        if claim.claimed {
            continue;
        }
        let key = claim.key();
        let contract = match state.contracts.get(&key) {
            Ok(contract) => contract,
            Err(e) => {
                tracing::debug!(claim = %key, error = %e, "skipping claim without contract");
                continue;
            }
        };
        if contract.is_closed(height) {
            match state.claims.remove(&key) {
                Ok(_) => {
                    CLAIMS_EVICTED.inc();
                    tracing::info!(claim = %key, height, "evicted claim of closed contract");
                }
                Err(e) => tracing::warn!(claim = %key, error = %e, "failed to evict claim"),
            }
            continue;
        }
        open.push(claim);
    }

    open.sort_by(|a, b| a.key().cmp(&b.key()));
    json_response(&open)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metadata.json", web::get().to(metadata))
        .route("/contract/{tail:.*}", web::get().to(contract))
        .route("/claim/{tail:.*}", web::get().to(claim))
        .route("/open_claims", web::get().to(open_claims))
        .route("/open_claims/", web::get().to(open_claims));
}
