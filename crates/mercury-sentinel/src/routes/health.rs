use actix_web::{http::header, web, HttpRequest, HttpResponse};
use prometheus::Encoder;
use sha2::{Digest, Sha256};

use crate::error::SentinelError;
use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health - Liveness plus the cache watermark
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "mercury-sentinel",
        "version": env!("CARGO_PKG_VERSION"),
        "height": state.contracts.current_height(),
        "contracts": state.contracts.len(),
    }))
}

/// Compare SHA-256 digests so neither the content nor the length of the
/// configured token shows up in timing.
fn token_matches(presented: &str, expected: &str) -> bool {
    let diff = Sha256::digest(presented.as_bytes())
        .iter()
        .zip(Sha256::digest(expected.as_bytes()).iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// GET /metrics - Prometheus text exposition, gated by `METRICS_TOKEN` when set
pub async fn metrics(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, SentinelError> {
    if let Some(expected) = state.config.metrics_token.as_deref() {
        if !bearer_token(&req).is_some_and(|token| token_matches(token, expected)) {
            return Err(SentinelError::Unauthorized(
                "metrics require a valid bearer token".to_string(),
            ));
        }
    }

    let mut exposition = Vec::new();
    prometheus::TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut exposition)
        .map_err(|e| SentinelError::Internal(format!("metrics encoding: {e}")))?;

    Ok(HttpResponse::Ok()
        .content_type(prometheus::TEXT_FORMAT)
        .body(exposition))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
