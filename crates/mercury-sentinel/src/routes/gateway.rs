use actix_web::{web, HttpRequest, HttpResponse};
use mercury::{Chain, QUERY_ARK_AUTH};

use crate::auth::{authorize, rejection_reason};
use crate::error::SentinelError;
use crate::metrics::REQUESTS_REJECTED;
use crate::proxy::{build_upstream, forward, split_selector, take_query_param};
use crate::state::AppState;

/// ANY /{selector}/{path...} - Authorize the voucher, then proxy to the backend.
/// The body is not read until the request is authorized.
pub async fn proxy(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, SentinelError> {
    let (voucher, query) = take_query_param(req.query_string(), QUERY_ARK_AUTH);

    let prepared = authorize_request(&req, &state, voucher.as_deref(), &query);
    let (chain, upstream) = match prepared {
        Ok(ok) => ok,
        Err(e) => {
            REQUESTS_REJECTED
                .with_label_values(&[rejection_reason(&e)])
                .inc();
            tracing::debug!(path = %req.path(), error = %e, "request rejected");
            return Err(e);
        }
    };

    forward(&state.http_client, &req, upstream, body, chain.as_str()).await
}

fn authorize_request(
    req: &HttpRequest,
    state: &AppState,
    voucher: Option<&str>,
    query: &str,
) -> Result<(Chain, crate::proxy::Upstream), SentinelError> {
    let voucher = voucher
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SentinelError::Unauthorized("missing voucher".to_string()))?;

    let (selector, rest) = split_selector(req.uri().path())
        .ok_or_else(|| SentinelError::MalformedInput("missing backend selector".to_string()))?;
    let chain: Chain = selector
        .parse()
        .map_err(|e| SentinelError::MalformedInput(format!("bad backend selector: {e}")))?;
    let backend = state
        .config
        .backends
        .resolve(&chain)
        .ok_or_else(|| SentinelError::NotFound(format!("unknown backend: {chain}")))?;

    authorize(state, voucher, &chain)?;

    let upstream = build_upstream(backend, rest, query)?;
    Ok((chain, upstream))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::route().to(proxy));
}
