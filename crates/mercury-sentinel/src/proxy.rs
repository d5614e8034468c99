use std::time::Instant;

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use url::Url;

use crate::error::SentinelError;
use crate::metrics::{PROXY_LATENCY, PROXY_REQUESTS_TOTAL};

/// Connection-scoped headers that never cross the proxy hop, in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length", // set from the body being sent
    "proxy-authorization",
    "proxy-connection",
    "upgrade",
    "te",
    "trailer",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Join two path pieces with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Upstream path in decoded and on-the-wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedPath {
    pub path: String,
    pub escaped: String,
}

/// Join a backend base path and a request remainder. The decoded and the
/// percent-escaped forms are joined independently, since an escaped `%2F`
/// decodes to a separator.
pub fn join_url_path(base_escaped: &str, rest_escaped: &str) -> JoinedPath {
    let decode = |s: &str| {
        urlencoding::decode(s)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };
    JoinedPath {
        path: single_joining_slash(&decode(base_escaped), &decode(rest_escaped)),
        escaped: single_joining_slash(base_escaped, rest_escaped),
    }
}

/// Backend query first, then the client's, joined by `&` only when both are present.
pub fn merge_query(target: &str, request: &str) -> String {
    if target.is_empty() || request.is_empty() {
        format!("{target}{request}")
    } else {
        format!("{target}&{request}")
    }
}

/// Split a raw query into the value of `key` and the query without it.
/// Every occurrence of `key` is removed; the other pairs keep their order
/// and encoding. The first occurrence wins.
pub fn take_query_param(query: &str, key: &str) -> (Option<String>, String) {
    let mut found = None;
    let mut kept = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = urlencoding::decode(name).unwrap_or(std::borrow::Cow::Borrowed(name));
        if name == key {
            if found.is_none() {
                let value =
                    urlencoding::decode(value).unwrap_or(std::borrow::Cow::Borrowed(value));
                found = Some(value.into_owned());
            }
        } else {
            kept.push(pair);
        }
    }
    (found, kept.join("&"))
}

/// Split a request path into its backend selector and the remainder
/// (leading `/` kept, empty when the path is just the selector).
pub fn split_selector(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (selector, rest) = match trimmed.find('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };
    if selector.is_empty() {
        None
    } else {
        Some((selector, rest))
    }
}

/// Outbound target after rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub url: Url,
    /// User-info lifted out of the backend URL.
    pub basic_auth: Option<(String, Option<String>)>,
}

/// Rewrite the request target onto `backend`: join paths, merge queries and
/// lift any user-info into Basic-Auth credentials.
pub fn build_upstream(
    backend: &Url,
    rest_escaped: &str,
    query: &str,
) -> Result<Upstream, SentinelError> {
    let mut url = backend.clone();

    let joined = join_url_path(backend.path(), rest_escaped);
    url.set_path(&joined.escaped);

    let merged = merge_query(backend.query().unwrap_or(""), query);
    url.set_query(if merged.is_empty() { None } else { Some(&merged) });
    url.set_fragment(None);

    let basic_auth = if url.username().is_empty() && url.password().is_none() {
        None
    } else {
        let username = urlencoding::decode(url.username())
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| url.username().to_string());
        let password = url.password().map(|p| {
            urlencoding::decode(p)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| p.to_string())
        });
        let strip = || SentinelError::Internal("cannot strip backend user-info".to_string());
        url.set_username("").map_err(|_| strip())?;
        url.set_password(None).map_err(|_| strip())?;
        Some((username, password))
    };

    tracing::debug!(path = %joined.path, host = ?url.host_str(), "rewrote upstream target");
    Ok(Upstream { url, basic_auth })
}

/// Chunks buffered between the inbound payload and the upstream request.
const RELAY_CAPACITY: usize = 8;

/// Hand the inbound payload to a `Send` stream that reqwest can consume.
///
/// `web::Payload` is bound to the worker thread, so a local task pumps it
/// into a channel. Backpressure comes from the bounded channel.
fn relay_payload(
    mut payload: web::Payload,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let (tx, rx) = tokio::sync::mpsc::channel(RELAY_CAPACITY);
    actix_web::rt::spawn(async move {
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| std::io::Error::other(e.to_string()));
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    })
}

/// Length of the inbound body: `Some(0)` when there is none, `None` when
/// it is chunked.
fn inbound_body_len(req: &HttpRequest) -> Option<u64> {
    let headers = req.headers();
    match headers.get(header::CONTENT_LENGTH) {
        Some(len) => len.to_str().ok().and_then(|v| v.trim().parse().ok()),
        None if headers.contains_key(header::TRANSFER_ENCODING) => None,
        None => Some(0),
    }
}

/// Forward the request to `upstream`, streaming the body both ways.
pub async fn forward(
    client: &reqwest::Client,
    original_req: &HttpRequest,
    upstream: Upstream,
    body: web::Payload,
    chain: &str,
) -> Result<HttpResponse, SentinelError> {
    let method = reqwest::Method::from_bytes(original_req.method().as_str().as_bytes())
        .map_err(|_| SentinelError::MalformedInput("invalid HTTP method".to_string()))?;

    let mut request_builder = client.request(method, upstream.url);

    // reqwest sends no default User-Agent, so an absent one stays absent
    for (name, value) in original_req.headers() {
        if name.as_str().eq_ignore_ascii_case("x-forwarded-for") || is_hop_by_hop(name.as_str()) {
            continue;
        }
        request_builder = request_builder.header(name.as_str(), value.as_bytes());
    }

    if let Some(peer) = original_req.peer_addr() {
        let forwarded_for = match original_req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(prior) => format!("{prior}, {}", peer.ip()),
            None => peer.ip().to_string(),
        };
        request_builder = request_builder.header("x-forwarded-for", forwarded_for);
    }

    if let Some((username, password)) = upstream.basic_auth {
        request_builder = request_builder.basic_auth(username, password);
    }

    match inbound_body_len(original_req) {
        Some(0) => {}
        Some(len) => {
            request_builder = request_builder
                .header(header::CONTENT_LENGTH.as_str(), len)
                .body(reqwest::Body::wrap_stream(relay_payload(body)));
        }
        None => {
            request_builder = request_builder.body(reqwest::Body::wrap_stream(relay_payload(body)));
        }
    }

    let started = Instant::now();
    let response = request_builder.send().await.map_err(|e| {
        tracing::error!(chain = %chain, error = %e, "proxy request failed");
        PROXY_REQUESTS_TOTAL
            .with_label_values(&[chain, "error"])
            .inc();
        SentinelError::Upstream(e.to_string())
    })?;
    PROXY_LATENCY.observe(started.elapsed().as_secs_f64());

    let status = response.status();
    PROXY_REQUESTS_TOTAL
        .with_label_values(&[chain, status.as_str()])
        .inc();

    let mut builder =
        HttpResponse::build(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in response.headers() {
        if !is_hop_by_hop(name.as_str()) {
            builder.append_header((name.as_str(), value.as_bytes()));
        }
    }

    let chain = chain.to_string();
    let stream = response.bytes_stream().map_err(move |e| {
        tracing::warn!(chain = %chain, error = %e, "upstream body interrupted");
        e
    });
    Ok(builder.streaming(stream))
}
