use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Authorization outcomes
pub static REQUESTS_AUTHORIZED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sentinel_requests_authorized_total",
            "Requests authorized by a voucher, per backend",
        ),
        &["chain"],
    )
    .unwrap()
});

pub static REQUESTS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sentinel_requests_rejected_total",
            "Requests rejected before proxying, per reason",
        ),
        &["reason"],
    )
    .unwrap()
});

// Proxy metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sentinel_proxy_requests_total",
            "Proxied requests per backend and upstream status",
        ),
        &["chain", "status"],
    )
    .unwrap()
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("sentinel_proxy_latency_seconds", "Time to upstream response headers")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap()
});

// Claims
pub static CLAIMS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("sentinel_claims_stored_total", "Vouchers stored as claims").unwrap()
});

pub static CLAIMS_EVICTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sentinel_claims_evicted_total",
        "Claims evicted because their contract closed",
    )
    .unwrap()
});

// Event feed
pub static EVENTS_APPLIED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sentinel_events_applied_total", "Ledger events applied, per type"),
        &["type"],
    )
    .unwrap()
});

pub static CURRENT_HEIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("sentinel_current_height", "Latest ledger height seen on the feed").unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS_AUTHORIZED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(REQUESTS_REJECTED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
            .unwrap();
        REGISTRY.register(Box::new(PROXY_LATENCY.clone())).unwrap();
        REGISTRY.register(Box::new(CLAIMS_STORED.clone())).unwrap();
        REGISTRY.register(Box::new(CLAIMS_EVICTED.clone())).unwrap();
        REGISTRY.register(Box::new(EVENTS_APPLIED.clone())).unwrap();
        REGISTRY.register(Box::new(CURRENT_HEIGHT.clone())).unwrap();
    });
}
