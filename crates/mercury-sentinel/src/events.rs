//! Ledger event feed consumer.
//!
//! The ledger publishes contract deltas and block heights as newline
//! delimited JSON. A single background task reads the feed and is the only
//! writer to the [`ContractCache`].

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use mercury::{Chain, Contract, ContractKey, PubKey};
use serde::{Deserialize, Serialize};

use crate::claim_store::ClaimStore;
use crate::contract_cache::ContractCache;
use crate::metrics::{CURRENT_HEIGHT, EVENTS_APPLIED};

/// Delay before reconnecting to a dropped feed.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Longest line accepted from the feed.
const MAX_LINE_LEN: usize = 1024 * 1024;

/// One delta on the ledger event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// The ledger committed a block.
    NewBlock { height: i64 },
    /// A contract was opened, settled or closed; carries the full new state.
    Contract { contract: Contract },
    /// A settlement consumed the claim up to `nonce`.
    ClaimSettled {
        provider: PubKey,
        chain: Chain,
        spender: PubKey,
        nonce: u64,
    },
}

impl LedgerEvent {
    fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::NewBlock { .. } => "new_block",
            LedgerEvent::Contract { .. } => "contract",
            LedgerEvent::ClaimSettled { .. } => "claim_settled",
        }
    }
}

/// Route one event to the cache or the claim store.
pub fn apply_event(cache: &ContractCache, claims: &dyn ClaimStore, event: &LedgerEvent) {
    if let LedgerEvent::ClaimSettled {
        provider,
        chain,
        spender,
        nonce,
    } = event
    {
        let key = ContractKey::new(*provider, chain.clone(), *spender);
        match claims.mark_claimed(&key, *nonce) {
            Ok(true) => tracing::debug!(claim = %key, nonce, "claim settled"),
            Ok(false) => {}
            Err(e) => tracing::warn!(claim = %key, error = %e, "failed to mark claim settled"),
        }
    } else {
        cache.apply(event);
        if let LedgerEvent::NewBlock { .. } = event {
            CURRENT_HEIGHT.set(cache.current_height());
        }
    }
    EVENTS_APPLIED.with_label_values(&[event.kind()]).inc();
}

/// Drain `events` into the stores. Returns the number of events applied.
pub async fn consume_events<S>(
    mut events: S,
    cache: &ContractCache,
    claims: &dyn ClaimStore,
) -> usize
where
    S: Stream<Item = LedgerEvent> + Unpin,
{
    let mut applied = 0;
    while let Some(event) = events.next().await {
        apply_event(cache, claims, &event);
        applied += 1;
    }
    applied
}

/// Split complete lines off `buf` and decode them. Malformed lines are
/// logged and skipped; a trailing partial line stays in `buf`.
pub fn drain_lines(buf: &mut Vec<u8>) -> Vec<LedgerEvent> {
    let mut events = Vec::new();
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<LedgerEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(error = %e, "skipping malformed feed line"),
        }
    }
    events
}

/// Follow the NDJSON feed at `url` forever, reconnecting after failures.
pub fn spawn_event_listener(
    http_client: reqwest::Client,
    url: String,
    cache: Arc<ContractCache>,
    claims: Arc<dyn ClaimStore>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match follow_feed(&http_client, &url, &cache, claims.as_ref()).await {
                Ok(applied) => {
                    tracing::warn!(url = %url, applied, "event feed ended, reconnecting")
                }
                Err(e) => tracing::error!(url = %url, error = %e, "event feed failed, reconnecting"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

async fn follow_feed(
    http_client: &reqwest::Client,
    url: &str,
    cache: &ContractCache,
    claims: &dyn ClaimStore,
) -> Result<usize, reqwest::Error> {
    let response = http_client.get(url).send().await?.error_for_status()?;
    tracing::info!(url = %url, "connected to event feed");

    let mut body = response.bytes_stream();
    let mut buf = Vec::new();
    let mut applied = 0;
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
        for event in drain_lines(&mut buf) {
            apply_event(cache, claims, &event);
            applied += 1;
        }
        if buf.len() > MAX_LINE_LEN {
            tracing::warn!(len = buf.len(), "discarding oversized feed line");
            buf.clear();
        }
    }
    Ok(applied)
}
