//! Height-aware read replica of ledger contracts.
//!
//! Fed only by the event-feed consumer. Readers get owned snapshots, and
//! must re-derive open/closed from [`ContractCache::current_height`] at the
//! moment of use.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use mercury::{Contract, ContractKey};

use crate::error::SentinelError;
use crate::events::LedgerEvent;

#[derive(Debug, Default)]
pub struct ContractCache {
    contracts: DashMap<ContractKey, Contract>,
    height: AtomicI64,
}

impl ContractCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ContractKey) -> Result<Contract, SentinelError> {
        self.contracts
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SentinelError::NotFound(format!("contract not found: {key}")))
    }

    /// Latest block height seen on the feed. Never decreases.
    pub fn current_height(&self) -> i64 {
        self.height.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Apply one feed delta. Contract updates replace the stored value
    /// whole, so replays and duplicates are harmless. Returns whether the
    /// event concerned the cache.
    pub fn apply(&self, event: &LedgerEvent) -> bool {
        match event {
            LedgerEvent::NewBlock { height } => {
                self.advance_height(*height);
                true
            }
            LedgerEvent::Contract { contract } => {
                self.contracts.insert(contract.key(), contract.clone());
                true
            }
            LedgerEvent::ClaimSettled { .. } => false,
        }
    }

    fn advance_height(&self, height: i64) {
        let previous = self.height.fetch_max(height, Ordering::AcqRel);
        if height < previous {
            tracing::debug!(height, current = previous, "ignoring stale block height");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury::ContractType;
    use std::sync::Arc;

    fn contract(height: i64, paid: u128) -> Contract {
        let mut c = Contract::new(
            "0x1111111111111111111111111111111111111111".parse().unwrap(),
            "eth".parse().unwrap(),
            "0x2222222222222222222222222222222222222222".parse().unwrap(),
            ContractType::PayAsYouGo,
        );
        c.height = height;
        c.duration = 10;
        c.deposit = 1_000;
        c.paid = paid;
        c
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let cache = ContractCache::new();
        let err = cache.get(&contract(1, 0).key()).unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }

    #[test]
    fn test_contract_updates_overwrite() {
        let cache = ContractCache::new();
        let first = contract(5, 0);
        let second = contract(5, 300);

        assert!(cache.apply(&LedgerEvent::Contract { contract: first.clone() }));
        assert!(cache.apply(&LedgerEvent::Contract { contract: second.clone() }));
        // replayed delta
        cache.apply(&LedgerEvent::Contract { contract: second.clone() });

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&first.key()).unwrap().paid, 300);
    }

    #[test]
    fn test_height_is_monotonic() {
        let cache = ContractCache::new();
        cache.apply(&LedgerEvent::NewBlock { height: 10 });
        cache.apply(&LedgerEvent::NewBlock { height: 7 });
        assert_eq!(cache.current_height(), 10);
        cache.apply(&LedgerEvent::NewBlock { height: 11 });
        assert_eq!(cache.current_height(), 11);
    }

    #[test]
    fn test_open_state_follows_watermark() {
        let cache = ContractCache::new();
        let c = contract(10, 0);
        cache.apply(&LedgerEvent::Contract { contract: c.clone() });

        cache.apply(&LedgerEvent::NewBlock { height: 15 });
        assert!(cache.get(&c.key()).unwrap().is_open(cache.current_height()));

        cache.apply(&LedgerEvent::NewBlock { height: 21 });
        assert!(cache.get(&c.key()).unwrap().is_closed(cache.current_height()));
    }

    #[test]
    fn test_concurrent_readers_see_whole_contracts() {
        let cache = Arc::new(ContractCache::new());
        let c = contract(1, 0);
        let key = c.key();
        cache.apply(&LedgerEvent::Contract { contract: c });

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..500u128 {
                    let mut next = contract(1, i);
                    next.queries = i as u64;
                    cache.apply(&LedgerEvent::Contract { contract: next });
                    cache.apply(&LedgerEvent::NewBlock { height: i as i64 });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                std::thread::spawn(move || {
                    let mut last_height = 0;
                    for _ in 0..500 {
                        let seen = cache.get(&key).unwrap();
                        assert_eq!(seen.paid, seen.queries as u128);
                        let h = cache.current_height();
                        assert!(h >= last_height);
                        last_height = h;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
