use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mercury::{Claim, ContractKey};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use crate::error::SentinelError;

/// Storage for the authoritative claim of each contract key.
///
/// Implementations must be thread-safe (`Send + Sync`) and upsert per key
/// atomically; keys are independent of each other.
pub trait ClaimStore: Send + Sync {
    fn get(&self, key: &ContractKey) -> Result<Claim, SentinelError>;

    /// Snapshot of every stored claim, in no particular order.
    fn list(&self) -> Result<Vec<Claim>, SentinelError>;

    /// Store `claim` if its nonce is at least the stored nonce.
    /// Returns `false` when a newer claim is already held.
    fn put(&self, claim: Claim) -> Result<bool, SentinelError> {
        self.put_if_newer(claim, false)
    }

    /// Nonce-gated upsert as a single atomic step. With `strict` the nonce
    /// must be greater than the stored one, so each nonce is accepted once.
    fn put_if_newer(&self, claim: Claim, strict: bool) -> Result<bool, SentinelError>;

    /// Returns whether a claim was removed.
    fn remove(&self, key: &ContractKey) -> Result<bool, SentinelError>;

    /// Flag the claim as settled if its nonce is covered by `nonce`.
    fn mark_claimed(&self, key: &ContractKey, nonce: u64) -> Result<bool, SentinelError>;
}

fn not_found(key: &ContractKey) -> SentinelError {
    SentinelError::NotFound(format!("claim not found: {key}"))
}

/// A resubmitted voucher must not reopen a claim that was already settled.
fn merge_settled(mut claim: Claim, stored: &Claim) -> Claim {
    if claim.nonce == stored.nonce && stored.claimed {
        claim.claimed = true;
    }
    claim
}

/// In-memory claim store backed by DashMap. Lost on restart.
#[derive(Default)]
pub struct InMemoryClaimStore {
    claims: DashMap<ContractKey, Claim>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn get(&self, key: &ContractKey) -> Result<Claim, SentinelError> {
        self.claims
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(key))
    }

    fn list(&self) -> Result<Vec<Claim>, SentinelError> {
        Ok(self.claims.iter().map(|e| e.value().clone()).collect())
    }

    fn put_if_newer(&self, claim: Claim, strict: bool) -> Result<bool, SentinelError> {
        match self.claims.entry(claim.key()) {
            Entry::Occupied(mut stored) => {
                let accepted = if strict {
                    claim.nonce > stored.get().nonce
                } else {
                    claim.supersedes(stored.get())
                };
                if !accepted {
                    return Ok(false);
                }
                let merged = merge_settled(claim, stored.get());
                stored.insert(merged);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(claim);
                Ok(true)
            }
        }
    }

    fn remove(&self, key: &ContractKey) -> Result<bool, SentinelError> {
        Ok(self.claims.remove(key).is_some())
    }

    fn mark_claimed(&self, key: &ContractKey, nonce: u64) -> Result<bool, SentinelError> {
        match self.claims.get_mut(key) {
            Some(mut claim) if claim.nonce <= nonce => {
                claim.claimed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Persistent claim store backed by SQLite. Survives restarts.
pub struct SqliteClaimStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteClaimStore {
    /// Open (or create) a SQLite claim database at the given path.
    ///
    /// On Unix the file is restricted to 0600, since claims carry
    /// spendable signatures.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS claims (
                provider TEXT NOT NULL,
                chain TEXT NOT NULL,
                spender TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                amount TEXT NOT NULL,
                signature TEXT NOT NULL,
                claimed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (provider, chain, spender)
            );
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set claim database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("claim store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn nonce_to_sql(nonce: u64) -> Result<i64, SentinelError> {
    i64::try_from(nonce)
        .map_err(|_| SentinelError::MalformedInput(format!("nonce out of range: {nonce}")))
}

fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    let nonce: i64 = row.get(3)?;
    Ok(Claim {
        provider: parse_column(row, 0)?,
        chain: parse_column(row, 1)?,
        spender: parse_column(row, 2)?,
        nonce: nonce.max(0).unsigned_abs(),
        amount: parse_column(row, 4)?,
        signature: row.get(5)?,
        claimed: row.get(6)?,
    })
}

macro_rules! upsert_claim {
    ($gate:literal) => {
        concat!(
            "INSERT INTO claims
                (provider, chain, spender, nonce, amount, signature, claimed, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (provider, chain, spender) DO UPDATE SET
                nonce = excluded.nonce,
                amount = excluded.amount,
                signature = excluded.signature,
                claimed = CASE WHEN excluded.nonce = claims.nonce
                               THEN claims.claimed OR excluded.claimed
                               ELSE excluded.claimed END,
                updated_at = excluded.updated_at
             WHERE excluded.nonce ",
            $gate,
            " claims.nonce"
        )
    };
}

const UPSERT: &str = upsert_claim!(">=");
const UPSERT_STRICT: &str = upsert_claim!(">");

const SELECT_CLAIM: &str =
    "SELECT provider, chain, spender, nonce, amount, signature, claimed FROM claims";

impl ClaimStore for SqliteClaimStore {
    fn get(&self, key: &ContractKey) -> Result<Claim, SentinelError> {
        let conn = self.conn();
        conn.query_row(
            &format!("{SELECT_CLAIM} WHERE provider = ?1 AND chain = ?2 AND spender = ?3"),
            params![
                key.provider.to_string(),
                key.chain.as_str(),
                key.client.to_string()
            ],
            row_to_claim,
        )
        .optional()?
        .ok_or_else(|| not_found(key))
    }

    fn list(&self) -> Result<Vec<Claim>, SentinelError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(SELECT_CLAIM)?;
        let claims = stmt
            .query_map([], row_to_claim)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(claims)
    }

    fn put_if_newer(&self, claim: Claim, strict: bool) -> Result<bool, SentinelError> {
        let nonce = nonce_to_sql(claim.nonce)?;
        let conn = self.conn();
        // The WHERE clause makes the nonce gate atomic at the database level.
        let sql = if strict { UPSERT_STRICT } else { UPSERT };
        let changed = conn.execute(
            sql,
            params![
                claim.provider.to_string(),
                claim.chain.as_str(),
                claim.spender.to_string(),
                nonce,
                claim.amount.to_string(),
                claim.signature,
                claim.claimed,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(changed > 0)
    }

    fn remove(&self, key: &ContractKey) -> Result<bool, SentinelError> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM claims WHERE provider = ?1 AND chain = ?2 AND spender = ?3",
            params![
                key.provider.to_string(),
                key.chain.as_str(),
                key.client.to_string()
            ],
        )?;
        Ok(removed > 0)
    }

    fn mark_claimed(&self, key: &ContractKey, nonce: u64) -> Result<bool, SentinelError> {
        let nonce = i64::try_from(nonce).unwrap_or(i64::MAX);
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE claims SET claimed = 1
             WHERE provider = ?1 AND chain = ?2 AND spender = ?3 AND nonce <= ?4",
            params![
                key.provider.to_string(),
                key.chain.as_str(),
                key.client.to_string(),
                nonce
            ],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(spender: &str, nonce: u64, amount: u128) -> Claim {
        Claim {
            provider: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            chain: "eth-mainnet".parse().unwrap(),
            spender: spender.parse().unwrap(),
            nonce,
            amount,
            signature: format!("0x{nonce:02x}"),
            claimed: false,
        }
    }

    const ALICE: &str = "0x2222222222222222222222222222222222222222";
    const BOB: &str = "0x3333333333333333333333333333333333333333";

    fn exercise_store(store: &dyn ClaimStore) {
        let first = claim(ALICE, 5, 50);
        let key = first.key();
        assert!(matches!(store.get(&key), Err(SentinelError::NotFound(_))));

        assert!(store.put(first.clone()).unwrap());
        assert_eq!(store.get(&key).unwrap(), first);

        // stale nonce is ignored
        assert!(!store.put(claim(ALICE, 4, 999)).unwrap());
        assert_eq!(store.get(&key).unwrap().amount, 50);

        // equal nonce overwrites
        assert!(store.put(claim(ALICE, 5, 60)).unwrap());
        assert_eq!(store.get(&key).unwrap().amount, 60);

        assert!(store.put(claim(ALICE, 9, 90)).unwrap());
        assert!(store.put(claim(BOB, 1, 10)).unwrap());
        assert_eq!(store.list().unwrap().len(), 2);

        // settlement up to an older nonce leaves the newer claim open
        assert!(!store.mark_claimed(&key, 8).unwrap());
        assert!(store.mark_claimed(&key, 9).unwrap());
        assert!(store.get(&key).unwrap().claimed);

        // resubmitting the settled voucher keeps it settled
        assert!(store.put(claim(ALICE, 9, 90)).unwrap());
        assert!(store.get(&key).unwrap().claimed);
        assert!(store.put(claim(ALICE, 10, 100)).unwrap());
        assert!(!store.get(&key).unwrap().claimed);

        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);

        // strict upserts accept each nonce once
        assert!(store.put_if_newer(claim(ALICE, 3, 30), true).unwrap());
        assert!(!store.put_if_newer(claim(ALICE, 3, 30), true).unwrap());
        assert!(!store.put_if_newer(claim(ALICE, 2, 20), true).unwrap());
        assert!(store.put_if_newer(claim(ALICE, 4, 40), true).unwrap());
        assert_eq!(store.get(&key).unwrap().amount, 40);
    }

    /// Many threads race the same nonces; each nonce must be won exactly once.
    fn race_strict_puts(store: std::sync::Arc<dyn ClaimStore>) {
        const THREADS: usize = 8;
        for nonce in 1..=50u64 {
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let store = std::sync::Arc::clone(&store);
                    let barrier = std::sync::Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.put_if_newer(claim(ALICE, nonce, 1), true).unwrap()
                    })
                })
                .collect();
            let accepted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(accepted, 1, "nonce {nonce} accepted {accepted} times");
        }
    }

    #[test]
    fn test_in_memory_strict_put_accepts_nonce_once() {
        race_strict_puts(std::sync::Arc::new(InMemoryClaimStore::new()));
    }

    #[test]
    fn test_sqlite_strict_put_accepts_nonce_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        let store = SqliteClaimStore::open(path.to_str().unwrap()).unwrap();
        race_strict_puts(std::sync::Arc::new(store));
    }

    #[test]
    fn test_in_memory_store() {
        exercise_store(&InMemoryClaimStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        let store = SqliteClaimStore::open(path.to_str().unwrap()).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        let path = path.to_str().unwrap();

        let original = claim(ALICE, 7, u128::MAX);
        {
            let store = SqliteClaimStore::open(path).unwrap();
            store.put(original.clone()).unwrap();
        }
        let store = SqliteClaimStore::open(path).unwrap();
        assert_eq!(store.get(&original.key()).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn test_sqlite_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        SqliteClaimStore::open(path.to_str().unwrap()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_concurrent_puts_keep_highest_nonce() {
        let store = std::sync::Arc::new(InMemoryClaimStore::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..100u64 {
                        store.put(claim(ALICE, n * 8 + t, 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stored = store.get(&claim(ALICE, 0, 0).key()).unwrap();
        assert_eq!(stored.nonce, 99 * 8 + 7);
    }
}
