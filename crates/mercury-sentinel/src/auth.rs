//! Voucher authorization for the proxy route.
//!
//! A request is admitted when it carries a voucher that is signed by its
//! spender, names this gateway's provider and the requested backend, is
//! backed by a contract open at the current height, and stays inside that
//! contract's funded capacity. The admitted voucher becomes the stored
//! claim for its key.

use mercury::{Amount, Chain, Claim, Contract, ContractType, Voucher};

use crate::error::SentinelError;
use crate::metrics::{CLAIMS_STORED, REQUESTS_AUTHORIZED};
use crate::state::AppState;

/// A request that passed authorization.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub contract: Contract,
    pub claim: Claim,
}

/// Authorize `encoded` (the raw voucher parameter) for `chain`.
pub fn authorize(
    state: &AppState,
    encoded: &str,
    chain: &Chain,
) -> Result<Authorized, SentinelError> {
    let voucher = Voucher::decode(encoded)?;
    voucher.verify()?;

    if voucher.provider != state.config.provider_pubkey {
        return Err(SentinelError::Unauthorized(format!(
            "voucher is for provider {}, not {}",
            voucher.provider, state.config.provider_pubkey
        )));
    }
    if &voucher.chain != chain {
        return Err(SentinelError::Unauthorized(format!(
            "voucher is for chain {}, not {chain}",
            voucher.chain
        )));
    }

    let key = voucher.key();
    let contract = match state.contracts.get(&key) {
        Ok(contract) => contract,
        Err(SentinelError::NotFound(_)) => {
            return Err(SentinelError::ContractClosed(format!("no contract for {key}")))
        }
        Err(e) => return Err(e),
    };
    let height = state.contracts.current_height();
    if contract.is_closed(height) {
        return Err(SentinelError::ContractClosed(format!(
            "contract {key} is not open at height {height}"
        )));
    }

    let stored_nonce = match state.claims.get(&key) {
        Ok(stored) => Some(stored.nonce),
        Err(SentinelError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    check_allowance(&contract, voucher.nonce, voucher.amount, stored_nonce)?;

    // The read above only screens. The store decides atomically, so a
    // pay-as-you-go nonce admits a single request however many race for it.
    let strict = contract.contract_type == ContractType::PayAsYouGo;
    let claim = voucher.into_claim();
    if !state.claims.put_if_newer(claim.clone(), strict)? {
        return Err(SentinelError::Unauthorized(format!(
            "nonce {} already used for {key}",
            claim.nonce
        )));
    }
    CLAIMS_STORED.inc();
    REQUESTS_AUTHORIZED
        .with_label_values(&[chain.as_str()])
        .inc();

    tracing::debug!(claim = %key, nonce = claim.nonce, amount = %claim.amount, "voucher accepted");
    Ok(Authorized { contract, claim })
}

/// Check a voucher against the contract's funded capacity.
///
/// Pay-as-you-go vouchers count queries, so each must carry a fresh nonce
/// and neither the signed amount nor `rate * nonce` may exceed the deposit.
/// Subscription vouchers may be reused at the same nonce; their amount is
/// capped by the deposit and by `rate * duration`.
pub fn check_allowance(
    contract: &Contract,
    nonce: u64,
    amount: Amount,
    stored_nonce: Option<u64>,
) -> Result<(), SentinelError> {
    match contract.contract_type {
        ContractType::PayAsYouGo => {
            if let Some(stored) = stored_nonce {
                if nonce <= stored {
                    return Err(SentinelError::Unauthorized(format!(
                        "stale nonce {nonce}, already at {stored}"
                    )));
                }
            }
            let usage = contract
                .rate
                .checked_mul(Amount::from(nonce))
                .unwrap_or(Amount::MAX);
            let cost = usage.max(amount);
            if cost > contract.deposit {
                return Err(SentinelError::InsufficientAllowance(format!(
                    "voucher cost {cost} exceeds remaining allowance {}",
                    contract.remaining()
                )));
            }
        }
        ContractType::Subscription => {
            if let Some(stored) = stored_nonce {
                if nonce < stored {
                    return Err(SentinelError::Unauthorized(format!(
                        "stale nonce {nonce}, already at {stored}"
                    )));
                }
            }
            let term = contract
                .rate
                .checked_mul(Amount::from(contract.duration.max(0).unsigned_abs()))
                .unwrap_or(Amount::MAX);
            let ceiling = term.min(contract.deposit);
            if amount > ceiling {
                return Err(SentinelError::InsufficientAllowance(format!(
                    "voucher amount {amount} exceeds subscription ceiling {ceiling}"
                )));
            }
        }
    }
    Ok(())
}

/// Metric label for a rejected request.
pub fn rejection_reason(err: &SentinelError) -> &'static str {
    match err {
        SentinelError::MalformedInput(_) => "malformed",
        SentinelError::NotFound(_) => "unknown_backend",
        SentinelError::Unauthorized(_) => "unauthorized",
        SentinelError::InsufficientAllowance(_) => "insufficient_allowance",
        SentinelError::ContractClosed(_) => "contract_closed",
        SentinelError::Upstream(_) => "upstream",
        SentinelError::Serialization(_)
        | SentinelError::Database(_)
        | SentinelError::Internal(_) => "internal",
    }
}
