//! Settlement engine: turns accrued contract debt into transfers.
//!
//! Runs inside the ledger's serialized state-transition pipeline. Transfers,
//! persistence and event emission go through the [`Ledger`] capability
//! trait; when [`SettlementEngine::settle`] returns an error the enclosing
//! transaction must be discarded by the ledger (see
//! [`crate::ledger::MemoryLedger::atomically`]).

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::amount::{safe_share, Amount};
use crate::configs::{ConfigName, ConfigValues, DENOM, MAX_BASIS_POINTS};
use crate::contract::Contract;
use crate::MercuryError;

/// Event type emitted after every successful settlement.
pub const EVENT_TYPE_CONTRACT_SETTLEMENT: &str = "contract_settlement";

/// A balance holder on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Account {
    /// Pool holding all contract deposits.
    Escrow,
    /// Protocol reserve pool.
    Reserve,
    /// An externally owned account.
    User(Address),
}

/// Capabilities the settlement engine needs from the ledger.
pub trait Ledger {
    /// Height of the block being executed.
    fn block_height(&self) -> i64;

    /// Move `amount` of `denom` between accounts.
    /// Fails with [`MercuryError::InsufficientFunds`] when `from` cannot cover it.
    fn transfer(
        &mut self,
        from: Account,
        to: Account,
        denom: &str,
        amount: Amount,
    ) -> Result<(), MercuryError>;

    /// Persist a contract, replacing any stored value with the same key.
    fn set_contract(&mut self, contract: &Contract) -> Result<(), MercuryError>;

    fn emit_event(&mut self, event_type: &str, attributes: Vec<(String, String)>);
}

/// Amounts moved by one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub provider: String,
    pub chain: String,
    pub client: String,
    /// Provider share of the settled debt.
    pub paid: Amount,
    pub reserve_income: Amount,
}

impl SettlementEvent {
    pub fn attributes(&self) -> Vec<(String, String)> {
        vec![
            ("pubkey".to_string(), self.provider.clone()),
            ("chain".to_string(), self.chain.clone()),
            ("client".to_string(), self.client.clone()),
            ("paid".to_string(), self.paid.to_string()),
            ("reserve_income".to_string(), self.reserve_income.to_string()),
        ]
    }
}

/// Computes debt and splits it between provider and reserve.
#[derive(Debug, Clone, Default)]
pub struct SettlementEngine {
    config: ConfigValues,
}

impl SettlementEngine {
    pub fn new(config: ConfigValues) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfigValues {
        &self.config
    }

    /// Unpaid debt of `contract` at `height`, never negative.
    pub fn compute_debt(&self, contract: &Contract, height: i64) -> Result<Amount, MercuryError> {
        contract.debt(height)
    }

    /// Split `total_debt` into `(provider_share, reserve_share)`.
    /// The two always sum to `total_debt`.
    pub fn split(&self, total_debt: Amount) -> (Amount, Amount) {
        let reserve = safe_share(
            self.config.get_u64(ConfigName::ReserveTax),
            MAX_BASIS_POINTS,
            total_debt,
        );
        (total_debt - reserve, reserve)
    }

    /// Pay out the debt `contract` owes at the ledger's current height and,
    /// when `close` is set, refund the unspent deposit and close it.
    ///
    /// Debt is capped at the unpaid deposit so `paid <= deposit` holds.
    /// A contract that is already closed is rejected, which makes replays of
    /// a close a no-op failure rather than a second refund.
    pub fn settle<L: Ledger + ?Sized>(
        &self,
        ledger: &mut L,
        mut contract: Contract,
        close: bool,
    ) -> Result<Contract, MercuryError> {
        if contract.closed_height != 0 {
            return Err(MercuryError::ContractAlreadyClosed(contract.closed_height));
        }

        let height = ledger.block_height();
        let total_debt = self
            .compute_debt(&contract, height)?
            .min(contract.remaining());
        let (provider_share, reserve_share) = self.split(total_debt);

        if total_debt != 0 {
            let provider = Account::User(contract.provider.address());
            if provider_share != 0 {
                ledger.transfer(Account::Escrow, provider, DENOM, provider_share)?;
            }
            if reserve_share != 0 {
                ledger.transfer(Account::Escrow, Account::Reserve, DENOM, reserve_share)?;
            }
        }

        contract.paid = contract
            .paid
            .checked_add(total_debt)
            .ok_or(MercuryError::AmountOverflow("contract paid"))?;

        if close {
            let remainder = contract.remaining();
            if remainder != 0 {
                let client = Account::User(contract.client.address());
                ledger.transfer(Account::Escrow, client, DENOM, remainder)?;
            }
            // the deposit is fully disbursed once the refund has gone out
            contract.paid = contract.deposit;
            contract.closed_height = height;
        }

        ledger.set_contract(&contract)?;

        let event = SettlementEvent {
            provider: contract.provider.to_string(),
            chain: contract.chain.to_string(),
            client: contract.client.to_string(),
            paid: provider_share,
            reserve_income: reserve_share,
        };
        ledger.emit_event(EVENT_TYPE_CONTRACT_SETTLEMENT, event.attributes());

        tracing::debug!(
            contract = %contract.key(),
            height,
            total_debt,
            provider_share,
            reserve_share,
            close,
            "settled contract"
        );

        Ok(contract)
    }
}
