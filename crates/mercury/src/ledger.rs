//! In-process [`Ledger`] used for simulation and tests.

use std::collections::BTreeMap;

use crate::amount::Amount;
use crate::contract::Contract;
use crate::keys::ContractKey;
use crate::settlement::{Account, Ledger};
use crate::MercuryError;

/// An event recorded by [`MemoryLedger::emit_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    pub event_type: String,
    pub attributes: Vec<(String, String)>,
}

impl EmittedEvent {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Balances, contracts and events held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    height: i64,
    balances: BTreeMap<(Account, String), Amount>,
    contracts: BTreeMap<ContractKey, Contract>,
    events: Vec<EmittedEvent>,
}

impl MemoryLedger {
    pub fn new(height: i64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    pub fn set_height(&mut self, height: i64) {
        self.height = height;
    }

    /// Mint `amount` into `account`.
    pub fn fund(&mut self, account: Account, denom: &str, amount: Amount) {
        *self
            .balances
            .entry((account, denom.to_string()))
            .or_insert(0) += amount;
    }

    pub fn balance(&self, account: Account, denom: &str) -> Amount {
        self.balances
            .get(&(account, denom.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn contract(&self, key: &ContractKey) -> Option<&Contract> {
        self.contracts.get(key)
    }

    pub fn events(&self) -> &[EmittedEvent] {
        &self.events
    }

    /// Run `f` as one transaction: every effect is discarded if it fails.
    pub fn atomically<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, MercuryError>,
    ) -> Result<T, MercuryError> {
        let snapshot = self.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(error = %e, height = self.height, "transaction rolled back");
                *self = snapshot;
                Err(e)
            }
        }
    }
}

impl Ledger for MemoryLedger {
    fn block_height(&self) -> i64 {
        self.height
    }

    fn transfer(
        &mut self,
        from: Account,
        to: Account,
        denom: &str,
        amount: Amount,
    ) -> Result<(), MercuryError> {
        let available = self.balance(from, denom);
        if available < amount {
            return Err(MercuryError::InsufficientFunds(format!(
                "{from:?} holds {available}{denom}, needs {amount}{denom}"
            )));
        }
        if from == to {
            return Ok(());
        }
        // Both balances are computed before either is written.
        let credited = self
            .balance(to, denom)
            .checked_add(amount)
            .ok_or(MercuryError::AmountOverflow("ledger balance"))?;
        self.balances
            .insert((from, denom.to_string()), available - amount);
        self.balances.insert((to, denom.to_string()), credited);
        Ok(())
    }

    fn set_contract(&mut self, contract: &Contract) -> Result<(), MercuryError> {
        self.contracts.insert(contract.key(), contract.clone());
        Ok(())
    }

    fn emit_event(&mut self, event_type: &str, attributes: Vec<(String, String)>) {
        self.events.push(EmittedEvent {
            event_type: event_type.to_string(),
            attributes,
        });
    }
}
