use serde::{Deserialize, Serialize};

use crate::amount::{amount_string, Amount};
use crate::keys::{Chain, ContractKey, PubKey};
use crate::MercuryError;

/// A service operator bonded for one backend chain/service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub pubkey: PubKey,
    pub chain: Chain,
    #[serde(with = "amount_string")]
    pub bond: Amount,
}

/// How a contract accrues debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    /// Debt grows with every block the contract is open: `rate` per block.
    Subscription,
    /// Debt grows with every query served: `rate` per query.
    PayAsYouGo,
}

impl TryFrom<i32> for ContractType {
    type Error = MercuryError;

    /// Decode the wire discriminant stored in ledger state.
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Subscription),
            1 => Ok(Self::PayAsYouGo),
            other => Err(MercuryError::InvalidContractType(other)),
        }
    }
}

impl From<ContractType> for i32 {
    fn from(value: ContractType) -> Self {
        match value {
            ContractType::Subscription => 0,
            ContractType::PayAsYouGo => 1,
        }
    }
}

/// A funded agreement between one client and one provider for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub provider: PubKey,
    pub chain: Chain,
    pub client: PubKey,
    #[serde(rename = "type")]
    pub contract_type: ContractType,
    #[serde(with = "amount_string")]
    pub deposit: Amount,
    #[serde(with = "amount_string")]
    pub paid: Amount,
    #[serde(with = "amount_string")]
    pub rate: Amount,
    /// Height the contract was opened at; 0 marks an empty contract.
    pub height: i64,
    pub duration: i64,
    #[serde(default)]
    pub queries: u64,
    #[serde(default)]
    pub closed_height: i64,
}

impl Contract {
    /// An empty, unfunded contract for the given identity.
    pub fn new(provider: PubKey, chain: Chain, client: PubKey, contract_type: ContractType) -> Self {
        Self {
            provider,
            chain,
            client,
            contract_type,
            deposit: 0,
            paid: 0,
            rate: 0,
            height: 0,
            duration: 0,
            queries: 0,
            closed_height: 0,
        }
    }

    pub fn key(&self) -> ContractKey {
        ContractKey::new(self.provider, self.chain.clone(), self.client)
    }

    pub fn expiration(&self) -> i64 {
        self.height.saturating_add(self.duration)
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    /// Open iff non-empty and `height` has not passed the expiration height.
    pub fn is_open(&self, height: i64) -> bool {
        !self.is_empty() && height <= self.expiration()
    }

    pub fn is_closed(&self, height: i64) -> bool {
        !self.is_open(height)
    }

    /// Deposit not yet paid out.
    pub fn remaining(&self) -> Amount {
        self.deposit.saturating_sub(self.paid)
    }

    /// Debt accrued and unpaid at `height`, never negative.
    pub fn debt(&self, height: i64) -> Result<Amount, MercuryError> {
        let accrued = match self.contract_type {
            ContractType::Subscription => self.subscription_accrued(height)?,
            ContractType::PayAsYouGo => self.pay_as_you_go_accrued()?,
        };
        Ok(accrued.saturating_sub(self.paid))
    }

    fn subscription_accrued(&self, height: i64) -> Result<Amount, MercuryError> {
        let blocks = height.saturating_sub(self.height).max(0);
        self.rate
            .checked_mul(Amount::from(blocks.unsigned_abs()))
            .ok_or(MercuryError::AmountOverflow("subscription debt"))
    }

    fn pay_as_you_go_accrued(&self) -> Result<Amount, MercuryError> {
        self.rate
            .checked_mul(Amount::from(self.queries))
            .ok_or(MercuryError::AmountOverflow("pay-as-you-go debt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(contract_type: ContractType) -> Contract {
        Contract::new(
            "0x1111111111111111111111111111111111111111".parse().unwrap(),
            "eth-mainnet".parse().unwrap(),
            "0x2222222222222222222222222222222222222222".parse().unwrap(),
            contract_type,
        )
    }

    #[test]
    fn test_open_closed_over_heights() {
        let mut c = contract(ContractType::Subscription);
        c.height = 10;
        c.duration = 5;

        for h in 0..40 {
            let expected = h <= 15;
            assert_eq!(c.is_open(h), expected, "height {h}");
            assert_eq!(c.is_closed(h), !expected, "height {h}");
        }
        assert!(c.is_closed(20));
    }

    #[test]
    fn test_empty_contract_is_never_open() {
        let mut c = contract(ContractType::PayAsYouGo);
        c.duration = 1_000;
        assert!(c.is_empty());
        assert!(!c.is_open(0));
        assert!(!c.is_open(500));
    }

    #[test]
    fn test_subscription_debt() {
        let mut c = contract(ContractType::Subscription);
        c.rate = 10;
        c.height = 100;
        c.duration = 50;
        assert_eq!(c.debt(120).unwrap(), 200);

        c.paid = 150;
        assert_eq!(c.debt(120).unwrap(), 50);

        // heights before the open height accrue nothing
        assert_eq!(c.debt(90).unwrap(), 0);
    }

    #[test]
    fn test_pay_as_you_go_debt() {
        let mut c = contract(ContractType::PayAsYouGo);
        c.rate = 5;
        c.queries = 12;
        c.paid = 50;
        assert_eq!(c.debt(0).unwrap(), 10);
    }

    #[test]
    fn test_debt_never_negative() {
        let mut c = contract(ContractType::PayAsYouGo);
        for rate in [0u128, 1, 7, 1_000] {
            for queries in [0u64, 1, 3, 50] {
                for paid in [0u128, 1, 100, 1_000_000] {
                    c.rate = rate;
                    c.queries = queries;
                    c.paid = paid;
                    let debt = c.debt(0).unwrap();
                    assert_eq!(debt, (rate * queries as u128).saturating_sub(paid));
                }
            }
        }
    }

    #[test]
    fn test_debt_overflow_is_an_error() {
        let mut c = contract(ContractType::PayAsYouGo);
        c.rate = Amount::MAX;
        c.queries = 2;
        assert!(matches!(c.debt(0), Err(MercuryError::AmountOverflow(_))));
    }

    #[test]
    fn test_contract_type_wire_decoding() {
        assert_eq!(ContractType::try_from(0).unwrap(), ContractType::Subscription);
        assert_eq!(ContractType::try_from(1).unwrap(), ContractType::PayAsYouGo);
        assert!(matches!(
            ContractType::try_from(7),
            Err(MercuryError::InvalidContractType(7))
        ));
        assert_eq!(i32::from(ContractType::PayAsYouGo), 1);
    }

    #[test]
    fn test_contract_json_shape() {
        let mut c = contract(ContractType::PayAsYouGo);
        c.deposit = 1_000;
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "pay_as_you_go");
        assert_eq!(json["deposit"], "1000");

        let back: Contract = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);

        let unknown = serde_json::json!({
            "provider": "0x1111111111111111111111111111111111111111",
            "chain": "eth",
            "client": "0x2222222222222222222222222222222222222222",
            "type": "barter",
            "deposit": "1", "paid": "0", "rate": "1", "height": 1, "duration": 1
        });
        assert!(serde_json::from_value::<Contract>(unknown).is_err());
    }

    #[test]
    fn test_provider_bond_is_a_decimal_string() {
        let json = serde_json::json!({
            "pubkey": "0x1111111111111111111111111111111111111111",
            "chain": "eth-mainnet",
            "bond": "340282366920938463463374607431768211455"
        });
        let provider: Provider = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(provider.bond, Amount::MAX);
        assert_eq!(provider.chain.as_str(), "eth-mainnet");
        assert_eq!(serde_json::to_value(&provider).unwrap(), json);
    }
}
