use serde::{Deserialize, Serialize};

use crate::amount::{amount_string, Amount};
use crate::keys::{Chain, ContractKey, PubKey};

/// The authoritative (highest-nonce) usage voucher for one
/// `(provider, chain, spender)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub provider: PubKey,
    pub chain: Chain,
    pub spender: PubKey,
    pub nonce: u64,
    #[serde(with = "amount_string")]
    pub amount: Amount,
    pub signature: String,
    /// Set once a settlement transaction has consumed the claim.
    #[serde(default)]
    pub claimed: bool,
}

impl Claim {
    /// Identity of the claim, shared with its backing contract.
    pub fn key(&self) -> ContractKey {
        ContractKey::new(self.provider, self.chain.clone(), self.spender)
    }

    /// Whether `self` may replace `stored` as the authoritative claim.
    pub fn supersedes(&self, stored: &Claim) -> bool {
        self.nonce >= stored.nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(nonce: u64) -> Claim {
        Claim {
            provider: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            chain: "eth".parse().unwrap(),
            spender: "0x2222222222222222222222222222222222222222".parse().unwrap(),
            nonce,
            amount: 10,
            signature: "0x".to_string(),
            claimed: false,
        }
    }

    #[test]
    fn test_supersedes_is_nonce_gated() {
        assert!(claim(5).supersedes(&claim(4)));
        assert!(claim(5).supersedes(&claim(5)));
        assert!(!claim(4).supersedes(&claim(5)));
    }

    #[test]
    fn test_claim_key_matches_contract_identity() {
        let c = claim(1);
        let key = c.key();
        assert_eq!(key.provider, c.provider);
        assert_eq!(key.client, c.spender);
        assert_eq!(key.chain.as_str(), "eth");
    }
}
