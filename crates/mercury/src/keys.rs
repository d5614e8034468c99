//! Identity types shared by contracts, claims and providers.
//!
//! Composite keys are structured values; the `provider/chain/client` string
//! produced by [`ContractKey`]'s `Display` is an output encoding only.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::MercuryError;

/// Maximum length of a chain/service identifier.
pub const MAX_CHAIN_LEN: usize = 64;

/// Public identity of a provider or client, expressed as its 20-byte
/// secp256k1 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubKey(Address);

impl PubKey {
    pub const fn new(address: Address) -> Self {
        Self(address)
    }

    /// The on-ledger account that receives funds for this identity.
    pub fn address(&self) -> Address {
        self.0
    }
}

impl From<Address> for PubKey {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for PubKey {
    type Err = MercuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !trimmed.starts_with("0x") || trimmed.len() != 42 {
            return Err(MercuryError::InvalidPubKey(format!(
                "expected 0x-prefixed 20-byte hex, got {trimmed:?}"
            )));
        }
        trimmed
            .parse::<Address>()
            .map(Self)
            .map_err(|e| MercuryError::InvalidPubKey(format!("{trimmed}: {e}")))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a backend chain or service (e.g. `btc-mainnet-fullnode`).
///
/// Lowercase ASCII letters, digits and `-`, starting with a letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chain(String);

impl Chain {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Chain {
    type Err = MercuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chain = s.trim().to_ascii_lowercase();
        if chain.is_empty() {
            return Err(MercuryError::InvalidChain("chain must not be empty".to_string()));
        }
        if chain.len() > MAX_CHAIN_LEN {
            return Err(MercuryError::InvalidChain(format!(
                "chain longer than {MAX_CHAIN_LEN} characters"
            )));
        }
        if !chain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || chain.starts_with('-')
        {
            return Err(MercuryError::InvalidChain(chain));
        }
        Ok(Self(chain))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Chain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of a contract and of the claims backed by it.
///
/// Ordering compares `provider`, then `chain`, then `client`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractKey {
    pub provider: PubKey,
    pub chain: Chain,
    pub client: PubKey,
}

impl ContractKey {
    pub fn new(provider: PubKey, chain: Chain, client: PubKey) -> Self {
        Self {
            provider,
            chain,
            client,
        }
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.chain, self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "0x1234567890123456789012345678901234567890";

    #[test]
    fn test_pubkey_parse_and_display() {
        let pk: PubKey = PK.parse().unwrap();
        assert_eq!(pk.to_string(), PK);

        let upper: PubKey = "0xABCDEF1234567890ABCDEF1234567890ABCDEF12".parse().unwrap();
        assert_eq!(upper.to_string(), "0xabcdef1234567890abcdef1234567890abcdef12");
    }

    #[test]
    fn test_pubkey_rejects_malformed() {
        assert!("1234567890123456789012345678901234567890".parse::<PubKey>().is_err());
        assert!("0x1234".parse::<PubKey>().is_err());
        assert!("0xzz34567890123456789012345678901234567890".parse::<PubKey>().is_err());
        assert!("".parse::<PubKey>().is_err());
    }

    #[test]
    fn test_chain_validation() {
        assert_eq!("BTC-Mainnet-Fullnode".parse::<Chain>().unwrap().as_str(), "btc-mainnet-fullnode");
        assert!("".parse::<Chain>().is_err());
        assert!("-btc".parse::<Chain>().is_err());
        assert!("btc/mainnet".parse::<Chain>().is_err());
        assert!("a".repeat(MAX_CHAIN_LEN + 1).parse::<Chain>().is_err());
    }

    #[test]
    fn test_contract_key_display_and_order() {
        let a: PubKey = PK.parse().unwrap();
        let b: PubKey = "0x2234567890123456789012345678901234567890".parse().unwrap();
        let chain: Chain = "eth".parse().unwrap();

        let k1 = ContractKey::new(a, chain.clone(), b);
        let k2 = ContractKey::new(b, chain.clone(), a);
        assert_eq!(k1.to_string(), format!("{a}/eth/{b}"));
        assert!(k1 < k2);
    }

    #[test]
    fn test_key_json_uses_string_forms() {
        let key = ContractKey::new(PK.parse().unwrap(), "eth".parse().unwrap(), PK.parse().unwrap());
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["provider"], PK);
        assert_eq!(json["chain"], "eth");
    }
}
