//! Signed usage vouchers.
//!
//! A client authorizes settlement of its cumulative usage by signing an
//! EIP-712 `UsageVoucher` with the key behind its spender pubkey. The
//! voucher travels to the gateway as base64-encoded JSON in the `arkauth`
//! query parameter.

use alloy::primitives::{Signature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::{Eip712Domain, SolStruct};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::amount::{amount_string, Amount};
use crate::claim::Claim;
use crate::keys::{Chain, ContractKey, PubKey};
use crate::MercuryError;

/// Query parameter carrying the encoded voucher.
pub const QUERY_ARK_AUTH: &str = "arkauth";

/// EIP-712 domain name for voucher signatures.
pub const VOUCHER_DOMAIN_NAME: &str = "mercury-sentinel";

/// EIP-712 domain version for voucher signatures.
pub const VOUCHER_DOMAIN_VERSION: &str = "1";

/// Upper bound on an encoded voucher, to keep decoding cheap.
const MAX_ENCODED_LEN: usize = 2_048;

/// Largest nonce a voucher may carry; claim storage keeps nonces as `i64`.
pub const MAX_NONCE: u64 = i64::MAX as u64;

alloy::sol! {
    #[derive(Debug)]
    struct UsageVoucher {
        address provider;
        string chain;
        address spender;
        uint64 nonce;
        uint256 amount;
    }
}

/// secp256k1 curve order N / 2; signatures with a larger s are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

pub fn voucher_domain() -> Eip712Domain {
    Eip712Domain {
        name: Some(std::borrow::Cow::Borrowed(VOUCHER_DOMAIN_NAME)),
        version: Some(std::borrow::Cow::Borrowed(VOUCHER_DOMAIN_VERSION)),
        chain_id: None,
        verifying_contract: None,
        salt: None,
    }
}

/// Wire form of a signed voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub provider: PubKey,
    pub chain: Chain,
    pub spender: PubKey,
    pub nonce: u64,
    /// Cumulative amount the spender authorizes for settlement.
    #[serde(with = "amount_string")]
    pub amount: Amount,
    /// 0x-prefixed 65-byte signature.
    pub signature: String,
}

impl Voucher {
    /// Build and sign a voucher; the spender is the signer's address.
    pub fn sign(
        signer: &PrivateKeySigner,
        provider: PubKey,
        chain: Chain,
        nonce: u64,
        amount: Amount,
    ) -> Result<Self, MercuryError> {
        let mut voucher = Self {
            provider,
            chain,
            spender: PubKey::new(signer.address()),
            nonce,
            amount,
            signature: String::new(),
        };
        let sig = signer
            .sign_hash_sync(&voucher.signing_hash())
            .map_err(|e| MercuryError::SignatureError(e.to_string()))?;
        voucher.signature = format!("0x{}", alloy::hex::encode(sig.as_bytes()));
        Ok(voucher)
    }

    pub fn key(&self) -> ContractKey {
        ContractKey::new(self.provider, self.chain.clone(), self.spender)
    }

    pub fn signing_hash(&self) -> B256 {
        let typed = UsageVoucher {
            provider: self.provider.address(),
            chain: self.chain.to_string(),
            spender: self.spender.address(),
            nonce: self.nonce,
            amount: U256::from(self.amount),
        };
        typed.eip712_signing_hash(&voucher_domain())
    }

    /// Check that the signature was produced by the spender's key.
    /// Rejects high-s signatures.
    pub fn verify(&self) -> Result<(), MercuryError> {
        let hex = self.signature.strip_prefix("0x").unwrap_or(&self.signature);
        let bytes = alloy::hex::decode(hex)
            .map_err(|e| MercuryError::SignatureError(format!("invalid hex: {e}")))?;
        if bytes.len() != 65 {
            return Err(MercuryError::SignatureError(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }

        let sig = Signature::from_raw(&bytes)
            .map_err(|e| MercuryError::SignatureError(format!("invalid signature: {e}")))?;
        if sig.s() > SECP256K1_N_DIV_2 {
            return Err(MercuryError::SignatureError(
                "high-s signature rejected".to_string(),
            ));
        }

        let recovered = sig
            .recover_address_from_prehash(&self.signing_hash())
            .map_err(|e| MercuryError::SignatureError(format!("recovery failed: {e}")))?;
        if recovered != self.spender.address() {
            return Err(MercuryError::SignatureError(format!(
                "signed by {recovered:#x}, not spender {}",
                self.spender
            )));
        }
        Ok(())
    }

    /// Encode for the `arkauth` query parameter (URL-safe base64 of JSON).
    pub fn encode(&self) -> Result<String, MercuryError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode an `arkauth` value. Accepts standard and URL-safe base64,
    /// padded or not.
    pub fn decode(raw: &str) -> Result<Self, MercuryError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MercuryError::InvalidVoucher("empty voucher".to_string()));
        }
        if raw.len() > MAX_ENCODED_LEN {
            return Err(MercuryError::InvalidVoucher("voucher too long".to_string()));
        }

        use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
        let unpadded = raw.trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(unpadded)
            .or_else(|_| STANDARD.decode(raw))
            .map_err(|e| MercuryError::InvalidVoucher(format!("invalid base64: {e}")))?;

        let voucher: Self = serde_json::from_slice(&bytes)
            .map_err(|e| MercuryError::InvalidVoucher(format!("invalid voucher json: {e}")))?;
        if voucher.nonce > MAX_NONCE {
            return Err(MercuryError::InvalidVoucher(format!(
                "nonce {} out of range",
                voucher.nonce
            )));
        }
        Ok(voucher)
    }

    /// The unsettled claim this voucher establishes.
    pub fn into_claim(self) -> Claim {
        Claim {
            provider: self.provider,
            chain: self.chain,
            spender: self.spender,
            nonce: self.nonce,
            amount: self.amount,
            signature: self.signature,
            claimed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> PubKey {
        "0x1111111111111111111111111111111111111111".parse().unwrap()
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let signer = PrivateKeySigner::random();
        let voucher = Voucher::sign(&signer, provider(), "eth".parse().unwrap(), 3, 150).unwrap();

        assert_eq!(voucher.spender.address(), signer.address());
        voucher.verify().unwrap();

        let decoded = Voucher::decode(&voucher.encode().unwrap()).unwrap();
        assert_eq!(decoded, voucher);
        decoded.verify().unwrap();
    }

    #[test]
    fn test_tampered_voucher_fails_verification() {
        let signer = PrivateKeySigner::random();
        let mut voucher =
            Voucher::sign(&signer, provider(), "eth".parse().unwrap(), 3, 150).unwrap();
        voucher.amount = 1;
        assert!(matches!(voucher.verify(), Err(MercuryError::SignatureError(_))));
    }

    #[test]
    fn test_voucher_for_other_spender_fails() {
        let signer = PrivateKeySigner::random();
        let mut voucher =
            Voucher::sign(&signer, provider(), "eth".parse().unwrap(), 1, 10).unwrap();
        voucher.spender = PubKey::new(PrivateKeySigner::random().address());
        assert!(voucher.verify().is_err());
    }

    #[test]
    fn test_short_signature_rejected() {
        let signer = PrivateKeySigner::random();
        let mut voucher =
            Voucher::sign(&signer, provider(), "eth".parse().unwrap(), 1, 10).unwrap();
        voucher.signature = "0xdeadbeef".to_string();
        let err = voucher.verify().unwrap_err();
        assert!(err.to_string().contains("65 bytes"));
    }

    #[test]
    fn test_decode_accepts_standard_base64() {
        let signer = PrivateKeySigner::random();
        let voucher = Voucher::sign(&signer, provider(), "eth".parse().unwrap(), 9, 90).unwrap();
        let json = serde_json::to_vec(&voucher).unwrap();
        let standard = base64::engine::general_purpose::STANDARD.encode(json);
        assert_eq!(Voucher::decode(&standard).unwrap(), voucher);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Voucher::decode("").is_err());
        assert!(Voucher::decode("!!!not-base64!!!").is_err());
        let not_json = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"hello");
        assert!(Voucher::decode(&not_json).is_err());
    }

    #[test]
    fn test_decode_rejects_nonce_beyond_storage_range() {
        let signer = PrivateKeySigner::random();
        let chain: Chain = "eth".parse().unwrap();

        let edge = Voucher::sign(&signer, provider(), chain.clone(), MAX_NONCE, 1).unwrap();
        assert_eq!(Voucher::decode(&edge.encode().unwrap()).unwrap().nonce, MAX_NONCE);

        let beyond = Voucher::sign(&signer, provider(), chain, MAX_NONCE + 1, 1).unwrap();
        let err = Voucher::decode(&beyond.encode().unwrap()).unwrap_err();
        assert!(matches!(err, MercuryError::InvalidVoucher(_)));
    }
}
