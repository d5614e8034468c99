use thiserror::Error;

/// Errors returned by mercury entity, voucher and settlement operations.
#[derive(Debug, Error)]
pub enum MercuryError {
    #[error("invalid pubkey: {0}")]
    InvalidPubKey(String),

    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("invalid contract type: {0}")]
    InvalidContractType(i32),

    #[error("invalid voucher: {0}")]
    InvalidVoucher(String),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("contract already closed at height {0}")]
    ContractAlreadyClosed(i64),

    #[error("amount overflow: {0}")]
    AmountOverflow(&'static str),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
