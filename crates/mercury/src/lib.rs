//! Core types for the mercury pay-per-use service network.
//!
//! Clients fund on-ledger [`Contract`]s with a provider, then pay for each
//! request by presenting a signed [`Voucher`] to the provider's gateway.
//! The gateway keeps the freshest voucher per contract as a [`Claim`];
//! settlement later converts accrued contract debt into transfers.
//!
//! # Pieces
//!
//! - [`keys`]: [`PubKey`], [`Chain`] and the composite [`ContractKey`]
//! - [`contract`] / [`claim`]: entities and their height-relative predicates
//! - [`voucher`]: EIP-712 voucher signing, verification and wire encoding
//! - [`settlement`]: [`SettlementEngine`] and the [`Ledger`] capability trait
//! - [`ledger`]: [`MemoryLedger`], an in-process ledger for simulation
//!
//! # Quick example (settlement)
//!
//! ```
//! use mercury::{Account, Contract, ContractType, MemoryLedger, SettlementEngine, DENOM};
//!
//! let mut contract = Contract::new(
//!     "0x1111111111111111111111111111111111111111".parse().unwrap(),
//!     "eth-mainnet".parse().unwrap(),
//!     "0x2222222222222222222222222222222222222222".parse().unwrap(),
//!     ContractType::PayAsYouGo,
//! );
//! contract.deposit = 100;
//! contract.rate = 5;
//! contract.height = 1;
//! contract.duration = 100;
//! contract.queries = 4;
//!
//! let mut ledger = MemoryLedger::new(10);
//! ledger.fund(Account::Escrow, DENOM, 100);
//!
//! let engine = SettlementEngine::default();
//! let settled = ledger
//!     .atomically(|l| engine.settle(l, contract, false))
//!     .unwrap();
//! assert_eq!(settled.paid, 20);
//! ```

pub mod amount;
pub mod claim;
pub mod configs;
pub mod contract;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod settlement;
pub mod voucher;

pub use amount::{safe_share, Amount};
pub use claim::Claim;
pub use configs::{ConfigName, ConfigValues, DENOM, MAX_BASIS_POINTS};
pub use contract::{Contract, ContractType, Provider};
pub use error::MercuryError;
pub use keys::{Chain, ContractKey, PubKey};
pub use ledger::{EmittedEvent, MemoryLedger};
pub use settlement::{
    Account, Ledger, SettlementEngine, SettlementEvent, EVENT_TYPE_CONTRACT_SETTLEMENT,
};
pub use voucher::{Voucher, MAX_NONCE, QUERY_ARK_AUTH};
