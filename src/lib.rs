//! Custody Wallet - custodial wallet backend
//!
//! Watches the chain for transfers touching custodial addresses, keeps a
//! per-address ledger consistent with on-chain reality, sweeps funds up the
//! custody tiers and dispatches withdrawals.
//!
//! # Modules
//!
//! - [`core_types`] - Addresses, balances, ledger entries, statuses
//! - [`store`] - Ledger Store contract, atomic batches, memory and PostgreSQL backends
//! - [`chain`] - Chain collaborator (JSON-RPC client and scripted mock)
//! - [`signer`] - Signing service collaborator (HTTP client and scripted mock)
//! - [`scanner`] - Chain Scanner: blocks to ledger state
//! - [`lifecycle`] - Collection (user -> hot) and cold sweep (hot -> cold)
//! - [`withdraw`] - Withdrawal Dispatcher
//! - [`retry`] - Retry Executor for batch persistence
//! - [`supervisor`] - Worker Supervisor and periodic loop driver
//! - [`service`] - Wires everything into one running service

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod error;
pub mod logging;

pub mod chain;
pub mod signer;
pub mod store;

pub mod lifecycle;
pub mod retry;
pub mod scanner;
pub mod service;
pub mod supervisor;
pub mod withdraw;

#[cfg(test)]
mod fixtures;

// Convenient re-exports at crate root
pub use core_types::{
    Address, AddressRole, Amount, Balance, BlockWatermark, Height, LedgerEntry, TxStatus, TxType,
    WithdrawRequest, WithdrawStatus,
};
pub use error::{ChainError, SignerError, StoreError, WalletError};
pub use service::WalletService;
pub use store::{LedgerBatch, LedgerStore, MemoryLedgerStore, PgLedgerStore};
