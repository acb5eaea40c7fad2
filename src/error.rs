use thiserror::Error;

use crate::core_types::{AddressRole, TxStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Status regression on entry {entry}: {from} -> {to}")]
    StatusRegression {
        entry: String,
        from: TxStatus,
        to: TxStatus,
    },

    #[error("No {0} address provisioned")]
    MissingRole(AddressRole),

    #[error("Amount does not fit storage type: {0}")]
    AmountOverflow(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Injected by the in-memory store to simulate lock contention
    #[error("Transient storage failure: {0}")]
    Transient(String),
}

impl StoreError {
    /// Whether running the same batch again can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Database(_)
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signer request failed: {0}")]
    Http(String),

    #[error("Invalid signer response: {0}")]
    InvalidResponse(String),
}

/// Umbrella error for a loop cycle. Anything reaching the supervisor is fatal.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Batch persistence failed after {attempts} attempts: {source}")]
    PersistExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("{} worker(s) failed: {}", .0.len(), .0.join("; "))]
    WorkersFailed(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
