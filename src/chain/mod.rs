//! Chain collaborator
//!
//! Narrow view of the node: head height, a fresh nonce, the elementary
//! transfers of one block, and broadcast of signed bytes.

pub mod mock;
pub mod rpc;

pub use mock::MockChain;
pub use rpc::RpcChainClient;

use async_trait::async_trait;

use crate::core_types::{Amount, BlockWatermark, Height};
use crate::error::ChainError;

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_height(&self) -> Result<Height, ChainError>;

    /// Opaque token the signer embeds to make a transaction unique
    async fn current_nonce(&self) -> Result<String, ChainError>;

    /// Block header plus its transfers. May be empty.
    async fn block_transfers(&self, height: Height) -> Result<ScannedBlock, ChainError>;

    /// Submit signed bytes, returning the transaction hash
    async fn broadcast(&self, signed_tx: &str) -> Result<String, ChainError>;
}

/// One value movement inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransfer {
    pub tx_hash: String,
    /// Position among the transfers of `tx_hash`
    pub index: u32,
    pub source: String,
    pub destination: String,
    pub token: String,
    pub amount: Amount,
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedBlock {
    pub height: Height,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    pub transfers: Vec<ChainTransfer>,
}

impl ScannedBlock {
    pub fn empty(height: Height) -> Self {
        Self {
            height,
            hash: String::new(),
            parent_hash: String::new(),
            timestamp: 0,
            transfers: Vec::new(),
        }
    }

    pub fn watermark(&self) -> BlockWatermark {
        BlockWatermark {
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
            height: self.height,
            timestamp: self.timestamp,
        }
    }
}
