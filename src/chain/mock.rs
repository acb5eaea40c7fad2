//! Scripted chain for tests and local runs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::{ChainClient, ChainTransfer, ScannedBlock};
use crate::core_types::Height;
use crate::error::ChainError;

/// Heights without a scripted block are served as empty blocks with
/// deterministic hashes (`hash-<h>`, parent `hash-<h-1>`).
#[derive(Debug, Default)]
pub struct MockChain {
    head: AtomicU64,
    blocks: Mutex<HashMap<Height, ScannedBlock>>,
    failing_heights: Mutex<HashSet<Height>>,
    broadcasts: Mutex<Vec<String>>,
    fail_broadcasts: AtomicU32,
    fail_head: Mutex<bool>,
    nonce: AtomicU64,
}

impl MockChain {
    pub fn new(head: Height) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    pub fn set_head(&self, head: Height) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Append a transfer to the block at `height`
    pub fn push_transfer(&self, height: Height, transfer: ChainTransfer) {
        let mut blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        blocks
            .entry(height)
            .or_insert_with(|| Self::synthetic_block(height))
            .transfers
            .push(transfer);
    }

    pub fn fail_height(&self, height: Height) {
        self.failing_heights
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(height);
    }

    pub fn heal_height(&self, height: Height) {
        self.failing_heights
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&height);
    }

    pub fn fail_next_broadcasts(&self, n: u32) {
        self.fail_broadcasts.store(n, Ordering::SeqCst);
    }

    pub fn set_head_unavailable(&self, unavailable: bool) {
        *self.fail_head.lock().unwrap_or_else(|e| e.into_inner()) = unavailable;
    }

    /// Signed payloads accepted so far
    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Hash `broadcast` returns for the n-th accepted payload (1-based)
    pub fn tx_hash_for(n: usize) -> String {
        format!("tx-{}", n)
    }

    fn synthetic_block(height: Height) -> ScannedBlock {
        ScannedBlock {
            height,
            hash: format!("hash-{}", height),
            parent_hash: format!("hash-{}", height.saturating_sub(1)),
            timestamp: height as i64,
            transfers: Vec::new(),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_height(&self) -> Result<Height, ChainError> {
        if *self.fail_head.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(ChainError::RpcConnection("mock head unavailable".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn current_nonce(&self) -> Result<String, ChainError> {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("nonce-{}", n))
    }

    async fn block_transfers(&self, height: Height) -> Result<ScannedBlock, ChainError> {
        if self
            .failing_heights
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&height)
        {
            return Err(ChainError::RpcConnection(format!(
                "mock failure at height {}",
                height
            )));
        }
        if height > self.head.load(Ordering::SeqCst) {
            return Err(ChainError::BlockNotFound(height));
        }

        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(blocks
            .get(&height)
            .cloned()
            .unwrap_or_else(|| Self::synthetic_block(height)))
    }

    async fn broadcast(&self, signed_tx: &str) -> Result<String, ChainError> {
        if self
            .fail_broadcasts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChainError::RpcConnection("mock broadcast rejected".into()));
        }

        let mut broadcasts = self.broadcasts.lock().unwrap_or_else(|e| e.into_inner());
        broadcasts.push(signed_tx.to_string());
        Ok(Self::tx_hash_for(broadcasts.len()))
    }
}
