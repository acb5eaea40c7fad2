//! Chain Scanner
//!
//! Each cycle folds the next range of blocks into the ledger:
//! 1. read the watermark and the chain head
//! 2. fetch blocks `(watermark, min(watermark + step, head)]`, keeping the
//!    contiguous prefix that fetched cleanly
//! 3. classify every transfer against the address book
//! 4. stage deposits, outbound settlements, block rows and confirmations
//! 5. commit everything as one batch
//!
//! Replaying a range is harmless: transfer identities are unique in the
//! store and balances move only on fresh inserts.

pub mod classify;
pub mod confirmation;

pub use classify::{TransferKind, classify};

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{ChainClient, ChainTransfer, ScannedBlock};
use crate::config::ChainConfig;
use crate::core_types::{Address, Height, LedgerEntry, TxType};
use crate::error::{StoreError, WalletError};
use crate::retry::RetryPolicy;
use crate::store::{LedgerBatch, LedgerStore, OutboundSettlement};

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Inclusive range folded into the ledger, `None` for an idle cycle
    pub range: Option<(Height, Height)>,
    pub deposits: usize,
    pub settlements: usize,
    pub confirmed: usize,
}

pub struct DepositScanner {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    config: ChainConfig,
    retry: RetryPolicy,
}

/// Address book lookups memoised for one cycle
struct AddressMemo<'a> {
    store: &'a dyn LedgerStore,
    seen: HashMap<String, Option<Address>>,
}

impl<'a> AddressMemo<'a> {
    fn new(store: &'a dyn LedgerStore) -> Self {
        Self {
            store,
            seen: HashMap::new(),
        }
    }

    async fn resolve(&mut self, address: &str) -> Result<Option<Address>, StoreError> {
        if let Some(hit) = self.seen.get(address) {
            return Ok(hit.clone());
        }
        let found = self.store.find_address(address).await?;
        self.seen.insert(address.to_string(), found.clone());
        Ok(found)
    }
}

impl DepositScanner {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        config: ChainConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            chain,
            config,
            retry,
        }
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<ScanReport, WalletError> {
        let watermark = self.store.latest_watermark().await?;
        let head = self.chain.current_height().await?;

        let next = watermark
            .as_ref()
            .map(|w| w.height + 1)
            .unwrap_or(self.config.starting_height);
        if next > head {
            debug!(next, head, "Scanner caught up with chain head");
            return Ok(ScanReport::default());
        }
        let target = next
            .saturating_add(self.config.blocks_step.saturating_sub(1))
            .min(head);

        let blocks = self.fetch_range(next, target).await;
        let Some(last) = blocks.last() else {
            return Ok(ScanReport::default());
        };
        let scanned_to = last.height;

        let mut expected_parent = watermark.map(|w| w.hash).unwrap_or_default();
        for block in &blocks {
            if !expected_parent.is_empty()
                && !block.parent_hash.is_empty()
                && block.parent_hash != expected_parent
            {
                warn!(
                    height = block.height,
                    parent_hash = %block.parent_hash,
                    expected = %expected_parent,
                    "Parent hash mismatch, possible re-org"
                );
            }
            if !block.hash.is_empty() {
                expected_parent = block.hash.clone();
            }
        }

        let confirmed_at = confirmation::confirmation_height(scanned_to, self.config.confirmations);
        let mut report = ScanReport {
            range: Some((next, scanned_to)),
            ..Default::default()
        };
        let mut batch = LedgerBatch::new();
        let mut memo = AddressMemo::new(self.store.as_ref());

        for block in &blocks {
            for transfer in &block.transfers {
                let source = memo.resolve(&transfer.source).await?;
                let destination = memo.resolve(&transfer.destination).await?;

                match classify(source.as_ref(), destination.as_ref()) {
                    TransferKind::Ignore => {}
                    TransferKind::Deposit => {
                        batch.record_deposit(deposit_entry(block, transfer, confirmed_at));
                        report.deposits += 1;
                        info!(
                            height = block.height,
                            tx_hash = %transfer.tx_hash,
                            to = %transfer.destination,
                            amount = %transfer.amount,
                            "Deposit detected"
                        );
                    }
                    TransferKind::Outbound {
                        tx_type,
                        credit_destination,
                    } => {
                        batch.settle_outbound(settlement(block, transfer, tx_type, credit_destination));
                        report.settlements += 1;
                        debug!(
                            height = block.height,
                            tx_hash = %transfer.tx_hash,
                            tx_type = %tx_type.as_str(),
                            "Outbound transfer confirmed on chain"
                        );
                    }
                }
            }
            batch.record_block(block.watermark());
        }

        report.confirmed =
            confirmation::stage_confirmations(self.store.as_ref(), confirmed_at, &mut batch)
                .await?;

        self.retry.commit(self.store.as_ref(), &batch, cancel).await?;

        info!(
            from = next,
            to = scanned_to,
            head,
            deposits = report.deposits,
            settlements = report.settlements,
            confirmed = report.confirmed,
            "Blocks scanned"
        );
        Ok(report)
    }

    /// Fetch heights in order, stopping at the first failure
    async fn fetch_range(&self, from: Height, to: Height) -> Vec<ScannedBlock> {
        let mut blocks = Vec::new();
        for height in from..=to {
            match self.chain.block_transfers(height).await {
                Ok(mut block) => {
                    block.height = height;
                    blocks.push(block);
                }
                Err(e) => {
                    warn!(height, error = %e, "Block fetch failed, retrying next cycle");
                    break;
                }
            }
        }
        blocks
    }
}

fn deposit_entry(
    block: &ScannedBlock,
    transfer: &ChainTransfer,
    confirmed_at: Option<Height>,
) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        block_hash: block.hash.clone(),
        block_number: Some(block.height),
        tx_hash: transfer.tx_hash.clone(),
        transfer_index: transfer.index,
        from_address: transfer.source.clone(),
        to_address: transfer.destination.clone(),
        token_address: transfer.token.clone(),
        fee: transfer.fee,
        amount: transfer.amount,
        status: confirmation::initial_status(block.height, confirmed_at),
        tx_type: TxType::Deposit,
        timestamp: block.timestamp,
    }
}

fn settlement(
    block: &ScannedBlock,
    transfer: &ChainTransfer,
    tx_type: TxType,
    credit_destination: bool,
) -> OutboundSettlement {
    OutboundSettlement {
        tx_hash: transfer.tx_hash.clone(),
        transfer_index: transfer.index,
        from_address: transfer.source.clone(),
        to_address: transfer.destination.clone(),
        token_address: transfer.token.clone(),
        amount: transfer.amount,
        fee: transfer.fee,
        block_hash: block.hash.clone(),
        block_number: block.height,
        timestamp: block.timestamp,
        tx_type,
        credit_destination,
    }
}
