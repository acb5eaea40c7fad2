use uuid::Uuid;

use crate::core_types::{Amount, BlockWatermark, Height, LedgerEntry, TxStatus, TxType};

/// On-chain observation of a transfer leaving a custodial address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSettlement {
    pub tx_hash: String,
    pub transfer_index: u32,
    pub from_address: String,
    pub to_address: String,
    pub token_address: String,
    pub amount: Amount,
    pub fee: Amount,
    pub block_hash: String,
    pub block_number: Height,
    pub timestamp: i64,
    /// Used when no submitted entry exists for this transfer
    pub tx_type: TxType,
    /// Destination is custodial and should receive the amount
    pub credit_destination: bool,
}

impl OutboundSettlement {
    /// Entry recorded when the movement was not submitted by this service
    pub fn to_entry(&self) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            block_hash: self.block_hash.clone(),
            block_number: Some(self.block_number),
            tx_hash: self.tx_hash.clone(),
            transfer_index: self.transfer_index,
            from_address: self.from_address.clone(),
            to_address: self.to_address.clone(),
            token_address: self.token_address.clone(),
            fee: self.fee,
            amount: self.amount,
            status: TxStatus::Credited,
            tx_type: self.tx_type,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Store a scanned block row; the highest row is the watermark
    RecordBlock(BlockWatermark),

    /// Insert a deposit unless `(tx_hash, transfer_index)` exists.
    /// Only a fresh insert credits `to_address.available`.
    RecordDeposit(LedgerEntry),

    /// Move an entry forward. No-op if it is already at or past `status`.
    AdvanceStatus { entry_id: Uuid, status: TxStatus },

    /// Confirm an outbound transfer seen on chain, releasing its lock
    SettleOutbound(OutboundSettlement),

    /// Insert a `pending` outbound entry and lock `amount` on the source
    RecordSubmission(LedgerEntry),

    /// Stamp a withdraw request as broadcast
    MarkWithdrawSent { request_id: i64, tx_hash: String },
}

/// Ordered set of mutations committed as one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    mutations: Vec<Mutation>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn record_block(&mut self, block: BlockWatermark) {
        self.push(Mutation::RecordBlock(block));
    }

    pub fn record_deposit(&mut self, entry: LedgerEntry) {
        self.push(Mutation::RecordDeposit(entry));
    }

    pub fn advance_status(&mut self, entry_id: Uuid, status: TxStatus) {
        self.push(Mutation::AdvanceStatus { entry_id, status });
    }

    pub fn settle_outbound(&mut self, settlement: OutboundSettlement) {
        self.push(Mutation::SettleOutbound(settlement));
    }

    pub fn record_submission(&mut self, entry: LedgerEntry) {
        self.push(Mutation::RecordSubmission(entry));
    }

    pub fn mark_withdraw_sent(&mut self, request_id: i64, tx_hash: &str) {
        self.push(Mutation::MarkWithdrawSent {
            request_id,
            tx_hash: tx_hash.to_string(),
        });
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}
