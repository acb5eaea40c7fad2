//! In-memory Ledger Store
//!
//! Same contract as the PostgreSQL store. A batch is applied to a copy of
//! the state which replaces the live state only if every mutation succeeds.
//! Supports fault injection for exercising the retry path.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::batch::{LedgerBatch, Mutation, OutboundSettlement};
use super::LedgerStore;
use crate::core_types::{
    Address, AddressRole, Amount, Balance, BlockWatermark, Height, LedgerEntry, TxStatus, TxType,
    WithdrawRequest, WithdrawStatus,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    addresses: HashMap<String, Address>,
    balances: BTreeMap<(String, String), Balance>,
    blocks: BTreeMap<Height, BlockWatermark>,
    entries: Vec<LedgerEntry>,
    transfer_keys: HashSet<(String, u32)>,
    withdrawals: BTreeMap<i64, WithdrawRequest>,
    next_withdraw_id: i64,
}

impl LedgerState {
    fn balance_mut(&mut self, address: &str, token: &str) -> &mut Balance {
        self.balances
            .entry((address.to_string(), token.to_string()))
            .or_insert_with(|| Balance::empty(address, token))
    }

    fn credit(&mut self, address: &str, token: &str, amount: Amount) -> Result<(), StoreError> {
        let bal = self.balance_mut(address, token);
        bal.available = bal
            .available
            .checked_add(amount)
            .ok_or_else(|| StoreError::AmountOverflow(format!("{} {}", address, token)))?;
        Ok(())
    }

    /// available -> locked, capped at what is left. The transfer has
    /// already been broadcast, so a shortfall never rejects the entry.
    fn lock(&mut self, address: &str, token: &str, amount: Amount) {
        let bal = self.balance_mut(address, token);
        let held = amount.min(bal.available);
        if held < amount {
            warn!(
                address,
                token,
                needed = %amount,
                available = %bal.available,
                "Lock exceeds available balance, locking what is left"
            );
        }
        bal.available -= held;
        bal.locked += held;
    }

    fn release_lock(&mut self, address: &str, token: &str, amount: Amount) {
        let bal = self.balance_mut(address, token);
        bal.locked = bal.locked.saturating_sub(amount);
    }

    fn debit_available(&mut self, address: &str, token: &str, amount: Amount) {
        let bal = self.balance_mut(address, token);
        bal.available = bal.available.saturating_sub(amount);
    }

    fn insert_entry(&mut self, entry: LedgerEntry) -> bool {
        let key = (entry.tx_hash.clone(), entry.transfer_index);
        if !self.transfer_keys.insert(key) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    fn advance(&mut self, entry_id: Uuid, status: TxStatus, strict: bool) -> Result<(), StoreError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| StoreError::NotFound(format!("ledger entry {}", entry_id)))?;
        if !entry.status.can_advance_to(status) {
            if strict {
                return Err(StoreError::StatusRegression {
                    entry: entry_id.to_string(),
                    from: entry.status,
                    to: status,
                });
            }
            return Ok(());
        }
        entry.status = status;
        Ok(())
    }

    fn settle(&mut self, s: &OutboundSettlement) -> Result<(), StoreError> {
        let submitted = self.entries.iter_mut().find(|e| {
            e.tx_hash == s.tx_hash
                && e.tx_type.is_outbound()
                && e.from_address == s.from_address
                && e.token_address == s.token_address
        });

        match submitted {
            Some(entry) if entry.status == TxStatus::Pending => {
                entry.status = TxStatus::Credited;
                entry.block_hash = s.block_hash.clone();
                entry.block_number = Some(s.block_number);
                entry.fee = s.fee;
                entry.timestamp = s.timestamp;
                let locked_amount = entry.amount;
                self.release_lock(&s.from_address, &s.token_address, locked_amount);
            }
            // already settled by an earlier pass over this range
            Some(_) => return Ok(()),
            None => {
                if !self.insert_entry(s.to_entry()) {
                    return Ok(());
                }
                self.debit_available(&s.from_address, &s.token_address, s.amount);
            }
        }

        if s.credit_destination {
            self.credit(&s.to_address, &s.token_address, s.amount)?;
        }
        Ok(())
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::RecordBlock(block) => {
                self.blocks.insert(block.height, block.clone());
            }
            Mutation::RecordDeposit(entry) => {
                if self.insert_entry(entry.clone()) {
                    self.credit(&entry.to_address, &entry.token_address, entry.amount)?;
                }
            }
            Mutation::AdvanceStatus { entry_id, status } => {
                self.advance(*entry_id, *status, false)?;
            }
            Mutation::SettleOutbound(s) => self.settle(s)?,
            Mutation::RecordSubmission(entry) => {
                if self.insert_entry(entry.clone()) {
                    self.lock(&entry.from_address, &entry.token_address, entry.amount);
                }
            }
            Mutation::MarkWithdrawSent {
                request_id,
                tx_hash,
            } => {
                let req = self
                    .withdrawals
                    .get_mut(request_id)
                    .ok_or_else(|| StoreError::NotFound(format!("withdraw {}", request_id)))?;
                req.status = WithdrawStatus::Sent;
                req.tx_hash = Some(tx_hash.clone());
            }
        }
        Ok(())
    }
}

/// Ledger Store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
    fail_batches: AtomicU32,
    batch_calls: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Provisioning hook: register an address
    pub fn insert_address(&self, address: Address) {
        self.state()
            .addresses
            .insert(address.address.clone(), address);
    }

    /// Provisioning hook: overwrite a balance row
    pub fn set_balance(&self, address: &str, token: &str, available: Amount, locked: Amount) {
        let mut state = self.state();
        let bal = state.balance_mut(address, token);
        bal.available = available;
        bal.locked = locked;
    }

    pub fn balance(&self, address: &str, token: &str) -> Balance {
        self.state()
            .balances
            .get(&(address.to_string(), token.to_string()))
            .cloned()
            .unwrap_or_else(|| Balance::empty(address, token))
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state().entries.clone()
    }

    pub fn entries_of_type(&self, tx_type: TxType) -> Vec<LedgerEntry> {
        self.state()
            .entries
            .iter()
            .filter(|e| e.tx_type == tx_type)
            .cloned()
            .collect()
    }

    pub fn withdrawal(&self, id: i64) -> Option<WithdrawRequest> {
        self.state().withdrawals.get(&id).cloned()
    }

    pub fn block_heights(&self) -> Vec<Height> {
        self.state().blocks.keys().copied().collect()
    }

    /// Drop block rows above `height`, as if the commits that recorded them
    /// never advanced the watermark. Ledger entries and balances stay.
    pub fn rewind_watermark(&self, height: Height) {
        self.state().blocks.retain(|h, _| *h <= height);
    }

    /// Make the next `n` batch commits fail with a transient error
    pub fn fail_next_batches(&self, n: u32) {
        self.fail_batches.store(n, Ordering::SeqCst);
    }

    /// Number of `atomic_batch` calls seen, including failed ones
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn latest_watermark(&self) -> Result<Option<BlockWatermark>, StoreError> {
        Ok(self.state().blocks.values().next_back().cloned())
    }

    async fn find_address(&self, address: &str) -> Result<Option<Address>, StoreError> {
        Ok(self.state().addresses.get(address).cloned())
    }

    async fn address_by_role(&self, role: AddressRole) -> Result<Option<Address>, StoreError> {
        let state = self.state();
        let mut matches: Vec<&Address> =
            state.addresses.values().filter(|a| a.role == role).collect();
        matches.sort_by_key(|a| a.id);
        Ok(matches.first().map(|a| (*a).clone()))
    }

    async fn balances_at_least(
        &self,
        role: AddressRole,
        threshold: Amount,
    ) -> Result<Vec<Balance>, StoreError> {
        let state = self.state();
        Ok(state
            .balances
            .values()
            .filter(|b| b.available >= threshold)
            .filter(|b| {
                state
                    .addresses
                    .get(&b.address)
                    .is_some_and(|a| a.role == role)
            })
            .cloned()
            .collect())
    }

    async fn balances_of(&self, address: &str) -> Result<Vec<Balance>, StoreError> {
        Ok(self
            .state()
            .balances
            .values()
            .filter(|b| b.address == address)
            .cloned()
            .collect())
    }

    async fn unsent_withdrawals(&self) -> Result<Vec<WithdrawRequest>, StoreError> {
        Ok(self
            .state()
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawStatus::Unsent)
            .cloned()
            .collect())
    }

    async fn pending_deposits_at_or_below(
        &self,
        height: Height,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .state()
            .entries
            .iter()
            .filter(|e| {
                e.tx_type == TxType::Deposit
                    && e.status == TxStatus::Pending
                    && e.block_number.is_some_and(|n| n <= height)
            })
            .cloned()
            .collect())
    }

    async fn entries_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .state()
            .entries
            .iter()
            .filter(|e| e.tx_hash == tx_hash)
            .cloned()
            .collect())
    }

    async fn atomic_batch(&self, batch: &LedgerBatch) -> Result<(), StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .fail_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Transient("injected batch failure".into()));
        }

        let mut live = self.state();
        let mut next = live.clone();
        for mutation in batch.mutations() {
            next.apply(mutation)?;
        }
        *live = next;

        debug!(mutations = batch.len(), "Batch committed");
        Ok(())
    }

    async fn create_withdraw_request(
        &self,
        to_address: &str,
        token_address: &str,
        amount: Amount,
    ) -> Result<WithdrawRequest, StoreError> {
        let mut state = self.state();
        state.next_withdraw_id += 1;
        let request = WithdrawRequest {
            id: state.next_withdraw_id,
            to_address: to_address.to_string(),
            token_address: token_address.to_string(),
            amount,
            status: WithdrawStatus::Unsent,
            tx_hash: None,
        };
        state.withdrawals.insert(request.id, request.clone());
        Ok(request)
    }

    async fn advance_status(&self, entry_id: Uuid, status: TxStatus) -> Result<(), StoreError> {
        self.state().advance(entry_id, status, true)
    }
}
