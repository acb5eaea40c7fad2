//! Ledger Store
//!
//! The only shared mutable resource. Components read through the query
//! methods and write exclusively through [`LedgerStore::atomic_batch`], which
//! applies a [`LedgerBatch`] all-or-nothing.
//!
//! Balance effects are derived by the store from the mutation that justifies
//! them, so a ledger entry and its balance adjustment always land in the
//! same commit.

pub mod batch;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use batch::{LedgerBatch, Mutation, OutboundSettlement};
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core_types::{
    Address, AddressRole, Amount, Balance, BlockWatermark, Height, LedgerEntry, TxStatus,
    WithdrawRequest,
};
use crate::error::StoreError;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest block folded into the ledger
    async fn latest_watermark(&self) -> Result<Option<BlockWatermark>, StoreError>;

    /// Address book lookup by on-chain address
    async fn find_address(&self, address: &str) -> Result<Option<Address>, StoreError>;

    /// The single hot or cold address (or any user address for `User`)
    async fn address_by_role(&self, role: AddressRole) -> Result<Option<Address>, StoreError>;

    /// Balances of addresses with `role` whose `available >= threshold`
    async fn balances_at_least(
        &self,
        role: AddressRole,
        threshold: Amount,
    ) -> Result<Vec<Balance>, StoreError>;

    /// Every token balance held by one address
    async fn balances_of(&self, address: &str) -> Result<Vec<Balance>, StoreError>;

    /// Withdraw requests not yet broadcast, oldest first
    async fn unsent_withdrawals(&self) -> Result<Vec<WithdrawRequest>, StoreError>;

    /// `pending` deposits with `block_number <= height`
    async fn pending_deposits_at_or_below(
        &self,
        height: Height,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn entries_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Apply every mutation or none of them
    async fn atomic_batch(&self, batch: &LedgerBatch) -> Result<(), StoreError>;

    /// Write path for business consumers
    async fn create_withdraw_request(
        &self,
        to_address: &str,
        token_address: &str,
        amount: Amount,
    ) -> Result<WithdrawRequest, StoreError>;

    /// Advance an entry to `notified`/`completed`. Regressions are rejected.
    async fn advance_status(&self, entry_id: Uuid, status: TxStatus) -> Result<(), StoreError>;
}

/// Resolve the hot or cold address, failing if provisioning never created it
pub async fn require_role(
    store: &dyn LedgerStore,
    role: AddressRole,
) -> Result<Address, StoreError> {
    store
        .address_by_role(role)
        .await?
        .ok_or(StoreError::MissingRole(role))
}
