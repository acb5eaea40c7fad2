//! Shared builders for unit tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::ChainTransfer;
use crate::config::{ChainConfig, FundingConfig};
use crate::core_types::{Address, AddressRole, Amount};
use crate::retry::{ExponentialStrategy, RetryPolicy};
use crate::store::MemoryLedgerStore;

pub const SOL: &str = "So11111111111111111111111111111111111111112";
pub const HOT: &str = "hot-wallet";
pub const COLD: &str = "cold-wallet";

pub fn address(id: i64, address: &str, role: AddressRole) -> Address {
    Address {
        id,
        owner_ref: format!("owner-{}", id),
        address: address.to_string(),
        role,
        signing_key_ref: format!("key-{}", address),
    }
}

/// Hot, cold and users `u1`..`u3`
pub fn seeded_store() -> Arc<MemoryLedgerStore> {
    let store = MemoryLedgerStore::new();
    store.insert_address(address(1, HOT, AddressRole::Hot));
    store.insert_address(address(2, COLD, AddressRole::Cold));
    for i in 1..=3 {
        store.insert_address(address(10 + i, &format!("u{}", i), AddressRole::User));
    }
    Arc::new(store)
}

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        rpc_url: "http://127.0.0.1:8899".into(),
        starting_height: 0,
        blocks_step: 20,
        confirmations: 5,
        native_token: SOL.into(),
        request_timeout_ms: 1000,
    }
}

pub fn funding_config(collection_threshold: Amount, cold_threshold: Amount) -> FundingConfig {
    FundingConfig {
        collection_threshold,
        cold_threshold,
        cold_retain: 0,
        tokens: HashMap::new(),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        strategy: ExponentialStrategy {
            min: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_jitter: Duration::ZERO,
        },
    }
}

pub fn transfer(tx_hash: &str, source: &str, destination: &str, amount: Amount) -> ChainTransfer {
    ChainTransfer {
        tx_hash: tx_hash.to_string(),
        index: 0,
        source: source.to_string(),
        destination: destination.to_string(),
        token: SOL.to_string(),
        amount,
        fee: 5000,
    }
}
