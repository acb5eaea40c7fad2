//! End-to-end wallet flows over the in-memory store and scripted
//! collaborators: deposit -> collection -> settlement -> withdrawal, replay
//! safety, and shutdown on a critical worker failure.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use custody_wallet::chain::{ChainTransfer, MockChain};
use custody_wallet::config::AppConfig;
use custody_wallet::retry::RetryPolicy;
use custody_wallet::scanner::DepositScanner;
use custody_wallet::signer::MockSigner;
use custody_wallet::store::{LedgerStore, MemoryLedgerStore};
use custody_wallet::{
    Address, AddressRole, Amount, Balance, BlockWatermark, Height, LedgerBatch, LedgerEntry,
    StoreError, TxStatus, TxType, WalletError, WalletService, WithdrawRequest, WithdrawStatus,
};

const SOL: &str = "So11111111111111111111111111111111111111112";
const HOT: &str = "HotWa11et";
const COLD: &str = "Co1dWa11et";
const USER: &str = "UserDeposit1";

fn config() -> AppConfig {
    AppConfig::from_yaml(
        r#"
log_level: "info"
log_dir: "./logs"
log_file: "test.log"
use_json: false
rotation: "never"
database:
  url: "postgres://unused"
chain:
  rpc_url: "http://unused"
  blocks_step: 20
  confirmations: 1
signer:
  url: "http://unused"
funding:
  collection_threshold: 10000000000000000
  cold_threshold: "1_000_000_000_000_000_000_000"
workers:
  scan_interval_ms: 10
  collection_interval_ms: 10
  cold_sweep_interval_ms: 10
  withdraw_interval_ms: 10
retry:
  max_attempts: 3
  min_delay_ms: 1
  max_delay_ms: 5
  max_jitter_ms: 1
"#,
    )
    .unwrap()
}

fn address(id: i64, addr: &str, role: AddressRole) -> Address {
    Address {
        id,
        owner_ref: format!("owner-{}", id),
        address: addr.to_string(),
        role,
        signing_key_ref: format!("kms://{}", addr),
    }
}

fn provisioned_store() -> Arc<MemoryLedgerStore> {
    let store = MemoryLedgerStore::new();
    store.insert_address(address(1, HOT, AddressRole::Hot));
    store.insert_address(address(2, COLD, AddressRole::Cold));
    store.insert_address(address(3, USER, AddressRole::User));
    Arc::new(store)
}

fn transfer(tx_hash: &str, source: &str, destination: &str, amount: Amount) -> ChainTransfer {
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

/// Poll `check` until it holds or the deadline passes
async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_deposit_collect_settle_withdraw() {
    let store = provisioned_store();
    let chain = Arc::new(MockChain::new(3));
    let signer = Arc::new(MockSigner::new());
    let amount: Amount = 2_000_000_000_000_000_000;

    chain.push_transfer(1, transfer("deposit-1", "external", USER, amount));

    let mut service = WalletService::new(store.clone(), chain.clone(), signer.clone(), &config());
    service.start().unwrap();

    // deposit credited, then collected into a pending entry with the amount locked
    eventually("collection submitted", || {
        store.entries_of_type(TxType::Collection).len() == 1
    })
    .await;
    let bal = store.balance(USER, SOL);
    assert_eq!((bal.available, bal.locked), (0, amount));
    let collection_hash = MockChain::tx_hash_for(1);
    assert_eq!(store.entries_of_type(TxType::Collection)[0].tx_hash, collection_hash);

    // collection confirmed on chain
    chain.push_transfer(4, transfer(&collection_hash, USER, HOT, amount));
    chain.set_head(5);
    eventually("collection settled", || {
        store.balance(HOT, SOL).available == amount
    })
    .await;
    assert_eq!(store.balance(USER, SOL).total(), 0);
    assert_eq!(
        store.entries_of_type(TxType::Collection)[0].status,
        TxStatus::Credited
    );

    // withdrawal out of the hot wallet
    let payout: Amount = 500_000_000_000_000_000;
    let request = store
        .create_withdraw_request("external-payee", SOL, payout)
        .await
        .unwrap();
    eventually("withdrawal sent", || {
        store.withdrawal(request.id).map(|w| w.status) == Some(WithdrawStatus::Sent)
    })
    .await;
    let hot = store.balance(HOT, SOL);
    assert_eq!((hot.available, hot.locked), (amount - payout, payout));

    let withdraw_hash = store.withdrawal(request.id).unwrap().tx_hash.unwrap();
    chain.push_transfer(6, transfer(&withdraw_hash, HOT, "external-payee", payout));
    chain.set_head(7);
    eventually("withdrawal settled", || store.balance(HOT, SOL).locked == 0).await;
    assert_eq!(store.balance(HOT, SOL).available, amount - payout);

    assert!(service.critical_error().is_none());
    service.stop().await.unwrap();

    // deposit credited exactly once across all those cycles
    assert_eq!(store.entries_of_type(TxType::Deposit).len(), 1);
}

#[tokio::test]
async fn test_missing_custody_address_shuts_service_down() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.insert_address(address(3, USER, AddressRole::User));
    store.set_balance(USER, SOL, 1_000_000_000_000_000_000, 0);

    let mut service = WalletService::new(
        store,
        Arc::new(MockChain::new(0)),
        Arc::new(MockSigner::new()),
        &config(),
    );
    service.start().unwrap();

    tokio::time::timeout(Duration::from_secs(5), service.wait())
        .await
        .expect("critical error should cancel the workers");

    let err = service.stop().await.unwrap_err();
    assert!(matches!(err, WalletError::WorkersFailed(_)));
    assert!(err.to_string().contains("hot"));
}

#[tokio::test]
async fn test_service_cannot_start_twice_or_restart() {
    let mut service = WalletService::new(
        provisioned_store(),
        Arc::new(MockChain::new(0)),
        Arc::new(MockSigner::new()),
        &config(),
    );
    service.start().unwrap();
    assert!(matches!(service.start(), Err(WalletError::Config(_))));
    service.stop().await.unwrap();

    // stopped is terminal
    assert!(matches!(service.start(), Err(WalletError::Config(_))));
    service.stop().await.unwrap();
}

/// Store whose watermark never moves, so every cycle rescans the same range
struct FrozenWatermark {
    inner: Arc<MemoryLedgerStore>,
}

#[async_trait]
impl LedgerStore for FrozenWatermark {
    async fn latest_watermark(&self) -> Result<Option<BlockWatermark>, StoreError> {
        Ok(None)
    }

    async fn find_address(&self, address: &str) -> Result<Option<Address>, StoreError> {
        self.inner.find_address(address).await
    }

    async fn address_by_role(&self, role: AddressRole) -> Result<Option<Address>, StoreError> {
        self.inner.address_by_role(role).await
    }

    async fn balances_at_least(
        &self,
        role: AddressRole,
        threshold: Amount,
    ) -> Result<Vec<Balance>, StoreError> {
        self.inner.balances_at_least(role, threshold).await
    }

    async fn balances_of(&self, address: &str) -> Result<Vec<Balance>, StoreError> {
        self.inner.balances_of(address).await
    }

    async fn unsent_withdrawals(&self) -> Result<Vec<WithdrawRequest>, StoreError> {
        self.inner.unsent_withdrawals().await
    }

    async fn pending_deposits_at_or_below(
        &self,
        height: Height,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.pending_deposits_at_or_below(height).await
    }

    async fn entries_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.entries_by_tx_hash(tx_hash).await
    }

    async fn atomic_batch(&self, batch: &LedgerBatch) -> Result<(), StoreError> {
        self.inner.atomic_batch(batch).await
    }

    async fn create_withdraw_request(
        &self,
        to_address: &str,
        token_address: &str,
        amount: Amount,
    ) -> Result<WithdrawRequest, StoreError> {
        self.inner
            .create_withdraw_request(to_address, token_address, amount)
            .await
    }

    async fn advance_status(&self, entry_id: Uuid, status: TxStatus) -> Result<(), StoreError> {
        self.inner.advance_status(entry_id, status).await
    }
}

#[tokio::test]
async fn test_rescanning_same_range_is_idempotent() {
    let store = provisioned_store();
    store.set_balance(HOT, SOL, 10_000, 0);

    let chain = Arc::new(MockChain::new(4));
    chain.push_transfer(1, transfer("dep-a", "external", USER, 700));
    chain.push_transfer(2, transfer("dep-b", "external", USER, 300));
    chain.push_transfer(3, transfer("sweep", HOT, COLD, 4_000));

    let app = config();
    let scanner = DepositScanner::new(
        Arc::new(FrozenWatermark {
            inner: store.clone(),
        }),
        chain,
        app.chain.clone(),
        RetryPolicy::from_config(&app.retry),
    );

    let cancel = CancellationToken::new();
    scanner.run_cycle(&cancel).await.unwrap();
    let entries_once = store.entries().len();
    let user_once = store.balance(USER, SOL);
    let hot_once = store.balance(HOT, SOL);
    let cold_once = store.balance(COLD, SOL);

    for _ in 0..3 {
        scanner.run_cycle(&cancel).await.unwrap();
    }

    assert_eq!(store.entries().len(), entries_once);
    assert_eq!(store.balance(USER, SOL), user_once);
    assert_eq!(store.balance(HOT, SOL), hot_once);
    assert_eq!(store.balance(COLD, SOL), cold_once);
    assert_eq!(user_once.available, 1_000);
    assert_eq!(hot_once.available, 6_000);
    assert_eq!(cold_once.available, 4_000);
}

#[tokio::test]
async fn test_status_never_regresses() {
    let store = provisioned_store();
    let chain = Arc::new(MockChain::new(2));
    chain.push_transfer(1, transfer("dep", "external", USER, 10));

    let app = config();
    let scanner = DepositScanner::new(
        store.clone(),
        chain,
        app.chain.clone(),
        RetryPolicy::from_config(&app.retry),
    );
    scanner.run_cycle(&CancellationToken::new()).await.unwrap();

    let entry = store.entries_by_tx_hash("dep").await.unwrap().remove(0);
    assert_eq!(entry.status, TxStatus::Credited);

    store
        .advance_status(entry.id, TxStatus::Notified)
        .await
        .unwrap();
    store
        .advance_status(entry.id, TxStatus::Completed)
        .await
        .unwrap();
    assert!(matches!(
        store.advance_status(entry.id, TxStatus::Credited).await,
        Err(StoreError::StatusRegression { .. })
    ));
}
