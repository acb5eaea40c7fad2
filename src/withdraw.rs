//! Withdrawal Dispatcher
//!
//! Drains `unsent` withdraw requests against the hot wallet. Liquidity is
//! checked against a per-cycle snapshot of hot balances that every staged
//! withdrawal draws down, so one cycle can never overdraw. A request that
//! does not fit stays `unsent` for a later cycle.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::core_types::{AddressRole, Amount, LedgerEntry, TxType};
use crate::error::WalletError;
use crate::lifecycle::sign_and_broadcast;
use crate::retry::RetryPolicy;
use crate::signer::Signer;
use crate::store::{LedgerBatch, LedgerStore, require_role};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    /// Waiting for hot-wallet liquidity
    pub deferred: usize,
    /// Refused by the signer or lost in transport; retried next cycle
    pub failed: usize,
}

pub struct WithdrawalDispatcher {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer>,
    retry: RetryPolicy,
}

impl WithdrawalDispatcher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            chain,
            signer,
            retry,
        }
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<DispatchReport, WalletError> {
        let requests = self.store.unsent_withdrawals().await?;
        if requests.is_empty() {
            return Ok(DispatchReport::default());
        }

        let hot = require_role(self.store.as_ref(), AddressRole::Hot).await?;
        let mut liquidity: HashMap<String, Amount> = self
            .store
            .balances_of(&hot.address)
            .await?
            .into_iter()
            .map(|b| (b.token_address, b.available))
            .collect();

        let mut report = DispatchReport::default();
        let mut batch = LedgerBatch::new();

        for request in requests {
            let available = liquidity.get(&request.token_address).copied().unwrap_or(0);
            if available < request.amount {
                debug!(
                    request_id = request.id,
                    token = %request.token_address,
                    requested = %request.amount,
                    available = %available,
                    "Insufficient hot wallet liquidity, deferring withdrawal"
                );
                report.deferred += 1;
                continue;
            }

            match sign_and_broadcast(
                self.chain.as_ref(),
                self.signer.as_ref(),
                &hot,
                &request.to_address,
                &request.token_address,
                request.amount,
            )
            .await
            {
                Ok(Some(tx_hash)) => {
                    info!(request_id = request.id, %tx_hash, "Withdrawal broadcast");
                    batch.record_submission(LedgerEntry::submitted(
                        &tx_hash,
                        &hot.address,
                        &request.to_address,
                        &request.token_address,
                        request.amount,
                        TxType::Withdraw,
                    ));
                    batch.mark_withdraw_sent(request.id, &tx_hash);
                    liquidity.insert(request.token_address.clone(), available - request.amount);
                    report.sent += 1;
                }
                Ok(None) => report.failed += 1,
                Err(e) => {
                    warn!(request_id = request.id, error = %e, "Withdrawal dispatch failed, skipping");
                    report.failed += 1;
                }
            }
        }

        if !batch.is_empty() {
            self.retry.commit(self.store.as_ref(), &batch, cancel).await?;
        }

        info!(
            sent = report.sent,
            deferred = report.deferred,
            failed = report.failed,
            "Withdrawal cycle finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::core_types::WithdrawStatus;
    use crate::fixtures::{HOT, SOL, fast_retry, seeded_store};
    use crate::signer::MockSigner;
    use crate::store::MemoryLedgerStore;

    struct Harness {
        store: Arc<MemoryLedgerStore>,
        chain: Arc<MockChain>,
        signer: Arc<MockSigner>,
        dispatcher: WithdrawalDispatcher,
    }

    fn harness() -> Harness {
        let store = seeded_store();
        let chain = Arc::new(MockChain::new(0));
        let signer = Arc::new(MockSigner::new());
        let dispatcher = WithdrawalDispatcher::new(
            store.clone(),
            chain.clone(),
            signer.clone(),
            fast_retry(),
        );
        Harness {
            store,
            chain,
            signer,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_insufficient_liquidity_leaves_request_unsent() {
        let h = harness();
        h.store.set_balance(HOT, SOL, 3, 0);
        let req = h.store.create_withdraw_request("ext", SOL, 5).await.unwrap();

        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.deferred, 1);
        assert_eq!(h.store.withdrawal(req.id).unwrap().status, WithdrawStatus::Unsent);
        assert!(h.store.entries().is_empty());
        assert!(h.chain.broadcasts().is_empty());
        assert_eq!(h.store.balance(HOT, SOL).available, 3);
    }

    #[tokio::test]
    async fn test_withdrawal_is_sent_and_locked() {
        let h = harness();
        h.store.set_balance(HOT, SOL, 10, 0);
        let req = h.store.create_withdraw_request("ext", SOL, 4).await.unwrap();

        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.sent, 1);

        let sent = h.store.withdrawal(req.id).unwrap();
        assert_eq!(sent.status, WithdrawStatus::Sent);
        assert_eq!(sent.tx_hash.as_deref(), Some("tx-1"));

        let entries = h.store.entries_by_tx_hash("tx-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tx_type, TxType::Withdraw);

        let bal = h.store.balance(HOT, SOL);
        assert_eq!((bal.available, bal.locked), (6, 4));
    }

    #[tokio::test]
    async fn test_snapshot_prevents_joint_overdraw() {
        let h = harness();
        h.store.set_balance(HOT, SOL, 5, 0);
        let first = h.store.create_withdraw_request("a", SOL, 3).await.unwrap();
        let second = h.store.create_withdraw_request("b", SOL, 3).await.unwrap();

        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!((report.sent, report.deferred), (1, 1));
        assert_eq!(h.store.withdrawal(first.id).unwrap().status, WithdrawStatus::Sent);
        assert_eq!(h.store.withdrawal(second.id).unwrap().status, WithdrawStatus::Unsent);

        // liquidity arrives, the deferred request goes out next cycle
        h.store.set_balance(HOT, SOL, 4, 3);
        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.store.withdrawal(second.id).unwrap().status, WithdrawStatus::Sent);
    }

    #[tokio::test]
    async fn test_failed_item_is_isolated() {
        let h = harness();
        h.store.set_balance(HOT, SOL, 100, 0);
        let first = h.store.create_withdraw_request("a", SOL, 10).await.unwrap();
        let second = h.store.create_withdraw_request("b", SOL, 20).await.unwrap();
        h.chain.fail_next_broadcasts(1);

        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 1));
        assert_eq!(h.store.withdrawal(first.id).unwrap().status, WithdrawStatus::Unsent);
        assert_eq!(h.store.withdrawal(second.id).unwrap().status, WithdrawStatus::Sent);
        assert_eq!(h.store.balance(HOT, SOL).locked, 20);
    }

    #[tokio::test]
    async fn test_unreachable_signer_skips_one_request() {
        let h = harness();
        h.store.set_balance(HOT, SOL, 100, 0);
        let first = h.store.create_withdraw_request("a", SOL, 10).await.unwrap();
        let second = h.store.create_withdraw_request("b", SOL, 20).await.unwrap();
        h.signer.fail_next_requests(1);

        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 1));
        assert_eq!(h.store.withdrawal(first.id).unwrap().status, WithdrawStatus::Unsent);
        assert_eq!(h.store.withdrawal(second.id).unwrap().status, WithdrawStatus::Sent);
        assert_eq!(h.chain.broadcasts().len(), 1);
        assert_eq!(h.store.entries_of_type(TxType::Withdraw).len(), 1);

        let bal = h.store.balance(HOT, SOL);
        assert_eq!((bal.available, bal.locked), (80, 20));

        // signer back, the skipped request goes out next cycle
        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.store.withdrawal(first.id).unwrap().status, WithdrawStatus::Sent);
    }

    #[tokio::test]
    async fn test_tokens_have_separate_liquidity() {
        let h = harness();
        h.store.set_balance(HOT, SOL, 1, 0);
        h.store.set_balance(HOT, "MintX", 50, 0);
        h.store.create_withdraw_request("a", SOL, 2).await.unwrap();
        h.store.create_withdraw_request("b", "MintX", 50).await.unwrap();

        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!((report.sent, report.deferred), (1, 1));
        assert_eq!(h.store.balance(HOT, "MintX").locked, 50);
    }

    #[tokio::test]
    async fn test_no_requests_touches_nothing() {
        let h = harness();
        let report = h.dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert_eq!(h.store.batch_calls(), 0);
    }
}
