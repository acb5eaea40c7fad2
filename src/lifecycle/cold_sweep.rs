use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sign_and_broadcast;
use crate::chain::ChainClient;
use crate::config::FundingConfig;
use crate::core_types::{AddressRole, LedgerEntry, TxType};
use crate::error::WalletError;
use crate::retry::RetryPolicy;
use crate::signer::Signer;
use crate::store::{LedgerBatch, LedgerStore, require_role};

/// Moves hot-wallet balances above the cold threshold into cold storage,
/// keeping `cold_retain` behind
pub struct ColdSweeper {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer>,
    funding: FundingConfig,
    retry: RetryPolicy,
}

impl ColdSweeper {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        funding: FundingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            chain,
            signer,
            funding,
            retry,
        }
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize, WalletError> {
        let hot = require_role(self.store.as_ref(), AddressRole::Hot).await?;
        let cold = require_role(self.store.as_ref(), AddressRole::Cold).await?;

        let candidates = self
            .store
            .balances_at_least(AddressRole::Hot, self.funding.min_cold_threshold())
            .await?;

        let mut batch = LedgerBatch::new();
        for balance in candidates {
            if balance.address != hot.address
                || balance.available < self.funding.cold_threshold_for(&balance.token_address)
            {
                continue;
            }
            let amount = balance.available.saturating_sub(self.funding.cold_retain);
            if amount == 0 {
                continue;
            }

            match sign_and_broadcast(
                self.chain.as_ref(),
                self.signer.as_ref(),
                &hot,
                &cold.address,
                &balance.token_address,
                amount,
            )
            .await
            {
                Ok(Some(tx_hash)) => {
                    debug!(token = %balance.token_address, %tx_hash, %amount, "Cold sweep broadcast");
                    batch.record_submission(LedgerEntry::submitted(
                        &tx_hash,
                        &hot.address,
                        &cold.address,
                        &balance.token_address,
                        amount,
                        TxType::HotToCold,
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(token = %balance.token_address, error = %e, "Cold sweep failed, skipping");
                }
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        let submitted = batch.len();
        self.retry.commit(self.store.as_ref(), &batch, cancel).await?;
        info!(submitted, "Cold sweep cycle committed");
        Ok(submitted)
    }
}
