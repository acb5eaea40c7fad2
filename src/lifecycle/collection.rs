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

/// Sweeps user balances above the collection threshold into the hot wallet
pub struct Collector {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer>,
    funding: FundingConfig,
    retry: RetryPolicy,
}

impl Collector {
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

    /// Returns the number of collections submitted
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize, WalletError> {
        let hot = require_role(self.store.as_ref(), AddressRole::Hot).await?;
        let candidates = self
            .store
            .balances_at_least(AddressRole::User, self.funding.min_collection_threshold())
            .await?;

        let mut batch = LedgerBatch::new();
        for balance in candidates {
            let threshold = self.funding.collection_threshold_for(&balance.token_address);
            if balance.available < threshold {
                continue;
            }
            let Some(owner) = self.store.find_address(&balance.address).await? else {
                warn!(address = %balance.address, "Balance without address book entry");
                continue;
            };

            let amount = balance.available;
            match sign_and_broadcast(
                self.chain.as_ref(),
                self.signer.as_ref(),
                &owner,
                &hot.address,
                &balance.token_address,
                amount,
            )
            .await
            {
                Ok(Some(tx_hash)) => {
                    debug!(from = %owner.address, %tx_hash, %amount, "Collection broadcast");
                    batch.record_submission(LedgerEntry::submitted(
                        &tx_hash,
                        &owner.address,
                        &hot.address,
                        &balance.token_address,
                        amount,
                        TxType::Collection,
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(from = %owner.address, error = %e, "Collection failed, skipping");
                }
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        let submitted = batch.len();
        self.retry.commit(self.store.as_ref(), &batch, cancel).await?;
        info!(submitted, "Collection cycle committed");
        Ok(submitted)
    }
}
