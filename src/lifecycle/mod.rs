//! Fund Lifecycle Engine
//!
//! Two independent policies moving funds up the custody tiers:
//! - [`Collector`]: user addresses -> hot wallet
//! - [`ColdSweeper`]: hot wallet -> cold wallet
//!
//! Every successful broadcast is staged as a `pending` entry whose amount is
//! locked on the source, and the whole cycle is committed as one batch.

pub mod cold_sweep;
pub mod collection;

pub use cold_sweep::ColdSweeper;
pub use collection::Collector;

use tracing::warn;

use crate::chain::ChainClient;
use crate::core_types::{Address, Amount};
use crate::error::WalletError;
use crate::signer::{SignRequest, Signer};

/// Nonce, sign and broadcast one transfer.
///
/// `Ok(None)` when the signer refuses; transport failures are errors the
/// caller decides how to handle.
pub(crate) async fn sign_and_broadcast(
    chain: &dyn ChainClient,
    signer: &dyn Signer,
    from: &Address,
    to: &str,
    token: &str,
    amount: Amount,
) -> Result<Option<String>, WalletError> {
    let nonce = chain.current_nonce().await?;

    let response = signer
        .sign(&SignRequest {
            from: from.address.clone(),
            to: to.to_string(),
            amount,
            token: token.to_string(),
            nonce,
            key_ref: from.signing_key_ref.clone(),
        })
        .await?;

    if !response.is_success() {
        warn!(
            from = %from.address,
            to,
            token,
            code = response.code,
            message = %response.message,
            "Signer refused transfer, skipping"
        );
        return Ok(None);
    }

    let tx_hash = chain.broadcast(&response.signed_tx).await?;
    Ok(Some(tx_hash))
}
