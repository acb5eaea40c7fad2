use tracing::debug;

use crate::core_types::{Height, TxStatus};
use crate::error::StoreError;
use crate::store::{LedgerBatch, LedgerStore};

/// Highest block considered final once the scan reached `tip`.
/// `None` while the chain is shallower than the confirmation depth.
pub fn confirmation_height(tip: Height, confirmations: u64) -> Option<Height> {
    tip.checked_sub(confirmations)
}

/// Status a newly detected deposit starts in
pub fn initial_status(block_number: Height, confirmed_at: Option<Height>) -> TxStatus {
    match confirmed_at {
        Some(h) if block_number <= h => TxStatus::Credited,
        _ => TxStatus::Pending,
    }
}

/// Stage `pending -> credited` for every stored deposit that is now deep enough
pub async fn stage_confirmations(
    store: &dyn LedgerStore,
    confirmed_at: Option<Height>,
    batch: &mut LedgerBatch,
) -> Result<usize, StoreError> {
    let Some(height) = confirmed_at else {
        return Ok(0);
    };

    let pending = store.pending_deposits_at_or_below(height).await?;
    for entry in &pending {
        debug!(tx_hash = %entry.tx_hash, block = ?entry.block_number, "Deposit confirmed");
        batch.advance_status(entry.id, TxStatus::Credited);
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_height() {
        assert_eq!(confirmation_height(110, 5), Some(105));
        assert_eq!(confirmation_height(110, 0), Some(110));
        assert_eq!(confirmation_height(3, 5), None);
    }

    #[test]
    fn test_initial_status() {
        assert_eq!(initial_status(105, Some(105)), TxStatus::Credited);
        assert_eq!(initial_status(106, Some(105)), TxStatus::Pending);
        assert_eq!(initial_status(0, None), TxStatus::Pending);
    }
}
