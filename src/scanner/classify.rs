//! Transfer classification
//!
//! A transfer is judged only by which of its endpoints are in the address
//! book and by the custody role of those endpoints.

use crate::core_types::{Address, AddressRole, TxType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Neither endpoint is ours
    Ignore,
    /// Funds arriving from outside
    Deposit,
    /// Funds leaving a custodial address, seen confirmed on chain
    Outbound {
        tx_type: TxType,
        credit_destination: bool,
    },
}

pub fn classify(source: Option<&Address>, destination: Option<&Address>) -> TransferKind {
    match (source, destination) {
        (None, None) => TransferKind::Ignore,
        (None, Some(_)) => TransferKind::Deposit,
        (Some(_), None) => TransferKind::Outbound {
            tx_type: TxType::Withdraw,
            credit_destination: false,
        },
        (Some(src), Some(dst)) => {
            let tx_type = match (src.role, dst.role) {
                (AddressRole::Cold, AddressRole::Hot) => TxType::ColdToHot,
                (_, AddressRole::Hot) => TxType::Collection,
                (AddressRole::Hot, AddressRole::Cold) => TxType::HotToCold,
                _ => TxType::Withdraw,
            };
            TransferKind::Outbound {
                tx_type,
                credit_destination: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(address: &str, role: AddressRole) -> Address {
        Address {
            id: 1,
            owner_ref: "owner".into(),
            address: address.into(),
            role,
            signing_key_ref: "key".into(),
        }
    }

    fn outbound(kind: TransferKind) -> (TxType, bool) {
        match kind {
            TransferKind::Outbound {
                tx_type,
                credit_destination,
            } => (tx_type, credit_destination),
            other => panic!("expected outbound, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_endpoints() {
        let user = addr("u1", AddressRole::User);
        assert_eq!(classify(None, None), TransferKind::Ignore);
        assert_eq!(classify(None, Some(&user)), TransferKind::Deposit);
        assert_eq!(
            outbound(classify(Some(&user), None)),
            (TxType::Withdraw, false)
        );
    }

    #[test]
    fn test_internal_movements() {
        let user = addr("u1", AddressRole::User);
        let hot = addr("hot", AddressRole::Hot);
        let cold = addr("cold", AddressRole::Cold);

        assert_eq!(
            outbound(classify(Some(&user), Some(&hot))),
            (TxType::Collection, true)
        );
        assert_eq!(
            outbound(classify(Some(&hot), Some(&cold))),
            (TxType::HotToCold, true)
        );
        assert_eq!(
            outbound(classify(Some(&cold), Some(&hot))),
            (TxType::ColdToHot, true)
        );
        // hot paying a user address is still a withdrawal
        assert_eq!(
            outbound(classify(Some(&hot), Some(&user))),
            (TxType::Withdraw, true)
        );
    }
}
