//! Core ledger types shared by every component.
//!
//! Amounts are always in the smallest on-chain unit and never negative.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Amount in the smallest on-chain unit (lamports, token base units, ...)
pub type Amount = u128;

/// Block height (slot)
pub type Height = u64;

/// Custody tier of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum AddressRole {
    User = 0,
    Hot = 1,
    Cold = 2,
}

impl AddressRole {
    /// Numeric id for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(AddressRole::User),
            1 => Some(AddressRole::Hot),
            2 => Some(AddressRole::Cold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::User => "user",
            AddressRole::Hot => "hot",
            AddressRole::Cold => "cold",
        }
    }
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of the address book. Created by provisioning, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub owner_ref: String,
    pub address: String,
    pub role: AddressRole,
    /// Opaque handle understood only by the signer
    pub signing_key_ref: String,
}

/// Per-address, per-token balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub token_address: String,
    pub available: Amount,
    /// Committed to an outbound transfer awaiting confirmation
    pub locked: Amount,
}

impl Balance {
    pub fn empty(address: &str, token_address: &str) -> Self {
        Self {
            address: address.to_string(),
            token_address: token_address.to_string(),
            available: 0,
            locked: 0,
        }
    }

    pub fn total(&self) -> Amount {
        self.available.saturating_add(self.locked)
    }
}

/// A block whose transfers have been folded into the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWatermark {
    pub hash: String,
    pub parent_hash: String,
    pub height: Height,
    pub timestamp: i64,
}

/// Ledger entry lifecycle. Ordered: a status never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TxStatus {
    Pending = 0,
    Credited = 1,
    Notified = 2,
    Completed = 3,
}

impl TxStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            1 => Some(TxStatus::Credited),
            2 => Some(TxStatus::Notified),
            3 => Some(TxStatus::Completed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` respects monotonicity
    pub fn can_advance_to(&self, next: TxStatus) -> bool {
        next >= *self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Credited => "credited",
            TxStatus::Notified => "notified",
            TxStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TxStatus::Pending),
            "credited" => Ok(TxStatus::Credited),
            "notified" => Ok(TxStatus::Notified),
            "completed" => Ok(TxStatus::Completed),
            _ => Err(format!("Invalid tx status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TxType {
    Deposit = 0,
    Withdraw = 1,
    Collection = 2,
    HotToCold = 3,
    ColdToHot = 4,
}

impl TxType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxType::Deposit),
            1 => Some(TxType::Withdraw),
            2 => Some(TxType::Collection),
            3 => Some(TxType::HotToCold),
            4 => Some(TxType::ColdToHot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdraw => "withdraw",
            TxType::Collection => "collection",
            TxType::HotToCold => "hot_to_cold",
            TxType::ColdToHot => "cold_to_hot",
        }
    }

    /// Outbound movements are submitted by this service and settled by the scanner
    pub fn is_outbound(&self) -> bool {
        !matches!(self, TxType::Deposit)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub block_hash: String,
    /// `None` until the transfer is observed on chain
    pub block_number: Option<Height>,
    pub tx_hash: String,
    /// Position of the transfer inside its transaction
    pub transfer_index: u32,
    pub from_address: String,
    pub to_address: String,
    pub token_address: String,
    pub fee: Amount,
    pub amount: Amount,
    pub status: TxStatus,
    pub tx_type: TxType,
    pub timestamp: i64,
}

impl LedgerEntry {
    /// Entry for a transaction this service just broadcast
    pub fn submitted(
        tx_hash: &str,
        from: &str,
        to: &str,
        token: &str,
        amount: Amount,
        tx_type: TxType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            block_hash: String::new(),
            block_number: None,
            tx_hash: tx_hash.to_string(),
            transfer_index: 0,
            from_address: from.to_string(),
            to_address: to.to_string(),
            token_address: token.to_string(),
            fee: 0,
            amount,
            status: TxStatus::Pending,
            tx_type,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum WithdrawStatus {
    Unsent = 0,
    Sent = 1,
}

impl WithdrawStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawStatus::Unsent),
            1 => Some(WithdrawStatus::Sent),
            _ => None,
        }
    }
}

/// Outbound withdrawal requested by a business consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: i64,
    pub to_address: String,
    pub token_address: String,
    pub amount: Amount,
    pub status: WithdrawStatus,
    pub tx_hash: Option<String>,
}
