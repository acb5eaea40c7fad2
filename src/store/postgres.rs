//! PostgreSQL Ledger Store
//!
//! Every batch runs inside one database transaction. Balance changes are
//! relative updates guarded by `available >= amount`, so two loops touching
//! the same row never overwrite each other.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::batch::{LedgerBatch, Mutation, OutboundSettlement};
use super::LedgerStore;
use super::schema;
use crate::core_types::{
    Address, AddressRole, Amount, Balance, BlockWatermark, Height, LedgerEntry, TxStatus, TxType,
    WithdrawRequest, WithdrawStatus,
};
use crate::error::StoreError;

const ENTRY_COLUMNS: &str = "id, block_hash, block_number, tx_hash, transfer_index, from_address, \
     to_address, token_address, fee, amount, status, tx_type, timestamp";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        schema::init_schema(&self.pool).await?;
        Ok(())
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        mutation: &Mutation,
    ) -> Result<(), StoreError> {
        match mutation {
            Mutation::RecordBlock(block) => {
                sqlx::query(
                    r#"INSERT INTO blocks (height, hash, parent_hash, timestamp)
                       VALUES ($1, $2, $3, $4)
                       ON CONFLICT (height) DO UPDATE
                       SET hash = EXCLUDED.hash,
                           parent_hash = EXCLUDED.parent_hash,
                           timestamp = EXCLUDED.timestamp"#,
                )
                .bind(block.height as i64)
                .bind(&block.hash)
                .bind(&block.parent_hash)
                .bind(block.timestamp)
                .execute(&mut **tx)
                .await?;
            }
            Mutation::RecordDeposit(entry) => {
                if insert_entry(tx, entry).await? {
                    credit(tx, &entry.to_address, &entry.token_address, entry.amount).await?;
                }
            }
            Mutation::AdvanceStatus { entry_id, status } => {
                sqlx::query("UPDATE transactions SET status = $1 WHERE id = $2 AND status < $1")
                    .bind(status.id())
                    .bind(entry_id)
                    .execute(&mut **tx)
                    .await?;
            }
            Mutation::SettleOutbound(s) => settle(tx, s).await?,
            Mutation::RecordSubmission(entry) => {
                if insert_entry(tx, entry).await? {
                    lock(tx, &entry.from_address, &entry.token_address, entry.amount).await?;
                }
            }
            Mutation::MarkWithdrawSent {
                request_id,
                tx_hash,
            } => {
                let result = sqlx::query(
                    r#"UPDATE withdraw_requests
                       SET status = $1, tx_hash = $2, updated_at = NOW()
                       WHERE id = $3"#,
                )
                .bind(WithdrawStatus::Sent.id())
                .bind(tx_hash)
                .bind(request_id)
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound(format!("withdraw {}", request_id)));
                }
            }
        }
        Ok(())
    }
}

fn to_decimal(amount: Amount) -> Result<Decimal, StoreError> {
    Decimal::from_str(&amount.to_string())
        .map_err(|_| StoreError::AmountOverflow(amount.to_string()))
}

fn from_decimal(value: Decimal) -> Result<Amount, StoreError> {
    value
        .trunc()
        .to_string()
        .parse::<Amount>()
        .map_err(|_| StoreError::Corrupt(format!("amount {}", value)))
}

fn row_to_address(r: &PgRow) -> Result<Address, StoreError> {
    let role_id: i16 = r.try_get("role")?;
    Ok(Address {
        id: r.try_get("id")?,
        owner_ref: r.try_get("owner_ref")?,
        address: r.try_get("address")?,
        role: AddressRole::from_id(role_id)
            .ok_or_else(|| StoreError::Corrupt(format!("address role {}", role_id)))?,
        signing_key_ref: r.try_get("signing_key_ref")?,
    })
}

fn row_to_balance(r: &PgRow) -> Result<Balance, StoreError> {
    Ok(Balance {
        address: r.try_get("address")?,
        token_address: r.try_get("token_address")?,
        available: from_decimal(r.try_get("available")?)?,
        locked: from_decimal(r.try_get("locked")?)?,
    })
}

fn row_to_entry(r: &PgRow) -> Result<LedgerEntry, StoreError> {
    let status_id: i16 = r.try_get("status")?;
    let type_id: i16 = r.try_get("tx_type")?;
    let block_number: Option<i64> = r.try_get("block_number")?;
    let transfer_index: i32 = r.try_get("transfer_index")?;
    Ok(LedgerEntry {
        id: r.try_get("id")?,
        block_hash: r.try_get("block_hash")?,
        block_number: block_number.map(|n| n as Height),
        tx_hash: r.try_get("tx_hash")?,
        transfer_index: transfer_index as u32,
        from_address: r.try_get("from_address")?,
        to_address: r.try_get("to_address")?,
        token_address: r.try_get("token_address")?,
        fee: from_decimal(r.try_get("fee")?)?,
        amount: from_decimal(r.try_get("amount")?)?,
        status: TxStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Corrupt(format!("tx status {}", status_id)))?,
        tx_type: TxType::from_id(type_id)
            .ok_or_else(|| StoreError::Corrupt(format!("tx type {}", type_id)))?,
        timestamp: r.try_get("timestamp")?,
    })
}

fn row_to_withdraw(r: &PgRow) -> Result<WithdrawRequest, StoreError> {
    let status_id: i16 = r.try_get("status")?;
    Ok(WithdrawRequest {
        id: r.try_get("id")?,
        to_address: r.try_get("to_address")?,
        token_address: r.try_get("token_address")?,
        amount: from_decimal(r.try_get("amount")?)?,
        status: WithdrawStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Corrupt(format!("withdraw status {}", status_id)))?,
        tx_hash: r.try_get("tx_hash")?,
    })
}

/// Returns false if the transfer identity already exists
async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerEntry,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"INSERT INTO transactions
           (id, block_hash, block_number, tx_hash, transfer_index, from_address, to_address,
            token_address, fee, amount, status, tx_type, timestamp)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
           ON CONFLICT (tx_hash, transfer_index) DO NOTHING"#,
    )
    .bind(entry.id)
    .bind(&entry.block_hash)
    .bind(entry.block_number.map(|n| n as i64))
    .bind(&entry.tx_hash)
    .bind(entry.transfer_index as i32)
    .bind(&entry.from_address)
    .bind(&entry.to_address)
    .bind(&entry.token_address)
    .bind(to_decimal(entry.fee)?)
    .bind(to_decimal(entry.amount)?)
    .bind(entry.status.id())
    .bind(entry.tx_type.id())
    .bind(entry.timestamp)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    address: &str,
    token: &str,
    amount: Amount,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO balances (address, token_address, available, locked)
           VALUES ($1, $2, $3, 0)
           ON CONFLICT (address, token_address)
           DO UPDATE SET available = balances.available + EXCLUDED.available,
                         updated_at = NOW()"#,
    )
    .bind(address)
    .bind(token)
    .bind(to_decimal(amount)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// available -> locked, capped at what is left. The transfer has already
/// been broadcast, so a shortfall never rejects the entry.
async fn lock(
    tx: &mut Transaction<'_, Postgres>,
    address: &str,
    token: &str,
    amount: Amount,
) -> Result<(), StoreError> {
    let available: Option<Decimal> = sqlx::query_scalar(
        r#"SELECT available FROM balances
           WHERE address = $1 AND token_address = $2
           FOR UPDATE"#,
    )
    .bind(address)
    .bind(token)
    .fetch_optional(&mut **tx)
    .await?;
    let available = available.map(from_decimal).transpose()?.unwrap_or(0);

    let held = amount.min(available);
    if held < amount {
        tracing::warn!(
            address,
            token,
            needed = %amount,
            available = %available,
            "Lock exceeds available balance, locking what is left"
        );
    }
    if held == 0 {
        return Ok(());
    }

    sqlx::query(
        r#"UPDATE balances
           SET available = available - $3, locked = locked + $3, updated_at = NOW()
           WHERE address = $1 AND token_address = $2"#,
    )
    .bind(address)
    .bind(token)
    .bind(to_decimal(held)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn settle(
    tx: &mut Transaction<'_, Postgres>,
    s: &OutboundSettlement,
) -> Result<(), StoreError> {
    let submitted = sqlx::query(
        r#"SELECT id, status, amount FROM transactions
           WHERE tx_hash = $1 AND tx_type <> $2 AND from_address = $3 AND token_address = $4
           LIMIT 1
           FOR UPDATE"#,
    )
    .bind(&s.tx_hash)
    .bind(TxType::Deposit.id())
    .bind(&s.from_address)
    .bind(&s.token_address)
    .fetch_optional(&mut **tx)
    .await?;

    match submitted {
        Some(row) => {
            let status: i16 = row.try_get("status")?;
            if status != TxStatus::Pending.id() {
                return Ok(());
            }
            let id: Uuid = row.try_get("id")?;
            let locked_amount: Decimal = row.try_get("amount")?;

            sqlx::query(
                r#"UPDATE transactions
                   SET status = $1, block_hash = $2, block_number = $3, fee = $4, timestamp = $5
                   WHERE id = $6"#,
            )
            .bind(TxStatus::Credited.id())
            .bind(&s.block_hash)
            .bind(s.block_number as i64)
            .bind(to_decimal(s.fee)?)
            .bind(s.timestamp)
            .bind(id)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r#"UPDATE balances
                   SET locked = GREATEST(locked - $3, 0), updated_at = NOW()
                   WHERE address = $1 AND token_address = $2"#,
            )
            .bind(&s.from_address)
            .bind(&s.token_address)
            .bind(locked_amount)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            if !insert_entry(tx, &s.to_entry()).await? {
                return Ok(());
            }
            sqlx::query(
                r#"UPDATE balances
                   SET available = GREATEST(available - $3, 0), updated_at = NOW()
                   WHERE address = $1 AND token_address = $2"#,
            )
            .bind(&s.from_address)
            .bind(&s.token_address)
            .bind(to_decimal(s.amount)?)
            .execute(&mut **tx)
            .await?;
        }
    }

    if s.credit_destination {
        credit(tx, &s.to_address, &s.token_address, s.amount).await?;
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn latest_watermark(&self) -> Result<Option<BlockWatermark>, StoreError> {
        let row = sqlx::query(
            "SELECT height, hash, parent_hash, timestamp FROM blocks ORDER BY height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<BlockWatermark, StoreError> {
            let height: i64 = r.try_get("height")?;
            Ok(BlockWatermark {
                hash: r.try_get("hash")?,
                parent_hash: r.try_get("parent_hash")?,
                height: height as Height,
                timestamp: r.try_get("timestamp")?,
            })
        })
        .transpose()
    }

    async fn find_address(&self, address: &str) -> Result<Option<Address>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_ref, address, role, signing_key_ref FROM addresses WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_address).transpose()
    }

    async fn address_by_role(&self, role: AddressRole) -> Result<Option<Address>, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, owner_ref, address, role, signing_key_ref FROM addresses
               WHERE role = $1 ORDER BY id LIMIT 1"#,
        )
        .bind(role.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_address).transpose()
    }

    async fn balances_at_least(
        &self,
        role: AddressRole,
        threshold: Amount,
    ) -> Result<Vec<Balance>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT b.address, b.token_address, b.available, b.locked
               FROM balances b JOIN addresses a ON a.address = b.address
               WHERE a.role = $1 AND b.available >= $2
               ORDER BY b.address, b.token_address"#,
        )
        .bind(role.id())
        .bind(to_decimal(threshold)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_balance).collect()
    }

    async fn balances_of(&self, address: &str) -> Result<Vec<Balance>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT address, token_address, available, locked FROM balances
               WHERE address = $1 ORDER BY token_address"#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_balance).collect()
    }

    async fn unsent_withdrawals(&self) -> Result<Vec<WithdrawRequest>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, to_address, token_address, amount, status, tx_hash
               FROM withdraw_requests WHERE status = $1 ORDER BY id"#,
        )
        .bind(WithdrawStatus::Unsent.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_withdraw).collect()
    }

    async fn pending_deposits_at_or_below(
        &self,
        height: Height,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE tx_type = $1 AND status = $2 AND block_number <= $3 \
             ORDER BY block_number",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(TxType::Deposit.id())
            .bind(TxStatus::Pending.id())
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn entries_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE tx_hash = $1 ORDER BY transfer_index",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(tx_hash)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn atomic_batch(&self, batch: &LedgerBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for mutation in batch.mutations() {
            Self::apply(&mut tx, mutation).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_withdraw_request(
        &self,
        to_address: &str,
        token_address: &str,
        amount: Amount,
    ) -> Result<WithdrawRequest, StoreError> {
        let row = sqlx::query(
            r#"INSERT INTO withdraw_requests (to_address, token_address, amount, status)
               VALUES ($1, $2, $3, $4)
               RETURNING id, to_address, token_address, amount, status, tx_hash"#,
        )
        .bind(to_address)
        .bind(token_address)
        .bind(to_decimal(amount)?)
        .bind(WithdrawStatus::Unsent.id())
        .fetch_one(&self.pool)
        .await?;
        row_to_withdraw(&row)
    }

    async fn advance_status(&self, entry_id: Uuid, status: TxStatus) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<i16> =
            sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1 FOR UPDATE")
                .bind(entry_id)
                .fetch_optional(&mut *tx)
                .await?;

        let current = current
            .and_then(TxStatus::from_id)
            .ok_or_else(|| StoreError::NotFound(format!("ledger entry {}", entry_id)))?;
        if !current.can_advance_to(status) {
            return Err(StoreError::StatusRegression {
                entry: entry_id.to_string(),
                from: current,
                to: status,
            });
        }

        sqlx::query("UPDATE transactions SET status = $1 WHERE id = $2")
            .bind(status.id())
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
