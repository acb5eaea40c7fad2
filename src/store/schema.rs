use sqlx::PgPool;

pub const CREATE_ADDRESSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    id              BIGSERIAL PRIMARY KEY,
    owner_ref       TEXT NOT NULL,
    address         TEXT NOT NULL UNIQUE,
    role            SMALLINT NOT NULL,
    signing_key_ref TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

/// At most one hot and one cold address
pub const CREATE_CUSTODY_ROLE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS addresses_custody_role_uq
    ON addresses (role) WHERE role IN (1, 2)"#;

pub const CREATE_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    address       TEXT NOT NULL,
    token_address TEXT NOT NULL,
    available     NUMERIC(78, 0) NOT NULL DEFAULT 0 CHECK (available >= 0),
    locked        NUMERIC(78, 0) NOT NULL DEFAULT 0 CHECK (locked >= 0),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (address, token_address)
)"#;

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    height      BIGINT PRIMARY KEY,
    hash        TEXT NOT NULL,
    parent_hash TEXT NOT NULL,
    timestamp   BIGINT NOT NULL
)"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id             UUID PRIMARY KEY,
    block_hash     TEXT NOT NULL DEFAULT '',
    block_number   BIGINT,
    tx_hash        TEXT NOT NULL,
    transfer_index INTEGER NOT NULL DEFAULT 0,
    from_address   TEXT NOT NULL,
    to_address     TEXT NOT NULL,
    token_address  TEXT NOT NULL,
    fee            NUMERIC(78, 0) NOT NULL DEFAULT 0,
    amount         NUMERIC(78, 0) NOT NULL,
    status         SMALLINT NOT NULL,
    tx_type        SMALLINT NOT NULL,
    timestamp      BIGINT NOT NULL,
    UNIQUE (tx_hash, transfer_index)
)"#;

pub const CREATE_TRANSACTIONS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS transactions_status_idx
    ON transactions (tx_type, status, block_number)"#;

pub const CREATE_WITHDRAW_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS withdraw_requests (
    id            BIGSERIAL PRIMARY KEY,
    to_address    TEXT NOT NULL,
    token_address TEXT NOT NULL,
    amount        NUMERIC(78, 0) NOT NULL CHECK (amount > 0),
    status        SMALLINT NOT NULL DEFAULT 0,
    tx_hash       TEXT,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const STATEMENTS: &[(&str, &str)] = &[
    ("addresses", CREATE_ADDRESSES_TABLE),
    ("addresses_custody_role_uq", CREATE_CUSTODY_ROLE_INDEX),
    ("balances", CREATE_BALANCES_TABLE),
    ("blocks", CREATE_BLOCKS_TABLE),
    ("transactions", CREATE_TRANSACTIONS_TABLE),
    ("transactions_status_idx", CREATE_TRANSACTIONS_STATUS_INDEX),
    ("withdraw_requests", CREATE_WITHDRAW_REQUESTS_TABLE),
];

/// Create the ledger tables if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            tracing::error!(object = name, error = %e, "Failed to create schema object");
            e
        })?;
    }

    tracing::info!("Ledger schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_statement_is_idempotent() {
        for (name, ddl) in STATEMENTS {
            assert!(ddl.contains("IF NOT EXISTS"), "{} must be re-runnable", name);
        }
    }

    #[test]
    fn test_transfer_identity_is_unique() {
        assert!(CREATE_TRANSACTIONS_TABLE.contains("UNIQUE (tx_hash, transfer_index)"));
    }
}
