//! Ledger schema

use sqlx::SqlitePool;

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 2;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        idempotency_key   TEXT PRIMARY KEY NOT NULL,
        external_order_id TEXT,
        market_id         TEXT NOT NULL,
        token_id          TEXT NOT NULL,
        direction         TEXT NOT NULL CHECK (direction IN ('buy', 'sell')),
        price             TEXT NOT NULL,
        size              TEXT NOT NULL,
        status            TEXT NOT NULL
            CHECK (status IN ('created', 'submitted', 'filled', 'failed', 'cancelled')),
        error_message     TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL,
        filled_at         TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_market ON orders (market_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status)",
    r#"
    CREATE TABLE IF NOT EXISTS trades (
        id           TEXT PRIMARY KEY NOT NULL,
        market_id    TEXT NOT NULL,
        token_id     TEXT NOT NULL,
        side         TEXT NOT NULL CHECK (side IN ('yes', 'no')),
        entry_price  TEXT NOT NULL,
        exit_price   TEXT,
        size_usd     TEXT NOT NULL,
        shares       TEXT NOT NULL,
        status       TEXT NOT NULL
            CHECK (status IN ('pending', 'open', 'closed', 'cancelled', 'unknown')),
        pnl          TEXT,
        exit_reason  TEXT,
        note         TEXT,
        order_key    TEXT,
        entry_time   TEXT NOT NULL,
        exit_time    TEXT,
        created_at   TEXT NOT NULL,
        updated_at   TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_trades_status ON trades (status)",
    "CREATE INDEX IF NOT EXISTS idx_trades_market ON trades (market_id)",
    r#"
    CREATE TABLE IF NOT EXISTS run_snapshots (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp            TEXT NOT NULL,
        balance              TEXT NOT NULL,
        total_exposure       TEXT NOT NULL,
        open_positions_count INTEGER NOT NULL,
        open_orders_count    INTEGER NOT NULL
    )
    "#,
];

/// Version 2: rejection code kept with failed orders
const MIGRATE_V2: &[&str] = &["ALTER TABLE orders ADD COLUMN failure_reason TEXT"];

/// Create tables and indexes if they do not exist, then migrate
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let version = get_schema_version(pool).await?;
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    if version < 2 {
        for statement in MIGRATE_V2 {
            sqlx::query(statement).execute(pool).await?;
        }
    }
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let version: (i64,) = sqlx::query_as("PRAGMA user_version").fetch_one(pool).await?;
    Ok(version.0)
}
