//! Ledger store
//!
//! Durable record of order attempts, trades and run snapshots in SQLite.
//! Every logical operation is a single statement or a single transaction,
//! and order status changes are forward-only at the SQL level: an update
//! that matches no row in an allowed predecessor state is an error.

mod models;
mod schema;

pub use models::{
    NewOrder, NewTrade, OrderDirection, OrderStatus, OrderTrackingRecord, RunSnapshot, TradeRecord, TradeStatus,
};
pub use schema::{get_schema_version, initialize_schema, SCHEMA_VERSION};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::strategy::{ExitReason, Side};

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An order with this idempotency key already exists
    #[error("Duplicate idempotency key: {0}")]
    DuplicateKey(String),

    /// The record is not in a state that allows this transition
    #[error("Invalid transition for {id}: cannot move to {to}")]
    InvalidTransition { id: String, to: &'static str },

    #[error("Record not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded
    #[error("Corrupt ledger value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// SQLite-backed ledger
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (creating if missing) the ledger at a `sqlite://` URL
    pub async fn open(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }

        info!(url = %url, "Opening ledger");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        schema::initialize_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory ledger
    ///
    /// Pinned to one connection that never expires; every new SQLite
    /// connection to `:memory:` is a separate empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        schema::initialize_schema(&pool).await?;
        debug!("In-memory ledger initialized");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ==================== ORDERS ====================

    /// Look up an order attempt by idempotency key
    pub async fn get_order(&self, key: &str) -> Result<Option<OrderTrackingRecord>> {
        let row = sqlx::query("SELECT * FROM orders WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    /// Record a new attempt in `created` status
    ///
    /// Fails with [`LedgerError::DuplicateKey`] when the key is already known.
    pub async fn insert_created(&self, order: &NewOrder) -> Result<OrderTrackingRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                idempotency_key, market_id, token_id, direction, price, size,
                status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'created', ?, ?)
            "#,
        )
        .bind(&order.idempotency_key)
        .bind(&order.market_id)
        .bind(&order.token_id)
        .bind(order.direction.as_str())
        .bind(order.price.to_string())
        .bind(order.size.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(LedgerError::DuplicateKey(order.idempotency_key.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(OrderTrackingRecord {
            idempotency_key: order.idempotency_key.clone(),
            external_order_id: None,
            market_id: order.market_id.clone(),
            token_id: order.token_id.clone(),
            direction: order.direction,
            price: order.price,
            size: order.size,
            status: OrderStatus::Created,
            error_message: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
        })
    }

    /// `created -> submitted`
    pub async fn mark_submitted(&self, key: &str, external_order_id: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'submitted',
                external_order_id = COALESCE(?, external_order_id),
                updated_at = ?
            WHERE idempotency_key = ? AND status = 'created'
            "#,
        )
        .bind(external_order_id)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(&self.pool)
        .await?;

        ensure_transition(result.rows_affected(), key, OrderStatus::Submitted.as_str())
    }

    /// `created | submitted -> filled`, plus the opening trade for buys
    ///
    /// Both writes happen in one transaction.
    pub async fn record_fill(
        &self,
        key: &str,
        external_order_id: Option<&str>,
        trade: Option<&NewTrade>,
    ) -> Result<Option<TradeRecord>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'filled',
                external_order_id = COALESCE(?, external_order_id),
                updated_at = ?,
                filled_at = ?
            WHERE idempotency_key = ? AND status IN ('created', 'submitted')
            "#,
        )
        .bind(external_order_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(key)
        .execute(&mut *tx)
        .await?;
        ensure_transition(result.rows_affected(), key, OrderStatus::Filled.as_str())?;

        let record = match trade {
            Some(trade) => {
                let record = new_trade_record(trade, now);
                insert_trade_query(&record).execute(&mut *tx).await?;
                Some(record)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(record)
    }

    /// `created | submitted -> failed`
    ///
    /// `reason` is the caller's rejection code, returned again on replay.
    pub async fn mark_failed(&self, key: &str, error: &str, reason: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'failed', error_message = ?, failure_reason = ?, updated_at = ?
            WHERE idempotency_key = ? AND status IN ('created', 'submitted')
            "#,
        )
        .bind(error)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(&self.pool)
        .await?;

        ensure_transition(result.rows_affected(), key, OrderStatus::Failed.as_str())
    }

    /// Most recent order attempts, newest first
    pub async fn recent_orders(&self, limit: i64) -> Result<Vec<OrderTrackingRecord>> {
        let rows = sqlx::query("SELECT * FROM orders ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    pub async fn order_status_counts(&self) -> Result<Vec<(OrderStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(status, count)| -> Result<(OrderStatus, i64)> { Ok((parse_enum("status", &status)?, count)) })
            .collect()
    }

    // ==================== TRADES ====================

    /// Insert a trade outside of an order fill (reconciliation, manual entry)
    pub async fn insert_trade(&self, trade: &NewTrade) -> Result<TradeRecord> {
        let record = new_trade_record(trade, Utc::now());
        insert_trade_query(&record).execute(&self.pool).await?;
        debug!(trade_id = %record.id, market_id = %record.market_id, status = %record.status, "Trade recorded");
        Ok(record)
    }

    pub async fn get_trade(&self, id: &str) -> Result<Option<TradeRecord>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(trade_from_row).transpose()
    }

    /// Trades the bot considers live: `pending` or `open`
    pub async fn open_trades(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status IN ('pending', 'open') ORDER BY entry_time ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(trade_from_row).collect()
    }

    /// `(market, side)` pairs whose trade was closed by market resolution
    ///
    /// The venue keeps reporting these positions until they are redeemed.
    pub async fn resolved_positions(&self) -> Result<Vec<(String, Side)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT market_id, side FROM trades WHERE status = 'closed' AND exit_reason = 'resolution'",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(market_id, side)| -> Result<(String, Side)> { Ok((market_id, parse_enum("side", &side)?)) })
            .collect()
    }

    pub async fn trades_by_status(&self, status: TradeStatus) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = ? ORDER BY entry_time ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(trade_from_row).collect()
    }

    /// `pending -> open`
    pub async fn mark_trade_open(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE trades SET status = 'open', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_transition(result.rows_affected(), id, TradeStatus::Open.as_str())
    }

    /// `pending | open -> unknown`; never reversed automatically
    pub async fn mark_trade_unknown(&self, id: &str, note: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET status = 'unknown', note = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'open')
            "#,
        )
        .bind(note)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_transition(result.rows_affected(), id, TradeStatus::Unknown.as_str())
    }

    /// `pending | open -> closed`
    pub async fn close_trade(
        &self,
        id: &str,
        exit_price: Decimal,
        reason: ExitReason,
        pnl: Decimal,
        exit_time: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = 'closed', exit_price = ?, exit_reason = ?, pnl = ?,
                exit_time = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'open')
            "#,
        )
        .bind(exit_price.to_string())
        .bind(reason.as_str())
        .bind(pnl.to_string())
        .bind(exit_time.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_transition(result.rows_affected(), id, TradeStatus::Closed.as_str())?;
        info!(trade_id = %id, reason = %reason, %exit_price, %pnl, "Trade closed");
        Ok(())
    }

    pub async fn trade_status_counts(&self) -> Result<Vec<(TradeStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM trades GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(status, count)| -> Result<(TradeStatus, i64)> { Ok((parse_enum("status", &status)?, count)) })
            .collect()
    }

    /// Sum of realized PnL over closed trades
    pub async fn realized_pnl(&self) -> Result<Decimal> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT pnl FROM trades WHERE status = 'closed' AND pnl IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .try_fold(Decimal::ZERO, |acc, (pnl,)| -> Result<Decimal> { Ok(acc + parse_decimal("pnl", pnl)?) })
    }

    // ==================== SNAPSHOTS ====================

    pub async fn append_snapshot(&self, snapshot: &RunSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_snapshots (
                timestamp, balance, total_exposure, open_positions_count, open_orders_count
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(snapshot.balance.to_string())
        .bind(snapshot.total_exposure.to_string())
        .bind(snapshot.open_positions_count)
        .bind(snapshot.open_orders_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_snapshot(&self) -> Result<Option<RunSnapshot>> {
        let row = sqlx::query("SELECT * FROM run_snapshots ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<RunSnapshot> {
            Ok(RunSnapshot {
                timestamp: parse_time("timestamp", &row.try_get::<String, _>("timestamp")?)?,
                balance: parse_decimal("balance", &row.try_get::<String, _>("balance")?)?,
                total_exposure: parse_decimal("total_exposure", &row.try_get::<String, _>("total_exposure")?)?,
                open_positions_count: row.try_get("open_positions_count")?,
                open_orders_count: row.try_get("open_orders_count")?,
            })
        })
        .transpose()
    }

    pub async fn snapshot_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM run_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn ensure_transition(rows_affected: u64, id: &str, to: &'static str) -> Result<()> {
    if rows_affected == 0 {
        return Err(LedgerError::InvalidTransition { id: id.to_string(), to });
    }
    Ok(())
}

fn new_trade_record(trade: &NewTrade, now: DateTime<Utc>) -> TradeRecord {
    TradeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        market_id: trade.market_id.clone(),
        token_id: trade.token_id.clone(),
        side: trade.side,
        entry_price: trade.entry_price,
        exit_price: None,
        size_usd: trade.size_usd,
        shares: trade.shares,
        status: trade.status,
        pnl: None,
        exit_reason: None,
        note: trade.note.clone(),
        order_key: trade.order_key.clone(),
        entry_time: trade.entry_time,
        exit_time: None,
        created_at: now,
        updated_at: now,
    }
}

fn insert_trade_query(
    record: &TradeRecord,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO trades (
            id, market_id, token_id, side, entry_price, size_usd, shares, status,
            note, order_key, entry_time, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.market_id)
    .bind(&record.token_id)
    .bind(record.side.as_str())
    .bind(record.entry_price.to_string())
    .bind(record.size_usd.to_string())
    .bind(record.shares.to_string())
    .bind(record.status.as_str())
    .bind(&record.note)
    .bind(&record.order_key)
    .bind(record.entry_time.to_rfc3339())
    .bind(record.created_at.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
}

fn order_from_row(row: &SqliteRow) -> Result<OrderTrackingRecord> {
    Ok(OrderTrackingRecord {
        idempotency_key: row.try_get("idempotency_key")?,
        external_order_id: row.try_get("external_order_id")?,
        market_id: row.try_get("market_id")?,
        token_id: row.try_get("token_id")?,
        direction: parse_enum("direction", &row.try_get::<String, _>("direction")?)?,
        price: parse_decimal("price", &row.try_get::<String, _>("price")?)?,
        size: parse_decimal("size", &row.try_get::<String, _>("size")?)?,
        status: parse_enum("status", &row.try_get::<String, _>("status")?)?,
        error_message: row.try_get("error_message")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: parse_time("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time("updated_at", &row.try_get::<String, _>("updated_at")?)?,
        filled_at: opt(row.try_get::<Option<String>, _>("filled_at")?, |v| parse_time("filled_at", v))?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        token_id: row.try_get("token_id")?,
        side: parse_enum::<Side>("side", &row.try_get::<String, _>("side")?)?,
        entry_price: parse_decimal("entry_price", &row.try_get::<String, _>("entry_price")?)?,
        exit_price: opt(row.try_get::<Option<String>, _>("exit_price")?, |v| parse_decimal("exit_price", v))?,
        size_usd: parse_decimal("size_usd", &row.try_get::<String, _>("size_usd")?)?,
        shares: parse_decimal("shares", &row.try_get::<String, _>("shares")?)?,
        status: parse_enum("status", &row.try_get::<String, _>("status")?)?,
        pnl: opt(row.try_get::<Option<String>, _>("pnl")?, |v| parse_decimal("pnl", v))?,
        exit_reason: opt(row.try_get::<Option<String>, _>("exit_reason")?, |v| {
            parse_enum::<ExitReason>("exit_reason", v)
        })?,
        note: row.try_get("note")?,
        order_key: row.try_get("order_key")?,
        entry_time: parse_time("entry_time", &row.try_get::<String, _>("entry_time")?)?,
        exit_time: opt(row.try_get::<Option<String>, _>("exit_time")?, |v| parse_time("exit_time", v))?,
        created_at: parse_time("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

fn opt<T>(value: Option<String>, parse: impl Fn(&str) -> Result<T>) -> Result<Option<T>> {
    value.as_deref().map(parse).transpose()
}

fn parse_decimal(column: &'static str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|_| LedgerError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| LedgerError::Corrupt {
            column,
            value: value.to_string(),
        })
}

fn parse_enum<T: FromStr>(column: &'static str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| LedgerError::Corrupt {
        column,
        value: value.to_string(),
    })
}
