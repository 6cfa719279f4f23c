//! Database persistence for engine state.
//!
//! Stores everything needed to resume after restart:
//! - Registered strategies, their parameters and weights
//! - Emitted signals
//! - Positions with their opening and closing orders
//! - Closed trades
//! - Daily performance and account balance snapshots
//! - Rejection and error events
//!
//! Money, price and quantity columns hold decimal text so values round-trip
//! exactly.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::{EngineError, EngineResult};
use crate::models::{
    AccountBalanceSnapshot, DailyPerformance, Order, Position, Signal, StrategyKind,
    StrategyRecord, Trade,
};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub id: i64,
    pub instrument: String,
    pub side: String,
    pub entry_price: String,
    pub quantity: String,
    pub current_price: String,
    pub unrealized_pnl: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub status: String,
    pub strategy: String,
    pub signal_id: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Stored order record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredOrder {
    pub id: i64,
    pub position_id: i64,
    pub role: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
    pub filled_quantity: String,
    pub status: String,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored trade record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub position_id: i64,
    pub instrument: String,
    pub strategy: String,
    pub side: String,
    pub entry_price: String,
    pub exit_price: String,
    pub quantity: String,
    pub pnl: String,
    pub pnl_pct: String,
    pub holding_minutes: i64,
    pub exit_reason: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredStrategy {
    id: i64,
    name: String,
    kind: String,
    params: String,
    active: bool,
    weight: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredDailyPerformance {
    date: NaiveDate,
    starting_balance: String,
    ending_balance: String,
    realized_pnl: String,
    pnl_pct: String,
    total_trades: i64,
    winning_trades: i64,
    losing_trades: i64,
    paused: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredBalance {
    total_capital: String,
    available_capital: String,
    positions_value: String,
    unrealized_pnl: String,
    timestamp: DateTime<Utc>,
}

/// Persisted rejection or error.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub level: String,
    pub module: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// Private in-memory database. One connection, so every query sees the same data.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations()
            .await
            .context("Failed to run database migrations")?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT '{}',
                registration_order INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                weight REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy TEXT NOT NULL,
                instrument TEXT NOT NULL,
                direction TEXT NOT NULL,
                strength REAL NOT NULL,
                confidence REAL NOT NULL,
                entry_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                rationale TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                current_price TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL DEFAULT '0',
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                strategy TEXT NOT NULL,
                signal_id INTEGER,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (signal_id) REFERENCES signals(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                filled_quantity TEXT NOT NULL,
                status TEXT NOT NULL,
                external_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (position_id) REFERENCES positions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL UNIQUE,
                instrument TEXT NOT NULL,
                strategy TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                pnl TEXT NOT NULL,
                pnl_pct TEXT NOT NULL,
                holding_minutes INTEGER NOT NULL,
                exit_reason TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                FOREIGN KEY (position_id) REFERENCES positions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_performance (
                date TEXT PRIMARY KEY,
                starting_balance TEXT NOT NULL,
                ending_balance TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                pnl_pct TEXT NOT NULL,
                total_trades INTEGER NOT NULL DEFAULT 0,
                winning_trades INTEGER NOT NULL DEFAULT 0,
                losing_trades INTEGER NOT NULL DEFAULT 0,
                paused INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_balances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                total_capital TEXT NOT NULL,
                available_capital TEXT NOT NULL,
                positions_value TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,
                module TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Natural keys
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_open_instrument ON positions(instrument) WHERE status = 'OPEN'",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_close_once ON orders(position_id) WHERE role = 'CLOSE'",
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_instrument ON signals(instrument, created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_closed ON trades(closed_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_balances_time ON account_balances(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Strategies ====================

    /// Register a strategy or refresh its parameters. Returns its id.
    pub async fn upsert_strategy(
        &self,
        name: &str,
        kind: StrategyKind,
        params: &serde_json::Value,
        registration_order: usize,
    ) -> EngineResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO strategies (name, kind, params, registration_order)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                kind = excluded.kind,
                params = excluded.params,
                registration_order = excluded.registration_order,
                updated_at = datetime('now')
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(kind.as_str())
        .bind(params.to_string())
        .bind(registration_order as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// All strategies in registration order.
    pub async fn get_strategies(&self) -> EngineResult<Vec<StrategyRecord>> {
        let rows = sqlx::query_as::<_, StoredStrategy>(
            "SELECT id, name, kind, params, active, weight FROM strategies ORDER BY registration_order, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(StrategyRecord {
                    id: r.id,
                    kind: parse_enum("kind", &r.kind)?,
                    params: serde_json::from_str(&r.params).unwrap_or(serde_json::Value::Null),
                    name: r.name,
                    active: r.active,
                    weight: r.weight,
                })
            })
            .collect()
    }

    pub async fn set_strategy_weight(&self, name: &str, weight: f64) -> EngineResult<()> {
        sqlx::query("UPDATE strategies SET weight = ?, updated_at = datetime('now') WHERE name = ?")
            .bind(weight)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Signals ====================

    pub async fn insert_signal(&self, signal: &Signal) -> EngineResult<i64> {
        let metadata = serde_json::to_string(&signal.metadata).unwrap_or_else(|_| "{}".into());
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                strategy, instrument, direction, strength, confidence,
                entry_price, stop_loss, take_profit, rationale, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.strategy)
        .bind(&signal.instrument)
        .bind(signal.direction.as_str())
        .bind(signal.strength)
        .bind(signal.confidence)
        .bind(signal.entry_price.to_string())
        .bind(signal.stop_loss.to_string())
        .bind(signal.take_profit.to_string())
        .bind(&signal.rationale)
        .bind(metadata)
        .bind(signal.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn count_signals(&self, instrument: &str) -> EngineResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM signals WHERE instrument = ?")
            .bind(instrument)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ==================== Positions ====================

    /// Persist a new OPEN position and its opening order atomically.
    ///
    /// A second OPEN position for the same instrument is a `DataConflict`.
    pub async fn insert_position(&self, position: &Position, order: &Order) -> EngineResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO positions (
                instrument, side, entry_price, quantity, current_price, unrealized_pnl,
                stop_loss, take_profit, status, strategy, signal_id, opened_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.current_price.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.stop_loss.to_string())
        .bind(position.take_profit.to_string())
        .bind(position.status.as_str())
        .bind(&position.strategy)
        .bind(position.signal_id)
        .bind(position.opened_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_store(e, || format!("open position exists for {}", position.instrument)))?;

        let position_id = result.last_insert_rowid();
        insert_order(&mut tx, position_id, order).await?;
        tx.commit().await?;

        Ok(position_id)
    }

    /// Mark price, unrealized P&L and (possibly ratcheted) stop.
    pub async fn update_position_mark(&self, position: &Position) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                current_price = ?,
                unrealized_pnl = ?,
                stop_loss = ?,
                updated_at = datetime('now')
            WHERE id = ? AND status = 'OPEN'
            "#,
        )
        .bind(position.current_price.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.stop_loss.to_string())
        .bind(position.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close a position: status, closing order and trade in one transaction.
    ///
    /// Returns false without writing anything when the position is not OPEN.
    pub async fn close_position(&self, trade: &Trade, order: &Order) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE positions SET
                status = 'CLOSED',
                current_price = ?,
                unrealized_pnl = '0',
                closed_at = ?,
                updated_at = datetime('now')
            WHERE id = ? AND status = 'OPEN'
            "#,
        )
        .bind(trade.exit_price.to_string())
        .bind(trade.closed_at)
        .bind(trade.position_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_order(&mut tx, trade.position_id, order).await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades (
                position_id, instrument, strategy, side, entry_price, exit_price, quantity,
                pnl, pnl_pct, holding_minutes, exit_reason, opened_at, closed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.position_id)
        .bind(&trade.instrument)
        .bind(&trade.strategy)
        .bind(trade.side.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.pnl_pct.to_string())
        .bind(trade.holding_minutes)
        .bind(trade.exit_reason.as_str())
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_open_positions(&self) -> EngineResult<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            r#"
            SELECT id, instrument, side, entry_price, quantity, current_price, unrealized_pnl,
                   stop_loss, take_profit, status, strategy, signal_id, opened_at, closed_at
            FROM positions WHERE status = 'OPEN' ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Position::try_from).collect()
    }

    pub async fn get_position(&self, id: i64) -> EngineResult<Option<Position>> {
        let row = sqlx::query_as::<_, StoredPosition>(
            r#"
            SELECT id, instrument, side, entry_price, quantity, current_price, unrealized_pnl,
                   stop_loss, take_profit, status, strategy, signal_id, opened_at, closed_at
            FROM positions WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Position::try_from).transpose()
    }

    pub async fn get_orders(&self, position_id: i64) -> EngineResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, StoredOrder>(
            r#"
            SELECT id, position_id, role, side, price, quantity, filled_quantity, status,
                   external_id, created_at
            FROM orders WHERE position_id = ? ORDER BY id
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    // ==================== Trades ====================

    /// Trades closed at or after `since`, oldest first.
    pub async fn get_trades_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT position_id, instrument, strategy, side, entry_price, exit_price, quantity,
                   pnl, pnl_pct, holding_minutes, exit_reason, opened_at, closed_at
            FROM trades WHERE closed_at >= ? ORDER BY closed_at, id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trade::try_from).collect()
    }

    pub async fn count_trades(&self, position_id: i64) -> EngineResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades WHERE position_id = ?")
            .bind(position_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ==================== Daily Performance ====================

    pub async fn upsert_daily_performance(&self, perf: &DailyPerformance) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_performance (
                date, starting_balance, ending_balance, realized_pnl, pnl_pct,
                total_trades, winning_trades, losing_trades, paused
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                ending_balance = excluded.ending_balance,
                realized_pnl = excluded.realized_pnl,
                pnl_pct = excluded.pnl_pct,
                total_trades = excluded.total_trades,
                winning_trades = excluded.winning_trades,
                losing_trades = excluded.losing_trades,
                paused = excluded.paused,
                updated_at = datetime('now')
            "#,
        )
        .bind(perf.date)
        .bind(perf.starting_balance.to_string())
        .bind(perf.ending_balance.to_string())
        .bind(perf.realized_pnl.to_string())
        .bind(perf.pnl_pct.to_string())
        .bind(perf.total_trades)
        .bind(perf.winning_trades)
        .bind(perf.losing_trades)
        .bind(perf.paused)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_daily_performance(&self, date: NaiveDate) -> EngineResult<Option<DailyPerformance>> {
        let row = sqlx::query_as::<_, StoredDailyPerformance>(
            r#"
            SELECT date, starting_balance, ending_balance, realized_pnl, pnl_pct,
                   total_trades, winning_trades, losing_trades, paused
            FROM daily_performance WHERE date = ?
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(DailyPerformance {
                date: r.date,
                starting_balance: parse_decimal("starting_balance", &r.starting_balance)?,
                ending_balance: parse_decimal("ending_balance", &r.ending_balance)?,
                realized_pnl: parse_decimal("realized_pnl", &r.realized_pnl)?,
                pnl_pct: parse_decimal("pnl_pct", &r.pnl_pct)?,
                total_trades: r.total_trades,
                winning_trades: r.winning_trades,
                losing_trades: r.losing_trades,
                paused: r.paused,
            })
        })
        .transpose()
    }

    // ==================== Account Balances ====================

    pub async fn insert_balance_snapshot(&self, snapshot: &AccountBalanceSnapshot) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_balances (
                total_capital, available_capital, positions_value, unrealized_pnl, timestamp
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.total_capital.to_string())
        .bind(snapshot.available_capital.to_string())
        .bind(snapshot.positions_value.to_string())
        .bind(snapshot.unrealized_pnl.to_string())
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_latest_balance(&self) -> EngineResult<Option<AccountBalanceSnapshot>> {
        let row = sqlx::query_as::<_, StoredBalance>(
            r#"
            SELECT total_capital, available_capital, positions_value, unrealized_pnl, timestamp
            FROM account_balances ORDER BY timestamp DESC, id DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(AccountBalanceSnapshot {
                total_capital: parse_decimal("total_capital", &r.total_capital)?,
                available_capital: parse_decimal("available_capital", &r.available_capital)?,
                positions_value: parse_decimal("positions_value", &r.positions_value)?,
                unrealized_pnl: parse_decimal("unrealized_pnl", &r.unrealized_pnl)?,
                timestamp: r.timestamp,
            })
        })
        .transpose()
    }

    // ==================== Event Log ====================

    pub async fn log_event(&self, level: &str, module: &str, message: &str) -> EngineResult<()> {
        sqlx::query("INSERT INTO event_log (level, module, message, created_at) VALUES (?, ?, ?, ?)")
            .bind(level)
            .bind(module)
            .bind(message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_recent_events(&self, limit: i64) -> EngineResult<Vec<EventRecord>> {
        let rows = sqlx::query_as::<_, EventRecord>(
            "SELECT id, level, module, message, created_at FROM event_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn insert_order(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    position_id: i64,
    order: &Order,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            position_id, role, side, price, quantity, filled_quantity, status, external_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(position_id)
    .bind(order.role.as_str())
    .bind(order.side.as_str())
    .bind(order.price.to_string())
    .bind(order.quantity.to_string())
    .bind(order.filled_quantity.to_string())
    .bind(order.status.as_str())
    .bind(&order.external_id)
    .bind(order.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| conflict_or_store(e, || format!("{} order exists for position {}", order.role.as_str(), position_id)))?;

    Ok(())
}

fn conflict_or_store(e: sqlx::Error, what: impl FnOnce() -> String) -> EngineError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return EngineError::DataConflict(what());
        }
    }
    EngineError::Store(e)
}

fn decode_error(column: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::Store(sqlx::Error::Decode(
        format!("column {}: {}", column, detail).into(),
    ))
}

fn parse_decimal(column: &str, value: &str) -> EngineResult<Decimal> {
    Decimal::from_str(value).map_err(|e| decode_error(column, e))
}

fn parse_enum<T: FromStr<Err = String>>(column: &str, value: &str) -> EngineResult<T> {
    value.parse().map_err(|e: String| decode_error(column, e))
}

impl TryFrom<StoredPosition> for Position {
    type Error = EngineError;

    fn try_from(r: StoredPosition) -> EngineResult<Self> {
        Ok(Position {
            id: r.id,
            side: parse_enum("side", &r.side)?,
            entry_price: parse_decimal("entry_price", &r.entry_price)?,
            quantity: parse_decimal("quantity", &r.quantity)?,
            current_price: parse_decimal("current_price", &r.current_price)?,
            unrealized_pnl: parse_decimal("unrealized_pnl", &r.unrealized_pnl)?,
            stop_loss: parse_decimal("stop_loss", &r.stop_loss)?,
            take_profit: parse_decimal("take_profit", &r.take_profit)?,
            status: parse_enum("status", &r.status)?,
            instrument: r.instrument,
            strategy: r.strategy,
            signal_id: r.signal_id,
            opened_at: r.opened_at,
            closed_at: r.closed_at,
        })
    }
}

impl TryFrom<StoredOrder> for Order {
    type Error = EngineError;

    fn try_from(r: StoredOrder) -> EngineResult<Self> {
        Ok(Order {
            position_id: r.position_id,
            role: parse_enum("role", &r.role)?,
            side: parse_enum("side", &r.side)?,
            price: parse_decimal("price", &r.price)?,
            quantity: parse_decimal("quantity", &r.quantity)?,
            filled_quantity: parse_decimal("filled_quantity", &r.filled_quantity)?,
            status: parse_enum("status", &r.status)?,
            external_id: r.external_id,
            created_at: r.created_at,
        })
    }
}

impl TryFrom<StoredTrade> for Trade {
    type Error = EngineError;

    fn try_from(r: StoredTrade) -> EngineResult<Self> {
        Ok(Trade {
            position_id: r.position_id,
            side: parse_enum("side", &r.side)?,
            entry_price: parse_decimal("entry_price", &r.entry_price)?,
            exit_price: parse_decimal("exit_price", &r.exit_price)?,
            quantity: parse_decimal("quantity", &r.quantity)?,
            pnl: parse_decimal("pnl", &r.pnl)?,
            pnl_pct: parse_decimal("pnl_pct", &r.pnl_pct)?,
            exit_reason: parse_enum("exit_reason", &r.exit_reason)?,
            holding_minutes: r.holding_minutes,
            instrument: r.instrument,
            strategy: r.strategy,
            opened_at: r.opened_at,
            closed_at: r.closed_at,
        })
    }
}
