//! SQLite shared store
//!
//! One database file shared by every worker process. WAL mode plus a busy
//! timeout lets several processes write to it; the lock and reservation
//! tables give cross-process mutual exclusion with owner tokens and expiry.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::types::Direction;
use crate::data::store::{SharedStore, TradeRecord};

const LOCKS: &str = "locks";
const RESERVATIONS: &str = "reservations";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`. `:memory:` gives a private
    /// database, useful in tests.
    pub fn open(path: &str, busy_timeout_ms: u64) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening store {}", path))?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reservations (
                key TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cooldowns (
                key TEXT PRIMARY KEY,
                last_trade_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                asset TEXT NOT NULL,
                direction TEXT NOT NULL,
                strategy TEXT NOT NULL,
                ticket INTEGER NOT NULL,
                volume TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                time_exit_minutes INTEGER NOT NULL,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER,
                profit TEXT,
                metadata TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS peaks (
                trade_id TEXT PRIMARY KEY,
                peak_profit TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_asset_open ON trades(asset, closed_at);
            CREATE INDEX IF NOT EXISTS idx_trades_opened ON trades(opened_at);",
        )
        .context("creating store schema")?;

        info!(path = %path, "shared store ready");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` against the connection on the blocking pool. A busy database
    /// can stall for the whole busy timeout, which must not pin a runtime
    /// worker thread.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| anyhow!("store connection poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("store task failed")?
    }

    async fn claim(&self, table: &'static str, key: &str, owner: &str, ttl_secs: u64) -> Result<bool> {
        let (key, owner) = (key.to_string(), owner.to_string());
        self.blocking(move |conn| {
            let now = Utc::now().timestamp_millis();
            let expires = now + (ttl_secs as i64) * 1000;
            let sql = format!(
                "INSERT INTO {t} (key, owner, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
                 WHERE {t}.expires_at <= ?4",
                t = table
            );
            let changed = conn.execute(&sql, params![key, owner, expires, now])?;
            debug!(table, key = %key, owner = %owner, acquired = changed == 1, "claim");
            Ok(changed == 1)
        })
        .await
    }

    async fn unclaim(&self, table: &'static str, key: &str, owner: &str) -> Result<bool> {
        let (key, owner) = (key.to_string(), owner.to_string());
        self.blocking(move |conn| {
            let sql = format!("DELETE FROM {} WHERE key = ?1 AND owner = ?2", table);
            let changed = conn.execute(&sql, params![key, owner])?;
            Ok(changed == 1)
        })
        .await
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn sql_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn sql_decimal_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => sql_decimal(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Raw row before timestamp / JSON conversion
struct TradeRow {
    record: TradeRecord,
    opened_ms: i64,
    closed_ms: Option<i64>,
    metadata: String,
}

const TRADE_COLUMNS: &str = "t.trade_id, t.platform, t.asset, t.direction, t.strategy, t.ticket,
     t.volume, t.entry_price, t.stop_loss, t.take_profit, t.time_exit_minutes,
     t.opened_at, t.closed_at, t.profit, COALESCE(p.peak_profit, '0'), t.metadata";

fn read_trade_row(row: &Row<'_>) -> rusqlite::Result<TradeRow> {
    let direction_raw: String = row.get(3)?;
    let direction = Direction::parse(&direction_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown direction {}", direction_raw).into(),
        )
    })?;
    Ok(TradeRow {
        record: TradeRecord {
            trade_id: row.get(0)?,
            platform: row.get(1)?,
            asset: row.get(2)?,
            direction,
            strategy: row.get(4)?,
            ticket: row.get::<_, i64>(5)? as u64,
            volume: sql_decimal(row, 6)?,
            entry_price: sql_decimal(row, 7)?,
            stop_loss: sql_decimal(row, 8)?,
            take_profit: sql_decimal(row, 9)?,
            time_exit_minutes: row.get(10)?,
            opened_at: DateTime::<Utc>::MIN_UTC,
            closed_at: None,
            profit: sql_decimal_opt(row, 13)?,
            peak_profit: sql_decimal(row, 14)?,
            metadata: serde_json::Value::Null,
        },
        opened_ms: row.get(11)?,
        closed_ms: row.get(12)?,
        metadata: row.get(15)?,
    })
}

impl TradeRow {
    fn into_record(self) -> Result<TradeRecord> {
        let mut record = self.record;
        record.opened_at = millis_to_utc(self.opened_ms)?;
        record.closed_at = self.closed_ms.map(millis_to_utc).transpose()?;
        record.metadata = serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null);
        Ok(record)
    }
}

#[async_trait]
impl SharedStore for SqliteStore {
    async fn acquire_lock(&self, key: &str, owner: &str, ttl_secs: u64) -> Result<bool> {
        self.claim(LOCKS, key, owner, ttl_secs).await
    }

    async fn release_lock(&self, key: &str, owner: &str) -> Result<bool> {
        self.unclaim(LOCKS, key, owner).await
    }

    async fn reserve_resource(&self, key: &str, owner: &str, ttl_secs: u64) -> Result<bool> {
        self.claim(RESERVATIONS, key, owner, ttl_secs).await
    }

    async fn release_resource(&self, key: &str, owner: &str) -> Result<bool> {
        self.unclaim(RESERVATIONS, key, owner).await
    }

    async fn cooldown(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let key = key.to_string();
        let ms: Option<i64> = self
            .blocking(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT last_trade_at FROM cooldowns WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        ms.map(millis_to_utc).transpose()
    }

    async fn set_cooldown(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO cooldowns (key, last_trade_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET last_trade_at = excluded.last_trade_at",
                params![key, at.timestamp_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_cooldown(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM cooldowns WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn prune_cooldowns(&self, before: DateTime<Utc>) -> Result<usize> {
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM cooldowns WHERE last_trade_at < ?1",
                params![before.timestamp_millis()],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        let metadata = serde_json::to_string(&trade.metadata)?;
        let trade = trade.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT INTO trades (trade_id, platform, asset, direction, strategy, ticket, volume,
                                     entry_price, stop_loss, take_profit, time_exit_minutes,
                                     opened_at, closed_at, profit, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(trade_id) DO NOTHING",
                params![
                    trade.trade_id,
                    trade.platform,
                    trade.asset,
                    trade.direction.as_str(),
                    trade.strategy,
                    trade.ticket as i64,
                    trade.volume.to_string(),
                    trade.entry_price.to_string(),
                    trade.stop_loss.to_string(),
                    trade.take_profit.to_string(),
                    trade.time_exit_minutes,
                    trade.opened_at.timestamp_millis(),
                    trade.closed_at.map(|t| t.timestamp_millis()),
                    trade.profit.map(|p| p.to_string()),
                    metadata,
                ],
            )?;
            if inserted == 0 {
                bail!("trade {} already recorded", trade.trade_id);
            }
            // A new trade never inherits a peak row left under its id
            if trade.peak_profit > Decimal::ZERO {
                tx.execute(
                    "INSERT INTO peaks (trade_id, peak_profit, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(trade_id) DO UPDATE SET peak_profit = excluded.peak_profit,
                                                         updated_at = excluded.updated_at",
                    params![trade.trade_id, trade.peak_profit.to_string(), Utc::now().timestamp_millis()],
                )?;
            } else {
                tx.execute("DELETE FROM peaks WHERE trade_id = ?1", params![trade.trade_id])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn mark_trade_closed(
        &self,
        trade_id: &str,
        profit: Option<Decimal>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let trade_id = trade_id.to_string();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE trades SET closed_at = ?1, profit = ?2 WHERE trade_id = ?3 AND closed_at IS NULL",
                params![closed_at.timestamp_millis(), profit.map(|p| p.to_string()), trade_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn open_trades(&self, asset: Option<&str>) -> Result<Vec<TradeRecord>> {
        let asset = asset.map(str::to_string);
        let rows = self
            .blocking(move |conn| {
                let sql = format!(
                    "SELECT {} FROM trades t LEFT JOIN peaks p ON p.trade_id = t.trade_id
                     WHERE t.closed_at IS NULL AND (?1 IS NULL OR t.asset = ?1)
                     ORDER BY t.opened_at, t.trade_id",
                    TRADE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![asset], read_trade_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(TradeRow::into_record).collect()
    }

    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<usize> {
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM trades WHERE opened_at >= ?1",
                params![since.timestamp_millis()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn load_peak_profit(&self, trade_id: &str) -> Result<Option<Decimal>> {
        let trade_id = trade_id.to_string();
        let raw: Option<String> = self
            .blocking(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT peak_profit FROM peaks WHERE trade_id = ?1",
                        params![trade_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        raw.map(|s| Decimal::from_str(&s).map_err(anyhow::Error::from)).transpose()
    }

    async fn save_peak_profit(&self, trade_id: &str, peak: Decimal) -> Result<()> {
        let trade_id = trade_id.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT peak_profit FROM peaks WHERE trade_id = ?1",
                    params![trade_id],
                    |row| row.get(0),
                )
                .optional()?;
            let current = current.and_then(|s| Decimal::from_str(&s).ok());
            if current.map_or(true, |c| peak > c) {
                tx.execute(
                    "INSERT INTO peaks (trade_id, peak_profit, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(trade_id) DO UPDATE SET peak_profit = excluded.peak_profit,
                                                         updated_at = excluded.updated_at",
                    params![trade_id, peak.to_string(), Utc::now().timestamp_millis()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
