//! Shared durable store
//!
//! Everything that has to be agreed on across worker processes lives behind
//! [`SharedStore`]: distributed locks, account reservations, cooldowns and
//! trade records. The SQLite implementation is shared between processes; the
//! in-memory one is for single-process runs and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::types::Direction;

/// Persisted metadata of one trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// `{platform}-{ticket}-{nonce}`
    pub trade_id: String,
    pub platform: String,
    pub asset: String,
    pub direction: Direction,
    pub strategy: String,
    pub ticket: u64,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub time_exit_minutes: i64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit: Option<Decimal>,
    pub peak_profit: Decimal,
    /// Free-form context, e.g. the regime snapshot at entry
    pub metadata: serde_json::Value,
}

impl TradeRecord {
    /// Broker tickets can repeat across restarts, so the id carries a
    /// random suffix as well.
    pub fn new_trade_id(platform: &str, ticket: u64) -> String {
        let nonce = Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", platform, ticket, &nonce[..8])
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

// ── Key layout ───────────────────────────────────────────────────────────

/// Distributed lock guarding "open a position on this asset"
pub fn asset_lock_key(asset: &str) -> String {
    format!("open:{}", asset)
}

/// Reservation of one broker account for one asset
pub fn reservation_key(platform: &str, asset: &str) -> String {
    format!("{}:{}", platform, asset)
}

pub fn asset_cooldown_key(asset: &str) -> String {
    format!("asset:{}", asset)
}

pub fn account_cooldown_key(platform: &str, asset: &str) -> String {
    format!("account:{}:{}", platform, asset)
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Insert-if-absent-or-expired. `true` when `owner` now holds the lock.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl_secs: u64) -> Result<bool>;

    /// Compare-and-delete by owner. `false` when someone else holds it.
    async fn release_lock(&self, key: &str, owner: &str) -> Result<bool>;

    /// Same semantics as locks, in a separate namespace
    async fn reserve_resource(&self, key: &str, owner: &str, ttl_secs: u64) -> Result<bool>;

    async fn release_resource(&self, key: &str, owner: &str) -> Result<bool>;

    /// Last-trade timestamp recorded under `key`
    async fn cooldown(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_cooldown(&self, key: &str, at: DateTime<Utc>) -> Result<()>;

    async fn clear_cooldown(&self, key: &str) -> Result<()>;

    /// Drop cooldown entries older than `before`; returns how many went
    async fn prune_cooldowns(&self, before: DateTime<Utc>) -> Result<usize>;

    /// Errors when `trade.trade_id` is already recorded. A peak stored
    /// under the id beforehand is replaced by `trade.peak_profit`.
    async fn record_trade(&self, trade: &TradeRecord) -> Result<()>;

    /// `false` when the trade is unknown or already closed
    async fn mark_trade_closed(
        &self,
        trade_id: &str,
        profit: Option<Decimal>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Open trades, optionally restricted to one asset, oldest first
    async fn open_trades(&self, asset: Option<&str>) -> Result<Vec<TradeRecord>>;

    /// Trades opened at or after `since`, across all assets
    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<usize>;

    async fn load_peak_profit(&self, trade_id: &str) -> Result<Option<Decimal>>;

    /// Raises the stored peak; a lower value is ignored
    async fn save_peak_profit(&self, trade_id: &str, peak: Decimal) -> Result<()>;
}
