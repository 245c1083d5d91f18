//! In-memory shared store
//!
//! Same contract as the SQLite store but scoped to one process. Used for
//! paper runs without a database file and throughout the tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::data::store::{SharedStore, TradeRecord};

#[derive(Debug, Clone)]
struct Claim {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    locks: HashMap<String, Claim>,
    reservations: HashMap<String, Claim>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    trades: Vec<TradeRecord>,
    peaks: HashMap<String, Decimal>,
}

fn claim(map: &mut HashMap<String, Claim>, key: &str, owner: &str, ttl_secs: u64) -> bool {
    let now = Utc::now();
    if let Some(existing) = map.get(key) {
        if existing.expires_at > now {
            return false;
        }
    }
    map.insert(
        key.to_string(),
        Claim {
            owner: owner.to_string(),
            expires_at: now + chrono::Duration::seconds(ttl_secs as i64),
        },
    );
    true
}

fn unclaim(map: &mut HashMap<String, Claim>, key: &str, owner: &str) -> bool {
    match map.get(key) {
        Some(c) if c.owner == owner => {
            map.remove(key);
            true
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn acquire_lock(&self, key: &str, owner: &str, ttl_secs: u64) -> Result<bool> {
        Ok(claim(&mut self.inner.lock().await.locks, key, owner, ttl_secs))
    }

    async fn release_lock(&self, key: &str, owner: &str) -> Result<bool> {
        Ok(unclaim(&mut self.inner.lock().await.locks, key, owner))
    }

    async fn reserve_resource(&self, key: &str, owner: &str, ttl_secs: u64) -> Result<bool> {
        Ok(claim(&mut self.inner.lock().await.reservations, key, owner, ttl_secs))
    }

    async fn release_resource(&self, key: &str, owner: &str) -> Result<bool> {
        Ok(unclaim(&mut self.inner.lock().await.reservations, key, owner))
    }

    async fn cooldown(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.inner.lock().await.cooldowns.get(key).copied())
    }

    async fn set_cooldown(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.lock().await.cooldowns.insert(key.to_string(), at);
        Ok(())
    }

    async fn clear_cooldown(&self, key: &str) -> Result<()> {
        self.inner.lock().await.cooldowns.remove(key);
        Ok(())
    }

    async fn prune_cooldowns(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let start = inner.cooldowns.len();
        inner.cooldowns.retain(|_, at| *at >= before);
        Ok(start - inner.cooldowns.len())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.trades.iter().any(|t| t.trade_id == trade.trade_id) {
            bail!("trade {} already recorded", trade.trade_id);
        }
        if trade.peak_profit > Decimal::ZERO {
            inner.peaks.insert(trade.trade_id.clone(), trade.peak_profit);
        } else {
            inner.peaks.remove(&trade.trade_id);
        }
        inner.trades.push(trade.clone());
        Ok(())
    }

    async fn mark_trade_closed(
        &self,
        trade_id: &str,
        profit: Option<Decimal>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .trades
            .iter_mut()
            .find(|t| t.trade_id == trade_id && t.is_open())
        {
            Some(t) => {
                t.closed_at = Some(closed_at);
                t.profit = profit;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn open_trades(&self, asset: Option<&str>) -> Result<Vec<TradeRecord>> {
        let inner = self.inner.lock().await;
        let mut open: Vec<TradeRecord> = inner
            .trades
            .iter()
            .filter(|t| t.is_open() && asset.map_or(true, |a| t.asset == a))
            .cloned()
            .map(|mut t| {
                t.peak_profit = inner.peaks.get(&t.trade_id).copied().unwrap_or(Decimal::ZERO);
                t
            })
            .collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.trade_id.cmp(&b.trade_id)));
        Ok(open)
    }

    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.trades.iter().filter(|t| t.opened_at >= since).count())
    }

    async fn load_peak_profit(&self, trade_id: &str) -> Result<Option<Decimal>> {
        Ok(self.inner.lock().await.peaks.get(trade_id).copied())
    }

    async fn save_peak_profit(&self, trade_id: &str, peak: Decimal) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.peaks.entry(trade_id.to_string()).or_insert(peak);
        if peak > *entry {
            *entry = peak;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Direction;
    use rust_decimal_macros::dec;

    fn trade(id: &str, asset: &str) -> TradeRecord {
        TradeRecord {
            trade_id: id.to_string(),
            platform: "paper".to_string(),
            asset: asset.to_string(),
            direction: Direction::Short,
            strategy: "mean_reversion".to_string(),
            ticket: 7,
            volume: dec!(1),
            entry_price: dec!(1.0850),
            stop_loss: dec!(1.0900),
            take_profit: dec!(1.0750),
            time_exit_minutes: 0,
            opened_at: Utc::now(),
            closed_at: None,
            profit: None,
            peak_profit: Decimal::ZERO,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_lock_owner_semantics() {
        let store = MemoryStore::new();
        assert!(store.acquire_lock("open:EURUSD", "a", 60).await.unwrap());
        assert!(!store.acquire_lock("open:EURUSD", "b", 60).await.unwrap());
        assert!(!store.release_lock("open:EURUSD", "b").await.unwrap());
        assert!(store.release_lock("open:EURUSD", "a").await.unwrap());
        assert!(!store.release_lock("open:EURUSD", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_reservation_is_reclaimable() {
        let store = MemoryStore::new();
        assert!(store.reserve_resource("paper:EURUSD", "a", 0).await.unwrap());
        assert!(store.reserve_resource("paper:EURUSD", "b", 60).await.unwrap());
        assert!(!store.reserve_resource("paper:EURUSD", "c", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_trades_and_peaks() {
        let store = MemoryStore::new();
        store.save_peak_profit("paper-7", dec!(99)).await.unwrap();
        store.record_trade(&trade("paper-7", "EURUSD")).await.unwrap();
        assert!(store.record_trade(&trade("paper-7", "EURUSD")).await.is_err());
        assert!(store.load_peak_profit("paper-7").await.unwrap().is_none());
        assert_eq!(store.open_trades(Some("EURUSD")).await.unwrap().len(), 1);
        assert!(store.open_trades(Some("XAUUSD")).await.unwrap().is_empty());

        store.save_peak_profit("paper-7", dec!(40)).await.unwrap();
        store.save_peak_profit("paper-7", dec!(12)).await.unwrap();
        assert_eq!(store.load_peak_profit("paper-7").await.unwrap(), Some(dec!(40)));
        assert_eq!(store.open_trades(None).await.unwrap()[0].peak_profit, dec!(40));

        assert!(store.mark_trade_closed("paper-7", Some(dec!(31)), Utc::now()).await.unwrap());
        assert!(store.open_trades(None).await.unwrap().is_empty());
        assert_eq!(store.count_trades_since(Utc::now() - chrono::Duration::hours(1)).await.unwrap(), 1);
    }
}
