//! Execution Coordinator
//!
//! Decides, atomically, whether a candidate trade may open and then opens
//! it. Many evaluations can run concurrently inside one process and across
//! worker processes sharing a store; at most one of them gets to place an
//! order for a given asset at a time.
//!
//! Protocol per attempt:
//! 1. distributed lock on the asset (shared store, owner token + TTL)
//! 2. in-process lock on the asset
//! 3. re-validate every invariant under both locks
//! 4. write provisional cooldowns
//! 5. reserve the chosen (platform, asset)
//! 6. place the order
//! 7. on success persist the trade and arm its risk circuit
//! 8. always release lock and reservation; on failure restore cooldowns
//!
//! The coordinator also owns the process's [`RiskCircuitMonitor`]. Fills
//! the store failed to record are held in memory, still count against the
//! asset's position cap and are written again on the next sync.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::core::guardian::{ExecutionGuard, ExecutionPolicy, SelectedAccount, Violation};
use crate::core::regime::MarketAnalysis;
use crate::core::risk_circuit::{
    RiskAction, RiskCircuitConfig, RiskCircuitMonitor, RiskCircuitState, TickOutcome,
    TradeRegistration,
};
use crate::core::types::Direction;
use crate::data::store::{
    account_cooldown_key, asset_cooldown_key, asset_lock_key, reservation_key, SharedStore,
    TradeRecord,
};
use crate::error::ExecutionError;

/// A candidate trade that already passed scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub asset: String,
    pub direction: Direction,
    pub strategy: String,
    pub volume: Decimal,
    /// Reference price; replaced by the fill price when the broker reports one
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    #[serde(default)]
    pub time_exit_minutes: i64,
    /// Extra context stored with the trade record
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenedTrade {
    pub trade_id: String,
    pub platform: String,
    pub ticket: u64,
    pub entry_price: Decimal,
    pub utilization_pct: Decimal,
    /// `false` when the store did not take the trade record yet
    pub persisted: bool,
}

/// Live quote for one tracked trade
#[derive(Debug, Clone)]
pub struct PositionTick {
    pub trade_id: String,
    pub price: Decimal,
    pub profit: Option<Decimal>,
}

/// A tick that asks the caller to act
#[derive(Debug, Clone)]
pub struct RiskEvent {
    pub trade_id: String,
    pub outcome: TickOutcome,
}

/// Cooldown values before the provisional write, for rollback
struct CooldownSnapshot {
    asset_key: String,
    asset_prev: Option<DateTime<Utc>>,
    account_key: String,
    account_prev: Option<DateTime<Utc>>,
}

fn store_err(e: anyhow::Error) -> ExecutionError {
    ExecutionError::StoreUnavailable(format!("{:#}", e))
}

pub struct ExecutionCoordinator {
    broker: Arc<dyn Broker>,
    store: Arc<dyn SharedStore>,
    guard: ExecutionGuard,
    worker_id: String,
    /// Meta-lock over the lazily created per-asset locks
    asset_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    monitor: Mutex<RiskCircuitMonitor>,
    /// Live trades whose record write failed
    unpersisted: Mutex<Vec<TradeRecord>>,
}

impl ExecutionCoordinator {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn SharedStore>,
        policy: ExecutionPolicy,
        risk_config: RiskCircuitConfig,
    ) -> Self {
        Self::with_worker_id(broker, store, policy, risk_config, Uuid::new_v4().to_string())
    }

    pub fn with_worker_id(
        broker: Arc<dyn Broker>,
        store: Arc<dyn SharedStore>,
        policy: ExecutionPolicy,
        risk_config: RiskCircuitConfig,
        worker_id: String,
    ) -> Self {
        Self {
            broker,
            store,
            guard: ExecutionGuard::new(policy),
            worker_id,
            asset_locks: Mutex::new(HashMap::new()),
            monitor: Mutex::new(RiskCircuitMonitor::new(risk_config)),
            unpersisted: Mutex::new(Vec::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        self.guard.policy()
    }

    async fn asset_lock(&self, asset: &str) -> Arc<Mutex<()>> {
        let mut locks = self.asset_locks.lock().await;
        locks
            .entry(asset.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Open trades from the store plus fills not yet recorded there
    async fn open_records(&self, asset: Option<&str>) -> Result<Vec<TradeRecord>, ExecutionError> {
        let mut open = self.store.open_trades(asset).await.map_err(store_err)?;
        let pending = self.unpersisted.lock().await;
        open.extend(
            pending
                .iter()
                .filter(|t| asset.map_or(true, |a| t.asset == a))
                .cloned(),
        );
        Ok(open)
    }

    /// Retry record writes that failed after a fill
    async fn flush_unpersisted(&self) {
        let mut pending = self.unpersisted.lock().await;
        if pending.is_empty() {
            return;
        }
        let mut kept = Vec::new();
        for record in pending.drain(..) {
            match self.store.record_trade(&record).await {
                Ok(()) => info!(trade = %record.trade_id, "trade record persisted late"),
                Err(e) => {
                    warn!(trade = %record.trade_id, error = %e, "trade record still not persisted");
                    kept.push(record);
                }
            }
        }
        *pending = kept;
    }

    async fn forget_unpersisted(&self, trade_id: &str) {
        self.unpersisted.lock().await.retain(|t| t.trade_id != trade_id);
    }

    // ── Opening trades ───────────────────────────────────────────────────

    /// Open `req` if, and only if, every invariant holds right now
    pub async fn try_open_trade(
        &self,
        req: &TradeRequest,
        analysis: &MarketAnalysis,
    ) -> Result<OpenedTrade, ExecutionError> {
        let owner = format!("{}:{}", self.worker_id, Uuid::new_v4());
        let lock_key = asset_lock_key(&req.asset);
        let ttl = self.policy().lock_ttl_secs;

        let acquired = self
            .store
            .acquire_lock(&lock_key, &owner, ttl)
            .await
            .map_err(store_err)?;
        if !acquired {
            info!(asset = %req.asset, "distributed lock held elsewhere, skipping");
            return Err(ExecutionError::LockUnavailable { key: lock_key });
        }

        let result = {
            let local = self.asset_lock(&req.asset).await;
            let _held = local.lock().await;
            self.open_locked(req, analysis, &owner).await
        };

        if let Err(e) = self.store.release_lock(&lock_key, &owner).await {
            warn!(key = %lock_key, error = %e, "failed to release distributed lock");
        }

        match &result {
            Ok(opened) => info!(
                asset = %req.asset,
                trade = %opened.trade_id,
                direction = %req.direction,
                strategy = %req.strategy,
                "trade opened"
            ),
            Err(ExecutionError::InvariantViolated(v)) => {
                info!(asset = %req.asset, reason = %v, "trade refused")
            }
            Err(e) => warn!(asset = %req.asset, kind = e.kind(), error = %e, "trade aborted"),
        }
        result
    }

    /// Steps 3-8, with both asset locks held
    async fn open_locked(
        &self,
        req: &TradeRequest,
        analysis: &MarketAnalysis,
        owner: &str,
    ) -> Result<OpenedTrade, ExecutionError> {
        let now = Utc::now();

        if analysis.is_degenerate() {
            return Err(Violation::RegimeBlocked.into());
        }

        let open = self.open_records(Some(&req.asset)).await?;
        self.guard.check_position_cap(open.len())?;

        let asset_key = asset_cooldown_key(&req.asset);
        let asset_prev = self.store.cooldown(&asset_key).await.map_err(store_err)?;
        self.guard.check_asset_cooldown(open.len(), asset_prev, now)?;

        let last_hour = self
            .store
            .count_trades_since(now - Duration::hours(1))
            .await
            .map_err(store_err)?;
        self.guard.check_hourly_cap(last_hour)?;

        let selected = self.select_account(&req.asset, now).await?;

        // Provisional cooldowns so a racing process that slips past an
        // expired lock still sees this attempt.
        let account_key = account_cooldown_key(&selected.platform, &req.asset);
        let account_prev = self.store.cooldown(&account_key).await.map_err(store_err)?;
        let snapshot = CooldownSnapshot {
            asset_key,
            asset_prev,
            account_key,
            account_prev,
        };
        if let Err(e) = self.write_provisional_cooldowns(&snapshot, now).await {
            self.restore_cooldowns(&snapshot).await;
            return Err(e);
        }

        let res_key = reservation_key(&selected.platform, &req.asset);
        let reserved = match self
            .store
            .reserve_resource(&res_key, owner, self.policy().reservation_ttl_secs)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.restore_cooldowns(&snapshot).await;
                return Err(store_err(e));
            }
        };
        if !reserved {
            self.restore_cooldowns(&snapshot).await;
            return Err(ExecutionError::LockUnavailable { key: res_key });
        }

        let outcome = self.place_and_record(req, analysis, &selected, now).await;

        if let Err(e) = self.store.release_resource(&res_key, owner).await {
            warn!(key = %res_key, error = %e, "failed to release reservation");
        }
        if outcome.is_err() {
            self.restore_cooldowns(&snapshot).await;
        }
        outcome
    }

    /// Accounts out of cooldown, then lowest utilization with headroom
    async fn select_account(
        &self,
        asset: &str,
        now: DateTime<Utc>,
    ) -> Result<SelectedAccount, ExecutionError> {
        let platforms = &self.policy().platforms;
        if platforms.is_empty() {
            return Err(Violation::NoAccounts.into());
        }

        let mut cooled: Option<Violation> = None;
        let mut unreachable: Vec<String> = Vec::new();
        let mut candidates = Vec::new();

        for platform in platforms {
            let last = self
                .store
                .cooldown(&account_cooldown_key(platform, asset))
                .await
                .map_err(store_err)?;
            if let Err(v) = self.guard.check_account_cooldown(platform, last, now) {
                debug!(platform = %platform, asset, reason = %v, "account skipped");
                cooled.get_or_insert(v);
                continue;
            }
            match self.broker.get_account_info(platform).await {
                Ok(info) => candidates.push((platform.clone(), info)),
                Err(e) => {
                    warn!(platform = %platform, error = %e, "account info unavailable");
                    unreachable.push(format!("{}: {:#}", platform, e));
                }
            }
        }

        if candidates.is_empty() {
            if !unreachable.is_empty() {
                return Err(ExecutionError::BrokerUnreachable(unreachable.join("; ")));
            }
            if let Some(v) = cooled {
                return Err(v.into());
            }
        }
        Ok(self.guard.select_account(&candidates)?)
    }

    async fn write_provisional_cooldowns(
        &self,
        snapshot: &CooldownSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        self.store
            .set_cooldown(&snapshot.asset_key, now)
            .await
            .map_err(store_err)?;
        self.store
            .set_cooldown(&snapshot.account_key, now)
            .await
            .map_err(store_err)
    }

    async fn restore_cooldowns(&self, snapshot: &CooldownSnapshot) {
        let pairs = [
            (&snapshot.asset_key, snapshot.asset_prev),
            (&snapshot.account_key, snapshot.account_prev),
        ];
        for (key, prev) in pairs {
            let restored = match prev {
                Some(at) => self.store.set_cooldown(key, at).await,
                None => self.store.clear_cooldown(key).await,
            };
            if let Err(e) = restored {
                error!(key = %key, error = %e, "failed to restore cooldown");
            }
        }
    }

    /// Steps 6-7
    async fn place_and_record(
        &self,
        req: &TradeRequest,
        analysis: &MarketAnalysis,
        account: &SelectedAccount,
        now: DateTime<Utc>,
    ) -> Result<OpenedTrade, ExecutionError> {
        let result = self
            .broker
            .place_order(&account.platform, &req.asset, req.direction, req.volume)
            .await
            .map_err(|e| ExecutionError::BrokerUnreachable(format!("{:#}", e)))?;

        if !result.success {
            return Err(ExecutionError::BrokerRejected(
                result.error.unwrap_or_else(|| "order refused".to_string()),
            ));
        }
        let ticket = result
            .ticket
            .ok_or_else(|| ExecutionError::BrokerRejected("fill reported without ticket".to_string()))?;

        let trade_id = TradeRecord::new_trade_id(&account.platform, ticket);
        let entry_price = result.price.unwrap_or(req.entry_price);

        let record = TradeRecord {
            trade_id: trade_id.clone(),
            platform: account.platform.clone(),
            asset: req.asset.clone(),
            direction: req.direction,
            strategy: req.strategy.clone(),
            ticket,
            volume: req.volume,
            entry_price,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            time_exit_minutes: req.time_exit_minutes,
            opened_at: now,
            closed_at: None,
            profit: None,
            peak_profit: Decimal::ZERO,
            metadata: serde_json::json!({
                "worker": self.worker_id,
                "utilization_pct": account.utilization_pct,
                "regime": analysis,
                "request": req.metadata,
            }),
        };
        // The order is live at this point; a store failure must not turn it into an error.
        let persisted = match self.store.record_trade(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!(trade = %trade_id, error = %e, "trade placed but record not persisted");
                self.unpersisted.lock().await.push(record);
                false
            }
        };

        self.monitor.lock().await.register_trade(TradeRegistration {
            trade_id: trade_id.clone(),
            entry_price,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            strategy: req.strategy.clone(),
            time_exit_minutes: req.time_exit_minutes,
            known_peak: None,
            opened_at: now.to_rfc3339(),
        });

        Ok(OpenedTrade {
            trade_id,
            platform: account.platform.clone(),
            ticket,
            entry_price,
            utilization_pct: account.utilization_pct,
            persisted,
        })
    }

    // ── Risk circuits ────────────────────────────────────────────────────

    /// Track a trade opened elsewhere (or re-hydrate one). A missing
    /// `known_peak` is looked up in the store.
    pub async fn register_trade(&self, mut reg: TradeRegistration) -> bool {
        if reg.known_peak.is_none() {
            match self.store.load_peak_profit(&reg.trade_id).await {
                Ok(peak) => reg.known_peak = peak,
                Err(e) => warn!(trade = %reg.trade_id, error = %e, "could not load stored peak"),
            }
        }
        self.monitor.lock().await.register_trade(reg)
    }

    /// Tick every quoted trade; returns only the ticks that need action.
    /// Raised peaks are written back to the store.
    pub async fn tick_risk_circuits(&self, ticks: &[PositionTick]) -> Vec<RiskEvent> {
        let mut events = Vec::new();
        let mut raised = Vec::new();
        {
            let mut monitor = self.monitor.lock().await;
            for t in ticks {
                let outcome = monitor.tick(&t.trade_id, t.price, t.profit);
                if outcome.peak_raised {
                    raised.push((t.trade_id.clone(), outcome.peak_profit));
                }
                if outcome.action != RiskAction::None {
                    events.push(RiskEvent {
                        trade_id: t.trade_id.clone(),
                        outcome,
                    });
                }
            }
        }

        for (trade_id, peak) in raised {
            if let Err(e) = self.store.save_peak_profit(&trade_id, peak).await {
                warn!(trade = %trade_id, error = %e, "failed to persist peak");
            }
        }
        events
    }

    pub async fn risk_state(&self, trade_id: &str) -> Option<RiskCircuitState> {
        self.monitor.lock().await.get(trade_id).cloned()
    }

    pub async fn tracked_trades(&self) -> Vec<RiskCircuitState> {
        let monitor = self.monitor.lock().await;
        let mut states: Vec<RiskCircuitState> = monitor
            .tracked_ids()
            .iter()
            .filter_map(|id| monitor.get(id).cloned())
            .collect();
        states.sort_by(|a, b| a.trade_id.cmp(&b.trade_id));
        states
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Close at the broker, mark closed in the store, stop tracking.
    /// `Ok(false)` when the broker no longer had the position.
    pub async fn close_trade(
        &self,
        trade_id: &str,
        profit: Option<Decimal>,
    ) -> Result<bool, ExecutionError> {
        let record = self
            .open_records(None)
            .await?
            .into_iter()
            .find(|t| t.trade_id == trade_id);

        let closed_at_broker = match &record {
            Some(r) => self
                .broker
                .close_position(&r.platform, r.ticket)
                .await
                .map_err(|e| ExecutionError::BrokerUnreachable(format!("{:#}", e)))?,
            None => {
                warn!(trade = %trade_id, "close requested for unknown trade");
                false
            }
        };

        self.monitor.lock().await.remove_trade(trade_id);
        self.forget_unpersisted(trade_id).await;
        self.store
            .mark_trade_closed(trade_id, profit, Utc::now())
            .await
            .map_err(store_err)?;

        info!(trade = %trade_id, closed_at_broker, "trade closed");
        Ok(closed_at_broker)
    }

    /// Quote every open trade from the broker. Trades the broker no longer
    /// reports were closed externally (stop / target hit) and are retired
    /// here.
    pub async fn sync_positions(&self) -> Result<Vec<PositionTick>, ExecutionError> {
        self.flush_unpersisted().await;
        let open = self.open_records(None).await?;
        let mut by_platform: HashMap<&str, Vec<&TradeRecord>> = HashMap::new();
        for t in &open {
            by_platform.entry(t.platform.as_str()).or_default().push(t);
        }

        let mut ticks = Vec::new();
        for (platform, trades) in by_platform {
            let positions = match self.broker.get_open_positions(platform).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(platform, error = %e, "position poll failed");
                    continue;
                }
            };
            for trade in trades {
                match positions.iter().find(|p| p.ticket == trade.ticket) {
                    Some(pos) => ticks.push(PositionTick {
                        trade_id: trade.trade_id.clone(),
                        price: pos.current_price,
                        profit: Some(pos.profit),
                    }),
                    None => {
                        info!(trade = %trade.trade_id, "position gone at broker, retiring");
                        self.monitor.lock().await.remove_trade(&trade.trade_id);
                        self.forget_unpersisted(&trade.trade_id).await;
                        self.store
                            .mark_trade_closed(&trade.trade_id, None, Utc::now())
                            .await
                            .map_err(store_err)?;
                    }
                }
            }
        }
        Ok(ticks)
    }

    /// Re-arm risk circuits for every open trade in the store, seeded with
    /// their stored peaks. Returns how many were newly armed.
    pub async fn restore_open_trades(&self) -> Result<usize, ExecutionError> {
        let open = self.store.open_trades(None).await.map_err(store_err)?;
        let mut monitor = self.monitor.lock().await;
        let mut armed = 0;
        for t in open {
            let known_peak = (t.peak_profit > Decimal::ZERO).then_some(t.peak_profit);
            let fresh = monitor.register_trade(TradeRegistration {
                trade_id: t.trade_id,
                entry_price: t.entry_price,
                stop_loss: t.stop_loss,
                take_profit: t.take_profit,
                strategy: t.strategy,
                time_exit_minutes: t.time_exit_minutes,
                known_peak,
                opened_at: t.opened_at.to_rfc3339(),
            });
            if fresh {
                armed += 1;
            }
        }
        info!(armed, tracked = monitor.len(), "open trades restored");
        Ok(armed)
    }

    /// Drop cooldown entries older than the longest cooldown window
    pub async fn prune_cooldowns(&self) -> Result<usize, ExecutionError> {
        let p = self.policy();
        let retention = p
            .second_entry_cooldown_secs
            .max(p.account_cooldown_secs)
            .max(p.first_entry_guard_secs);
        let removed = self
            .store
            .prune_cooldowns(Utc::now() - Duration::seconds(retention))
            .await
            .map_err(store_err)?;
        if removed > 0 {
            debug!(removed, "stale cooldowns pruned");
        }
        Ok(removed)
    }
}
