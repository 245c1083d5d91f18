//! Risk Circuit Monitor
//!
//! Tracks the risk state of every open trade and decides, tick by tick,
//! whether its stop should move or the trade should be closed.
//!
//! Per trade: ARMED -> BREAKEVEN-LOCKED -> TRAILING -> removed on close.
//!
//! Each tick runs the checks in a fixed order and returns at most one action:
//! 1. Profit-drawdown exit (gated on elapsed time and a positive peak; terminal)
//! 2. Breakeven lock (once per trade)
//! 3. Trailing stop (ratchets, never loosens)
//!
//! Peaks only ever go up. A peak reloaded from storage after a restart is
//! passed in as a seed and can only be raised by later ticks.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::core::strategy::{self, TrailingConfig};
use crate::core::types::Direction;

/// Risk circuit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCircuitConfig {
    /// Progress toward take-profit (percent) that arms the breakeven lock
    pub breakeven_trigger_pct: Decimal,
    /// Buffer beyond entry, as a percent of entry price
    pub breakeven_buffer_pct: Decimal,
    /// Retreat from peak (percent of peak) that triggers a drawdown exit
    pub drawdown_exit_pct: Decimal,
    /// Minimum trade age before a drawdown exit, when the trade has no time-exit of its own
    pub drawdown_min_minutes: i64,
}

impl Default for RiskCircuitConfig {
    fn default() -> Self {
        Self {
            breakeven_trigger_pct: dec!(50),
            breakeven_buffer_pct: dec!(0.05),
            drawdown_exit_pct: dec!(10),
            drawdown_min_minutes: 30,
        }
    }
}

/// What the caller should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    None,
    MoveSlBreakeven,
    TrailingStop,
    ProfitDrawdownExit,
}

impl RiskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskAction::None => "none",
            RiskAction::MoveSlBreakeven => "move_sl_breakeven",
            RiskAction::TrailingStop => "trailing_stop",
            RiskAction::ProfitDrawdownExit => "profit_drawdown_exit",
        }
    }
}

impl std::fmt::Display for RiskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickOutcome {
    pub action: RiskAction,
    pub new_sl: Option<Decimal>,
    pub reason: String,
    /// Peak profit after this tick
    pub peak_profit: Decimal,
    /// The peak moved up on this tick and should be persisted
    pub peak_raised: bool,
}

impl TickOutcome {
    fn none(reason: impl Into<String>, peak_profit: Decimal, peak_raised: bool) -> Self {
        Self {
            action: RiskAction::None,
            new_sl: None,
            reason: reason.into(),
            peak_profit,
            peak_raised,
        }
    }
}

/// Parameters for starting to track a trade
#[derive(Debug, Clone)]
pub struct TradeRegistration {
    pub trade_id: String,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub strategy: String,
    /// Planned holding horizon; also the minimum age for a drawdown exit when > 0
    pub time_exit_minutes: i64,
    /// Peak profit reloaded from durable storage
    pub known_peak: Option<Decimal>,
    /// RFC 3339 (or `YYYY-MM-DD HH:MM:SS` UTC) open time
    pub opened_at: String,
}

/// Live risk state of one open trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCircuitState {
    pub trade_id: String,
    pub direction: Direction,
    pub strategy: String,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub breakeven_triggered: bool,
    pub peak_profit: Decimal,
    pub peak_progress_pct: Decimal,
    /// `None` when the open time could not be parsed
    pub opened_at: Option<DateTime<Utc>>,
    pub time_exit_minutes: i64,
    pub trailing_stop: Option<Decimal>,
    pub trailing: TrailingConfig,
}

impl RiskCircuitState {
    /// Progress toward take-profit in percent; negative when in loss
    pub fn progress_pct(&self, price: Decimal) -> Decimal {
        let distance = (self.take_profit - self.entry_price).abs();
        if distance.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) * self.direction.sign() / distance * dec!(100)
    }

    /// Minutes since open. Unknown open time counts as maximum elapsed.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        match self.opened_at {
            Some(opened) => (now - opened).num_minutes(),
            None => i64::MAX,
        }
    }

    /// Is `candidate` a tighter stop than `current` for this direction?
    fn tightens(&self, candidate: Decimal, current: Decimal) -> bool {
        match self.direction {
            Direction::Long => candidate > current,
            Direction::Short => candidate < current,
        }
    }
}

/// Lenient open-time parser; `None` means "treat as maximum elapsed"
pub fn parse_opened_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Per-process tracker of every open trade's risk state
#[derive(Debug, Default)]
pub struct RiskCircuitMonitor {
    config: RiskCircuitConfig,
    circuits: HashMap<String, RiskCircuitState>,
}

impl RiskCircuitMonitor {
    pub fn new(config: RiskCircuitConfig) -> Self {
        Self {
            config,
            circuits: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RiskCircuitConfig {
        &self.config
    }

    /// Start tracking a trade. Returns `false` when it was already tracked;
    /// in that case only the remembered peak may be raised.
    pub fn register_trade(&mut self, reg: TradeRegistration) -> bool {
        let seed = reg.known_peak.unwrap_or(Decimal::ZERO);

        if let Some(existing) = self.circuits.get_mut(&reg.trade_id) {
            if seed > existing.peak_profit {
                debug!(trade = %reg.trade_id, old = %existing.peak_profit, new = %seed, "raising peak on re-register");
                existing.peak_profit = seed;
            }
            return false;
        }

        let opened_at = parse_opened_at(&reg.opened_at);
        if opened_at.is_none() {
            warn!(
                trade = %reg.trade_id,
                raw = %reg.opened_at,
                "unparseable open time, treating trade as fully aged"
            );
        }

        let state = RiskCircuitState {
            direction: Direction::from_levels(reg.entry_price, reg.stop_loss, reg.take_profit),
            trailing: strategy::profile(&reg.strategy).trailing,
            trade_id: reg.trade_id.clone(),
            strategy: reg.strategy,
            entry_price: reg.entry_price,
            stop_loss: reg.stop_loss,
            take_profit: reg.take_profit,
            breakeven_triggered: false,
            peak_profit: seed,
            peak_progress_pct: Decimal::ZERO,
            opened_at,
            time_exit_minutes: reg.time_exit_minutes,
            trailing_stop: None,
        };

        info!(
            trade = %state.trade_id,
            direction = %state.direction,
            entry = %state.entry_price,
            sl = %state.stop_loss,
            tp = %state.take_profit,
            peak = %state.peak_profit,
            "risk circuit armed"
        );
        self.circuits.insert(reg.trade_id, state);
        true
    }

    pub fn remove_trade(&mut self, trade_id: &str) -> Option<RiskCircuitState> {
        self.circuits.remove(trade_id)
    }

    pub fn get(&self, trade_id: &str) -> Option<&RiskCircuitState> {
        self.circuits.get(trade_id)
    }

    pub fn is_tracked(&self, trade_id: &str) -> bool {
        self.circuits.contains_key(trade_id)
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        self.circuits.keys().cloned().collect()
    }

    /// Evaluate one tick at the current wall-clock time
    pub fn tick(&mut self, trade_id: &str, price: Decimal, profit: Option<Decimal>) -> TickOutcome {
        self.tick_at(trade_id, price, profit, Utc::now())
    }

    /// Evaluate one tick. `profit` may be absent, in which case the
    /// drawdown check falls back to progress percentages.
    pub fn tick_at(
        &mut self,
        trade_id: &str,
        price: Decimal,
        profit: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let cfg = &self.config;
        let state = match self.circuits.get_mut(trade_id) {
            Some(s) => s,
            None => return TickOutcome::none("untracked trade", Decimal::ZERO, false),
        };

        let progress = state.progress_pct(price);
        let mut peak_raised = false;
        if let Some(p) = profit {
            if p > state.peak_profit {
                state.peak_profit = p;
                peak_raised = true;
            }
        }
        if progress > state.peak_progress_pct {
            state.peak_progress_pct = progress;
        }
        let peak = state.peak_profit;

        // ── 1. Profit-drawdown exit ──────────────────────────────────────
        let min_minutes = if state.time_exit_minutes > 0 {
            state.time_exit_minutes
        } else {
            cfg.drawdown_min_minutes
        };
        if state.elapsed_minutes(now) >= min_minutes {
            let retreat = match profit {
                Some(p) if state.peak_profit > Decimal::ZERO => {
                    Some((state.peak_profit - p) / state.peak_profit * dec!(100))
                }
                None if state.peak_progress_pct > Decimal::ZERO => Some(
                    (state.peak_progress_pct - progress) / state.peak_progress_pct * dec!(100),
                ),
                _ => None,
            };
            if let Some(retreat) = retreat.filter(|r| *r >= cfg.drawdown_exit_pct) {
                let reason = format!(
                    "profit retreated {:.2}% from peak {} (limit {}%)",
                    retreat, state.peak_profit, cfg.drawdown_exit_pct
                );
                info!(trade = %trade_id, "{}", reason);
                return TickOutcome {
                    action: RiskAction::ProfitDrawdownExit,
                    new_sl: None,
                    reason,
                    peak_profit: peak,
                    peak_raised,
                };
            }
        }

        // ── 2. Breakeven lock ────────────────────────────────────────────
        if !state.breakeven_triggered && progress >= cfg.breakeven_trigger_pct {
            state.breakeven_triggered = true;
            let buffer = state.entry_price * cfg.breakeven_buffer_pct / dec!(100);
            let target = state.entry_price + state.direction.sign() * buffer;
            if state.tightens(target, state.stop_loss) {
                state.stop_loss = target;
                let reason = format!("progress {:.1}% reached breakeven trigger", progress);
                info!(trade = %trade_id, new_sl = %target, "{}", reason);
                return TickOutcome {
                    action: RiskAction::MoveSlBreakeven,
                    new_sl: Some(target),
                    reason,
                    peak_profit: peak,
                    peak_raised,
                };
            }
            debug!(trade = %trade_id, "breakeven armed but stop already tighter");
        }

        // ── 3. Trailing stop ─────────────────────────────────────────────
        let TrailingConfig { trigger_pct: trigger, secure_pct: secure } = state.trailing;
        if progress >= trigger {
            let gain = (price - state.entry_price) * state.direction.sign();
            let candidate = state.entry_price + state.direction.sign() * gain * secure / dec!(100);
            if state.tightens(candidate, state.stop_loss) {
                state.trailing_stop = Some(candidate);
                state.stop_loss = candidate;
                let reason = format!(
                    "trailing at {:.1}% progress, securing {}% of open gain",
                    progress, secure
                );
                debug!(trade = %trade_id, new_sl = %candidate, "{}", reason);
                return TickOutcome {
                    action: RiskAction::TrailingStop,
                    new_sl: Some(candidate),
                    reason,
                    peak_profit: peak,
                    peak_raised,
                };
            }
        }

        TickOutcome::none("no adjustment", peak, peak_raised)
    }
}
