//! Status file for sharing worker state with other processes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::risk_circuit::RiskCircuitState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTrade {
    pub trade_id: String,
    pub direction: String,
    pub strategy: String,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub peak_profit: Decimal,
    pub breakeven_triggered: bool,
    pub trailing: bool,
}

impl From<&RiskCircuitState> for TrackedTrade {
    fn from(s: &RiskCircuitState) -> Self {
        Self {
            trade_id: s.trade_id.clone(),
            direction: s.direction.as_str().to_string(),
            strategy: s.strategy.clone(),
            entry_price: s.entry_price,
            stop_loss: s.stop_loss,
            peak_profit: s.peak_profit,
            breakeven_triggered: s.breakeven_triggered,
            trailing: s.trailing_stop.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub running: bool,
    pub start_time: i64,
    pub last_cycle: i64,
    pub cycles: u64,
    pub stop_moves: u64,
    pub drawdown_exits: u64,
    pub signals_seen: u64,
    pub trades_opened: u64,
    pub last_error: Option<String>,
    pub tracked: Vec<TrackedTrade>,
}

impl WorkerStatus {
    pub fn save(&self, path: &str) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &str) -> Self {
        if Path::new(path).exists() {
            if let Ok(contents) = fs::read_to_string(path) {
                if let Ok(status) = serde_json::from_str(&contents) {
                    return status;
                }
            }
        }
        Self::default()
    }
}
