//! Configuration loader
//!
//! Every numeric threshold of the decision core is tunable here. Sections
//! that are omitted fall back to their defaults.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

use crate::core::confidence::ScoringConfig;
use crate::core::guardian::ExecutionPolicy;
use crate::core::regime::RegimeThresholds;
use crate::core::risk_circuit::RiskCircuitConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub execution: ExecutionPolicy,
    #[serde(default)]
    pub risk_circuit: RiskCircuitConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub regime: RegimeThresholds,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds between risk-circuit cycles
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    #[serde(default = "default_status_file")]
    pub status_file: String,
    /// Stable id for this worker; random when empty
    #[serde(default)]
    pub worker_id: String,
    /// JSON-lines file of candidate signals; empty disables signal intake
    #[serde(default)]
    pub signal_inbox: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cycle_secs() -> u64 {
    10
}

fn default_status_file() -> String {
    "sentinel_status.json".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "sentinel_store.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

/// Simulated broker settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub margin_rate: Decimal,
    pub contract_size: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            margin_rate: dec!(0.01),
            contract_size: Decimal::ONE,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub platform: String,
    /// Starting balance when the account is simulated
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
}

fn default_paper_balance() -> Decimal {
    dec!(100000)
}

#[derive(Debug, Deserialize)]
pub struct SymbolConfig {
    pub name: String,
    /// Seed price for the paper broker
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents).context("parsing config")?;
        config.normalize();
        Ok(config)
    }

    /// Account list is authoritative for the eligible platforms
    fn normalize(&mut self) {
        if !self.accounts.is_empty() {
            self.execution.platforms = self.accounts.iter().map(|a| a.platform.clone()).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::confidence::RiskAppetite;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::parse("[system]\nname = \"sentinel\"\n").unwrap();
        assert_eq!(cfg.system.log_level, "info");
        assert!(cfg.system.signal_inbox.is_empty());
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.execution.max_positions_per_asset, 2);
        assert_eq!(cfg.risk_circuit.breakeven_trigger_pct, dec!(50));
        assert_eq!(cfg.regime.min_samples, 50);
        assert_eq!(cfg.scoring.risk_appetite, RiskAppetite::Balanced);
    }

    #[test]
    fn test_sections_override() {
        let cfg = Config::parse(
            r#"
            [system]
            name = "worker-1"
            cycle_secs = 5

            [store]
            backend = "memory"

            [execution]
            max_positions_per_asset = 1
            max_utilization_pct = "30"

            [risk_circuit]
            drawdown_exit_pct = "15"

            [scoring]
            risk_appetite = "aggressive"

            [scoring.threshold_overrides]
            XAUUSD = 65.0

            [[accounts]]
            platform = "mt5-a"

            [[accounts]]
            platform = "mt5-b"
            paper_balance = "25000"

            [[symbols]]
            name = "XAUUSD"
            price = "2650.5"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.system.cycle_secs, 5);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.execution.max_positions_per_asset, 1);
        assert_eq!(cfg.execution.max_utilization_pct, dec!(30));
        assert_eq!(cfg.execution.platforms, vec!["mt5-a", "mt5-b"]);
        assert_eq!(cfg.risk_circuit.drawdown_exit_pct, dec!(15));
        assert_eq!(cfg.scoring.risk_appetite, RiskAppetite::Aggressive);
        assert_eq!(cfg.scoring.threshold_overrides.get("XAUUSD"), Some(&65.0));
        assert_eq!(cfg.accounts[1].paper_balance, dec!(25000));
        assert_eq!(cfg.symbols[0].price, Some(dec!(2650.5)));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = Config::parse(include_str!("../config.example.toml")).unwrap();
        assert_eq!(cfg.execution.platforms, vec!["mt5-primary", "mt5-secondary"]);
        assert_eq!(cfg.paper.margin_rate, dec!(0.01));
        let w = cfg.scoring.weight_overrides.get("XAUUSD:trend_rider").unwrap();
        assert_eq!(w.trend, 40.0);
        assert_eq!(cfg.symbols.len(), 2);
    }
}
