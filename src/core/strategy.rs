//! Strategy catalog
//!
//! Static profiles for every strategy the agent can run: which regime
//! cluster it belongs to, how its confidence pillars are weighted, whether
//! it only makes sense in a ranging market, and how its trailing stop
//! behaves once a trade is open.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::core::regime::StrategyCluster;

/// Four-pillar weight profile. Pillars add up to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PillarWeights {
    pub basis: f64,
    pub trend: f64,
    pub volatility: f64,
    pub sentiment: f64,
}

impl PillarWeights {
    pub const fn new(basis: f64, trend: f64, volatility: f64, sentiment: f64) -> Self {
        Self { basis, trend, volatility, sentiment }
    }

    pub fn sum(&self) -> f64 {
        self.basis + self.trend + self.volatility + self.sentiment
    }

    /// Rescale so the pillars add up to exactly 100.
    ///
    /// Negative entries are treated as zero; an all-zero profile becomes
    /// an even split.
    pub fn normalized(&self) -> Self {
        let clamp = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        let w = Self::new(
            clamp(self.basis),
            clamp(self.trend),
            clamp(self.volatility),
            clamp(self.sentiment),
        );
        let total = w.sum();
        if total <= 0.0 {
            return Self::new(25.0, 25.0, 25.0, 25.0);
        }
        if (total - 100.0).abs() < 1e-9 {
            return w;
        }
        let k = 100.0 / total;
        Self::new(w.basis * k, w.trend * k, w.volatility * k, w.sentiment * k)
    }
}

/// When trailing starts and how much of the open gain it locks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Progress toward take-profit (percent) at which trailing activates
    pub trigger_pct: Decimal,
    /// Share of the open price gain (percent) the stop secures
    pub secure_pct: Decimal,
}

impl TrailingConfig {
    pub const fn new(trigger_pct: Decimal, secure_pct: Decimal) -> Self {
        Self { trigger_pct, secure_pct }
    }
}

/// Everything the scorer and the risk circuits need to know about a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub id: String,
    pub primary: StrategyCluster,
    pub secondary: Option<StrategyCluster>,
    pub weights: PillarWeights,
    /// Only valid inside a ranging regime
    pub requires_range: bool,
    pub trailing: TrailingConfig,
}

struct Entry {
    id: &'static str,
    primary: StrategyCluster,
    secondary: Option<StrategyCluster>,
    weights: PillarWeights,
    requires_range: bool,
    trailing: TrailingConfig,
}

const CATALOG: &[Entry] = &[
    Entry {
        id: "trend_rider",
        primary: StrategyCluster::TrendFollowing,
        secondary: Some(StrategyCluster::Breakout),
        weights: PillarWeights::new(30.0, 35.0, 20.0, 15.0),
        requires_range: false,
        trailing: TrailingConfig::new(dec!(60), dec!(50)),
    },
    Entry {
        id: "ema_crossover",
        primary: StrategyCluster::TrendFollowing,
        secondary: Some(StrategyCluster::PriceAction),
        weights: PillarWeights::new(35.0, 30.0, 20.0, 15.0),
        requires_range: false,
        trailing: TrailingConfig::new(dec!(65), dec!(50)),
    },
    Entry {
        id: "breakout_hunter",
        primary: StrategyCluster::Breakout,
        secondary: Some(StrategyCluster::TrendFollowing),
        weights: PillarWeights::new(35.0, 20.0, 30.0, 15.0),
        requires_range: false,
        trailing: TrailingConfig::new(dec!(55), dec!(40)),
    },
    Entry {
        id: "mean_reversion",
        primary: StrategyCluster::MeanReversion,
        secondary: Some(StrategyCluster::PriceAction),
        weights: PillarWeights::new(40.0, 15.0, 30.0, 15.0),
        requires_range: false,
        trailing: TrailingConfig::new(dec!(70), dec!(60)),
    },
    Entry {
        id: "bollinger_bounce",
        primary: StrategyCluster::MeanReversion,
        secondary: None,
        weights: PillarWeights::new(40.0, 10.0, 35.0, 15.0),
        requires_range: true,
        trailing: TrailingConfig::new(dec!(70), dec!(60)),
    },
    Entry {
        id: "range_scalper",
        primary: StrategyCluster::Scalping,
        secondary: Some(StrategyCluster::MeanReversion),
        weights: PillarWeights::new(45.0, 10.0, 30.0, 15.0),
        requires_range: true,
        trailing: TrailingConfig::new(dec!(50), dec!(60)),
    },
    Entry {
        id: "price_action",
        primary: StrategyCluster::PriceAction,
        secondary: Some(StrategyCluster::Breakout),
        weights: PillarWeights::new(40.0, 25.0, 20.0, 15.0),
        requires_range: false,
        trailing: TrailingConfig::new(dec!(60), dec!(50)),
    },
    Entry {
        id: "momentum_scalper",
        primary: StrategyCluster::Scalping,
        secondary: Some(StrategyCluster::Breakout),
        weights: PillarWeights::new(40.0, 20.0, 30.0, 10.0),
        requires_range: false,
        trailing: TrailingConfig::new(dec!(50), dec!(50)),
    },
];

/// Weights for strategies missing from the catalog
pub const DEFAULT_WEIGHTS: PillarWeights = PillarWeights::new(35.0, 25.0, 25.0, 15.0);

/// Trailing behaviour for strategies missing from the catalog
pub const DEFAULT_TRAILING: TrailingConfig = TrailingConfig::new(dec!(60), dec!(50));

/// Look up a strategy profile by id (case-insensitive).
///
/// Unknown ids get a generic price-action profile rather than an error so
/// new strategies can be scored before they are catalogued.
pub fn profile(id: &str) -> StrategyProfile {
    let key = id.trim().to_ascii_lowercase();
    match CATALOG.iter().find(|e| e.id == key) {
        Some(e) => StrategyProfile {
            id: e.id.to_string(),
            primary: e.primary,
            secondary: e.secondary,
            weights: e.weights,
            requires_range: e.requires_range,
            trailing: e.trailing,
        },
        None => StrategyProfile {
            id: key,
            primary: StrategyCluster::PriceAction,
            secondary: None,
            weights: DEFAULT_WEIGHTS,
            requires_range: false,
            trailing: DEFAULT_TRAILING,
        },
    }
}

/// Is this id in the catalog?
pub fn is_known(id: &str) -> bool {
    let key = id.trim().to_ascii_lowercase();
    CATALOG.iter().any(|e| e.id == key)
}

/// All catalogued strategy ids
pub fn known_ids() -> Vec<&'static str> {
    CATALOG.iter().map(|e| e.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_weights_sum_to_100() {
        for id in known_ids() {
            let p = profile(id);
            assert!((p.weights.sum() - 100.0).abs() < 1e-9, "{} sums to {}", id, p.weights.sum());
        }
        assert!((DEFAULT_WEIGHTS.sum() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let p = profile("  Bollinger_Bounce ");
        assert_eq!(p.id, "bollinger_bounce");
        assert!(p.requires_range);
        assert!(is_known("TREND_RIDER"));
    }

    #[test]
    fn test_unknown_strategy_gets_generic_profile() {
        let p = profile("my_new_idea");
        assert!(!is_known("my_new_idea"));
        assert_eq!(p.primary, StrategyCluster::PriceAction);
        assert_eq!(p.weights, DEFAULT_WEIGHTS);
        assert!(!p.requires_range);
    }

    #[test]
    fn test_trailing_profiles_are_exact() {
        assert_eq!(profile("trend_rider").trailing, TrailingConfig::new(dec!(60), dec!(50)));
        assert_eq!(profile("breakout_hunter").trailing.secure_pct, dec!(40));
        assert_eq!(profile("unlisted").trailing, DEFAULT_TRAILING);
    }

    #[test]
    fn test_normalize_weights() {
        let w = PillarWeights::new(20.0, 20.0, 10.0, 0.0).normalized();
        assert!((w.sum() - 100.0).abs() < 1e-9);
        assert!((w.basis - 40.0).abs() < 1e-9);

        let zero = PillarWeights::new(0.0, -5.0, 0.0, f64::NAN).normalized();
        assert_eq!(zero, PillarWeights::new(25.0, 25.0, 25.0, 25.0));
    }
}
