//! Strategy / regime suitability
//!
//! A mismatch between a strategy and the current regime never blocks a
//! trade on its own. It lowers the basis pillar of the confidence score,
//! and the threshold decides.

use serde::{Deserialize, Serialize};

use crate::core::regime::MarketAnalysis;
use crate::core::strategy::{self, StrategyProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SuitabilityTier {
    Discouraged,
    Acceptable,
    Optimal,
}

impl SuitabilityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuitabilityTier::Optimal => "optimal",
            SuitabilityTier::Acceptable => "acceptable",
            SuitabilityTier::Discouraged => "discouraged",
        }
    }

    /// Share of the basis pillar granted before confluence bonuses (0..1)
    pub fn basis_share(&self) -> f64 {
        match self {
            SuitabilityTier::Optimal => 0.5,
            SuitabilityTier::Acceptable => 0.3,
            SuitabilityTier::Discouraged => 0.1,
        }
    }

    /// Multiplier applied to a win-rate weight when picking alternatives
    fn preference(&self) -> f64 {
        match self {
            SuitabilityTier::Optimal => 1.0,
            SuitabilityTier::Acceptable => 0.7,
            SuitabilityTier::Discouraged => 0.0,
        }
    }
}

impl std::fmt::Display for SuitabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suitability {
    pub tier: SuitabilityTier,
    /// Basis-pillar share for this tier
    pub bonus: f64,
    pub reason: String,
}

/// Grade a catalogued (or generic) strategy against the regime
pub fn assess(strategy_id: &str, analysis: &MarketAnalysis) -> Suitability {
    assess_profile(&strategy::profile(strategy_id), analysis)
}

pub fn assess_profile(profile: &StrategyProfile, analysis: &MarketAnalysis) -> Suitability {
    let (tier, reason) = if analysis.is_degenerate() {
        (
            SuitabilityTier::Discouraged,
            format!("{}: regime unknown (insufficient history), all clusters blocked", profile.id),
        )
    } else if analysis.is_suitable(profile.primary) {
        (
            SuitabilityTier::Optimal,
            format!("{}: primary cluster {} fits {}", profile.id, profile.primary, analysis.state),
        )
    } else if let Some(secondary) = profile.secondary.filter(|c| analysis.is_suitable(*c)) {
        (
            SuitabilityTier::Acceptable,
            format!("{}: secondary cluster {} fits {}", profile.id, secondary, analysis.state),
        )
    } else {
        (
            SuitabilityTier::Discouraged,
            format!("{}: {} does not fit {}", profile.id, profile.primary, analysis.state),
        )
    };

    Suitability { tier, bonus: tier.basis_share(), reason }
}

/// Laplace-smoothed win rate, usable as a selection weight in (0, 1)
pub fn win_rate_weight(wins: u32, losses: u32) -> f64 {
    (wins as f64 + 1.0) / (wins as f64 + losses as f64 + 2.0)
}

/// Pick the best regime-compatible substitute from `(strategy_id, weight)`
/// candidates. Discouraged strategies are never returned; ties go to the
/// lexicographically smaller id so the choice is stable.
pub fn select_best_alternative<'a>(
    candidates: &'a [(String, f64)],
    analysis: &MarketAnalysis,
) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for (id, weight) in candidates {
        let tier = assess(id, analysis).tier;
        if tier == SuitabilityTier::Discouraged {
            continue;
        }
        let score = tier.preference() * weight.max(0.0);
        best = match best {
            None => Some((id.as_str(), score)),
            Some((best_id, best_score)) => {
                if score > best_score || (score == best_score && id.as_str() < best_id) {
                    Some((id.as_str(), score))
                } else {
                    Some((best_id, best_score))
                }
            }
        };
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::regime::{MarketState, TrendDirection};

    fn analysis_for(state: MarketState) -> MarketAnalysis {
        let suitable = state.suitable_clusters().to_vec();
        MarketAnalysis {
            state,
            trend: TrendDirection::Sideways,
            adx: 30.0,
            volatility: 0.8,
            normalized_volatility: 1.0,
            ema200_deviation_pct: 0.0,
            blocked_clusters: crate::core::regime::StrategyCluster::all()
                .into_iter()
                .filter(|c| !suitable.contains(c))
                .collect(),
            suitable_clusters: suitable,
            sample_count: 200,
        }
    }

    #[test]
    fn test_primary_match_is_optimal() {
        let s = assess("trend_rider", &analysis_for(MarketState::Uptrend));
        assert_eq!(s.tier, SuitabilityTier::Optimal);
        assert_eq!(s.bonus, 0.5);
    }

    #[test]
    fn test_secondary_match_is_acceptable() {
        // price_action: primary PriceAction, secondary Breakout
        let s = assess("price_action", &analysis_for(MarketState::HighVolatility));
        assert_eq!(s.tier, SuitabilityTier::Acceptable);
        assert!(s.bonus < SuitabilityTier::Optimal.basis_share());
    }

    #[test]
    fn test_mismatch_is_discouraged_not_blocked() {
        let s = assess("trend_rider", &analysis_for(MarketState::Range));
        assert_eq!(s.tier, SuitabilityTier::Discouraged);
        assert!(s.bonus > 0.0);
        assert!(s.reason.contains("does not fit"));
    }

    #[test]
    fn test_degenerate_regime_discourages_everything() {
        let s = assess("price_action", &MarketAnalysis::degenerate(10));
        assert_eq!(s.tier, SuitabilityTier::Discouraged);
    }

    #[test]
    fn test_win_rate_weight() {
        assert_eq!(win_rate_weight(0, 0), 0.5);
        assert!(win_rate_weight(8, 2) > win_rate_weight(2, 8));
        let huge = win_rate_weight(u32::MAX, u32::MAX);
        assert!((huge - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_select_best_alternative() {
        let range = analysis_for(MarketState::Range);
        let candidates = vec![
            ("trend_rider".to_string(), 0.9),
            ("mean_reversion".to_string(), 0.6),
            ("price_action".to_string(), 0.7),
        ];
        // trend_rider is discouraged in a range; price_action (optimal, 0.7) beats mean_reversion (0.6)
        assert_eq!(select_best_alternative(&candidates, &range), Some("price_action"));

        let trend = analysis_for(MarketState::StrongUptrend);
        assert_eq!(select_best_alternative(&candidates, &trend), Some("trend_rider"));

        let none = vec![("bollinger_bounce".to_string(), 1.0)];
        assert_eq!(select_best_alternative(&none, &trend), None);
    }

    #[test]
    fn test_select_tie_breaks_by_id() {
        let range = analysis_for(MarketState::Range);
        let candidates = vec![
            ("range_scalper".to_string(), 0.5),
            ("mean_reversion".to_string(), 0.5),
        ];
        assert_eq!(select_best_alternative(&candidates, &range), Some("mean_reversion"));
    }
}
