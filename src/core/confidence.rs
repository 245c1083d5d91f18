//! Four-pillar confidence scoring
//!
//! Every candidate signal is scored out of 100 across four pillars:
//!
//! 1. Basis signal      - regime suitability tier + confluence count
//! 2. Trend confluence  - higher-timeframe alignment, corrected for EMA-200 extension
//! 3. Volatility fit    - ATR% against an ideal band, volume confirmation
//! 4. Sentiment         - positioning first, news second, full penalty before high-impact news
//!
//! Each pillar produces a share in [0, 1] that is multiplied by the
//! strategy's pillar weight. The total is compared against a threshold that
//! depends on risk appetite, the detected regime, and per-asset overrides.
//!
//! The score is a pure function of its inputs. Every bonus and penalty is
//! recorded in `trace`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::core::regime::{MarketAnalysis, MarketState, TrendDirection};
use crate::core::strategy::{self, PillarWeights};
use crate::core::suitability::{self, SuitabilityTier};
use crate::core::types::{Bias, Direction, IndicatorMap};

/// Higher-timeframe labels beyond this count are ignored
pub const MAX_HIGHER_TIMEFRAMES: usize = 3;

/// Global risk-appetite mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAppetite {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskAppetite {
    pub fn base_threshold(&self) -> f64 {
        match self {
            RiskAppetite::Conservative => 70.0,
            RiskAppetite::Balanced => 60.0,
            RiskAppetite::Aggressive => 50.0,
        }
    }
}

impl Default for RiskAppetite {
    fn default() -> Self {
        RiskAppetite::Balanced
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub risk_appetite: RiskAppetite,
    /// Signals with fewer agreeing indicators are rejected outright
    pub min_confluence: u32,
    /// EMA-200 deviation (percent) beyond which a move counts as extended
    pub extension_threshold_pct: f64,
    pub chase_penalty: f64,
    pub fade_bonus: f64,
    /// Ideal ATR% band
    pub volatility_ideal_min: f64,
    pub volatility_ideal_max: f64,
    /// ATR% at or above which the volatility pillar scores nothing
    pub volatility_extreme: f64,
    /// Per-asset base threshold, replaces the risk-appetite base
    pub threshold_overrides: HashMap<String, f64>,
    /// Pillar weights keyed by `ASSET` or `ASSET:strategy`
    pub weight_overrides: HashMap<String, PillarWeights>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            risk_appetite: RiskAppetite::Balanced,
            min_confluence: 1,
            extension_threshold_pct: 3.0,
            chase_penalty: 0.3,
            fade_bonus: 0.15,
            volatility_ideal_min: 0.3,
            volatility_ideal_max: 1.5,
            volatility_extreme: 3.0,
            threshold_overrides: HashMap::new(),
            weight_overrides: HashMap::new(),
        }
    }
}

/// Sentiment inputs. Positioning (futures long/short style) wins over news.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentInput {
    pub positioning: Option<Bias>,
    pub news: Option<Bias>,
}

/// Everything the scorer looks at for one candidate signal
#[derive(Debug, Clone)]
pub struct ScoreRequest<'a> {
    pub asset: &'a str,
    pub strategy: &'a str,
    pub direction: Direction,
    pub indicators: &'a IndicatorMap,
    pub analysis: &'a MarketAnalysis,
    /// Ordered lowest to highest timeframe
    pub higher_timeframes: &'a [Bias],
    pub sentiment: SentimentInput,
    pub high_impact_news: bool,
    pub confluence_count: u32,
}

/// Points earned per pillar (already weighted)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PillarScores {
    pub basis: f64,
    pub trend: f64,
    pub volatility: f64,
    pub sentiment: f64,
}

impl PillarScores {
    pub fn sum(&self) -> f64 {
        self.basis + self.trend + self.volatility + self.sentiment
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub asset: String,
    pub strategy: String,
    pub direction: Direction,
    pub pillars: PillarScores,
    /// Composite score in [0, 100]
    pub total: f64,
    pub threshold: f64,
    pub passed_threshold: bool,
    pub suitability: SuitabilityTier,
    /// Set when a fast-reject gate fired
    pub rejection: Option<String>,
    pub trace: Vec<String>,
}

/// Confidence scorer
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Dynamic pass threshold for an asset in a given regime
    pub fn threshold_for(&self, asset: &str, state: MarketState) -> f64 {
        let base = self
            .config
            .threshold_overrides
            .get(asset)
            .copied()
            .unwrap_or_else(|| self.config.risk_appetite.base_threshold());
        let adjustment = match state {
            MarketState::Chaos => 15.0,
            MarketState::HighVolatility => 10.0,
            MarketState::StrongUptrend | MarketState::StrongDowntrend => -5.0,
            MarketState::Uptrend | MarketState::Downtrend | MarketState::Range => 0.0,
        };
        (base + adjustment).clamp(0.0, 100.0)
    }

    /// Pillar weights for a strategy on an asset, after overrides
    pub fn weights_for(&self, asset: &str, strategy_id: &str) -> PillarWeights {
        let keyed = format!("{}:{}", asset, strategy_id.trim().to_ascii_lowercase());
        self.config
            .weight_overrides
            .get(&keyed)
            .or_else(|| self.config.weight_overrides.get(asset))
            .map(|w| w.normalized())
            .unwrap_or_else(|| strategy::profile(strategy_id).weights.normalized())
    }

    /// Score one candidate signal
    pub fn evaluate(&self, req: &ScoreRequest<'_>) -> ConfidenceScore {
        let profile = strategy::profile(req.strategy);
        let suitability = suitability::assess_profile(&profile, req.analysis);
        let threshold = self.threshold_for(req.asset, req.analysis.state);
        let mut trace = vec![format!("SUITABILITY: {}", suitability.reason)];

        // ── Fast-reject gates ────────────────────────────────────────────
        let rejection = if req.confluence_count < self.config.min_confluence {
            Some(format!(
                "REJECT: insufficient confluence ({} < {})",
                req.confluence_count, self.config.min_confluence
            ))
        } else if profile.requires_range && req.analysis.state != MarketState::Range {
            Some(format!(
                "REJECT: {} requires a ranging market, regime is {}",
                profile.id, req.analysis.state
            ))
        } else {
            None
        };

        if let Some(reason) = rejection {
            trace.push(reason.clone());
            debug!(asset = req.asset, strategy = %profile.id, "{}", reason);
            return ConfidenceScore {
                asset: req.asset.to_string(),
                strategy: profile.id,
                direction: req.direction,
                pillars: PillarScores::default(),
                total: 0.0,
                threshold,
                passed_threshold: false,
                suitability: suitability.tier,
                rejection: Some(reason),
                trace,
            };
        }

        let weights = self.weights_for(req.asset, req.strategy);

        let basis = basis_share(suitability.bonus, req.confluence_count, &mut trace);
        let trend = self.trend_share(req, &mut trace);
        let volatility = self.volatility_share(req, &mut trace);
        let sentiment = sentiment_share(req, &mut trace);

        let pillars = PillarScores {
            basis: round2(basis * weights.basis),
            trend: round2(trend * weights.trend),
            volatility: round2(volatility * weights.volatility),
            sentiment: round2(sentiment * weights.sentiment),
        };
        let total = round2(pillars.sum()).clamp(0.0, 100.0);
        let passed_threshold = total >= threshold;

        trace.push(format!(
            "TOTAL: {:.2} (basis {:.2} + trend {:.2} + volatility {:.2} + sentiment {:.2}) vs threshold {:.1}",
            total, pillars.basis, pillars.trend, pillars.volatility, pillars.sentiment, threshold
        ));

        ConfidenceScore {
            asset: req.asset.to_string(),
            strategy: profile.id,
            direction: req.direction,
            pillars,
            total,
            threshold,
            passed_threshold,
            suitability: suitability.tier,
            rejection: None,
            trace,
        }
    }

    fn trend_share(&self, req: &ScoreRequest<'_>, trace: &mut Vec<String>) -> f64 {
        let labels: Vec<Bias> = if req.higher_timeframes.is_empty() {
            let regime_bias = match req.analysis.trend {
                TrendDirection::Up => Bias::Bullish,
                TrendDirection::Down => Bias::Bearish,
                TrendDirection::Sideways => Bias::Neutral,
            };
            trace.push("TREND: no higher-timeframe labels, using regime trend".to_string());
            vec![regime_bias]
        } else {
            if req.higher_timeframes.len() > MAX_HIGHER_TIMEFRAMES {
                trace.push(format!(
                    "TREND: {} timeframe labels supplied, using highest {}",
                    req.higher_timeframes.len(),
                    MAX_HIGHER_TIMEFRAMES
                ));
            }
            let skip = req.higher_timeframes.len().saturating_sub(MAX_HIGHER_TIMEFRAMES);
            req.higher_timeframes[skip..].to_vec()
        };

        let mut earned = 0.0;
        let mut possible = 0.0;
        for (i, label) in labels.iter().enumerate() {
            let weight = (i + 1) as f64;
            possible += weight;
            if label.agrees_with(req.direction) {
                earned += weight;
                trace.push(format!("BONUS: HTF{} aligned with {}", i + 1, req.direction));
            } else if label.opposes(req.direction) {
                trace.push(format!("PENALTY: HTF{} opposes {}", i + 1, req.direction));
            } else {
                earned += weight * 0.5;
            }
        }
        let mut share = if possible > 0.0 { earned / possible } else { 0.5 };

        // Mean-reversion correction on EMA-200 extension
        let deviation = req.analysis.ema200_deviation_pct;
        if !req.analysis.is_degenerate()
            && deviation.is_finite()
            && deviation.abs() >= self.config.extension_threshold_pct
        {
            let chasing = (deviation > 0.0 && req.direction == Direction::Long)
                || (deviation < 0.0 && req.direction == Direction::Short);
            if chasing {
                share -= self.config.chase_penalty;
                trace.push(format!(
                    "PENALTY: chasing {:+.2}% extension from EMA200",
                    deviation
                ));
            } else {
                share += self.config.fade_bonus;
                trace.push(format!(
                    "BONUS: fading {:+.2}% extension from EMA200",
                    deviation
                ));
            }
        }

        share.clamp(0.0, 1.0)
    }

    fn volatility_share(&self, req: &ScoreRequest<'_>, trace: &mut Vec<String>) -> f64 {
        let cfg = &self.config;
        let atr_pct = req
            .indicators
            .get("atr_pct")
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(req.analysis.volatility);

        let mut share: f64 = if !atr_pct.is_finite() || atr_pct <= 0.0 {
            trace.push("PENALTY: no volatility reading".to_string());
            0.3
        } else if atr_pct < cfg.volatility_ideal_min {
            trace.push(format!("PENALTY: volatility too low ({:.2}%)", atr_pct));
            0.3
        } else if atr_pct <= cfg.volatility_ideal_max {
            trace.push(format!("BONUS: volatility in ideal band ({:.2}%)", atr_pct));
            0.7
        } else if atr_pct < cfg.volatility_extreme {
            trace.push(format!("PENALTY: elevated volatility ({:.2}%)", atr_pct));
            0.35
        } else {
            trace.push(format!("PENALTY: extreme volatility ({:.2}%)", atr_pct));
            0.0
        };

        if let Some(ratio) = req.indicators.get("volume_ratio").copied().filter(|v| v.is_finite()) {
            if ratio >= 1.5 {
                share += 0.3;
                trace.push(format!("BONUS: strong volume confirmation (x{:.2})", ratio));
            } else if ratio >= 1.2 {
                share += 0.15;
                trace.push(format!("BONUS: volume confirmation (x{:.2})", ratio));
            } else if ratio < 0.5 {
                share -= 0.2;
                trace.push(format!("PENALTY: thin volume (x{:.2})", ratio));
            }
        }

        share.clamp(0.0, 1.0)
    }
}

fn basis_share(tier_share: f64, confluence: u32, trace: &mut Vec<String>) -> f64 {
    let bonus = match confluence {
        0 => 0.0,
        1 => 0.1,
        2 => 0.2,
        3 => 0.35,
        _ => 0.5,
    };
    if bonus > 0.0 {
        trace.push(format!("BONUS: confluence x{} (+{:.2})", confluence, bonus));
    }
    (tier_share + bonus).clamp(0.0, 1.0)
}

fn sentiment_share(req: &ScoreRequest<'_>, trace: &mut Vec<String>) -> f64 {
    if req.high_impact_news {
        trace.push("PENALTY: high-impact news pending".to_string());
        return 0.0;
    }
    if let Some(bias) = req.sentiment.positioning {
        return if bias.agrees_with(req.direction) {
            trace.push("BONUS: positioning sentiment aligned".to_string());
            1.0
        } else if bias.opposes(req.direction) {
            trace.push("PENALTY: positioning sentiment opposed".to_string());
            0.0
        } else {
            0.5
        };
    }
    if let Some(bias) = req.sentiment.news {
        return if bias.agrees_with(req.direction) {
            trace.push("BONUS: news sentiment aligned".to_string());
            0.8
        } else if bias.opposes(req.direction) {
            trace.push("PENALTY: news sentiment opposed".to_string());
            0.15
        } else {
            0.5
        };
    }
    0.5
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::regime::StrategyCluster;

    fn analysis(state: MarketState, trend: TrendDirection, deviation: f64) -> MarketAnalysis {
        let suitable = state.suitable_clusters().to_vec();
        MarketAnalysis {
            state,
            trend,
            adx: 35.0,
            volatility: 0.8,
            normalized_volatility: 1.0,
            ema200_deviation_pct: deviation,
            blocked_clusters: StrategyCluster::all()
                .into_iter()
                .filter(|c| !suitable.contains(c))
                .collect(),
            suitable_clusters: suitable,
            sample_count: 250,
        }
    }

    fn indicators(atr_pct: f64, volume_ratio: f64) -> IndicatorMap {
        let mut m = IndicatorMap::new();
        m.insert("atr_pct".to_string(), atr_pct);
        m.insert("volume_ratio".to_string(), volume_ratio);
        m
    }

    fn request<'a>(
        strategy: &'a str,
        direction: Direction,
        analysis: &'a MarketAnalysis,
        indicators: &'a IndicatorMap,
        htf: &'a [Bias],
        confluence: u32,
    ) -> ScoreRequest<'a> {
        ScoreRequest {
            asset: "XAUUSD",
            strategy,
            direction,
            indicators,
            analysis,
            higher_timeframes: htf,
            sentiment: SentimentInput { positioning: Some(Bias::Bullish), news: None },
            high_impact_news: false,
            confluence_count: confluence,
        }
    }

    #[test]
    fn test_ideal_trend_setup_scores_full_marks() {
        let a = analysis(MarketState::StrongUptrend, TrendDirection::Up, 1.0);
        let ind = indicators(0.8, 1.6);
        let htf = [Bias::Bullish, Bias::Bullish, Bias::Bullish];
        let score = ConfidenceScorer::default()
            .evaluate(&request("trend_rider", Direction::Long, &a, &ind, &htf, 4));

        assert_eq!(score.total, 100.0);
        assert_eq!(score.threshold, 55.0);
        assert!(score.passed_threshold);
        assert_eq!(score.suitability, SuitabilityTier::Optimal);
        assert!(score.rejection.is_none());
        assert!(score.trace.iter().any(|t| t.starts_with("TOTAL")));
    }

    #[test]
    fn test_zero_confluence_forces_zero() {
        let a = analysis(MarketState::StrongUptrend, TrendDirection::Up, 1.0);
        let ind = indicators(0.8, 1.6);
        let htf = [Bias::Bullish, Bias::Bullish, Bias::Bullish];
        let score = ConfidenceScorer::default()
            .evaluate(&request("trend_rider", Direction::Long, &a, &ind, &htf, 0));

        assert_eq!(score.total, 0.0);
        assert!(!score.passed_threshold);
        assert_eq!(score.pillars, PillarScores::default());
        assert!(score.rejection.as_deref().unwrap_or("").contains("insufficient confluence"));
    }

    #[test]
    fn test_range_strategy_gated_outside_range() {
        let ind = indicators(0.8, 1.0);
        let trending = analysis(MarketState::Uptrend, TrendDirection::Up, 0.5);
        let scorer = ConfidenceScorer::default();

        let gated = scorer.evaluate(&request("bollinger_bounce", Direction::Long, &trending, &ind, &[], 3));
        assert_eq!(gated.total, 0.0);
        assert!(!gated.passed_threshold);
        assert!(gated.rejection.unwrap().contains("ranging"));

        let ranging = analysis(MarketState::Range, TrendDirection::Sideways, 0.2);
        let open = scorer.evaluate(&request("bollinger_bounce", Direction::Long, &ranging, &ind, &[], 3));
        assert!(open.total > 0.0);
        assert!(open.rejection.is_none());
    }

    #[test]
    fn test_chasing_extension_penalized_fading_rewarded() {
        let a = analysis(MarketState::Uptrend, TrendDirection::Sideways, 5.0);
        let ind = indicators(0.8, 1.0);
        let htf = [Bias::Neutral, Bias::Neutral];
        let scorer = ConfidenceScorer::default();

        let long = scorer.evaluate(&request("price_action", Direction::Long, &a, &ind, &htf, 2));
        let short = scorer.evaluate(&request("price_action", Direction::Short, &a, &ind, &htf, 2));

        assert!(long.trace.iter().any(|t| t.contains("chasing")));
        assert!(short.trace.iter().any(|t| t.contains("fading")));
        assert!(short.pillars.trend > long.pillars.trend);
        // price_action trend weight 25: long 0.2 share, short 0.65 share
        assert_eq!(long.pillars.trend, 5.0);
        assert_eq!(short.pillars.trend, 16.25);
    }

    #[test]
    fn test_higher_timeframe_weighted_more() {
        let a = analysis(MarketState::Uptrend, TrendDirection::Up, 0.0);
        let ind = indicators(0.8, 1.0);
        let scorer = ConfidenceScorer::default();

        let high_aligned = [Bias::Bearish, Bias::Bullish, Bias::Bullish];
        let low_aligned = [Bias::Bullish, Bias::Bullish, Bias::Bearish];
        let a_score = scorer.evaluate(&request("trend_rider", Direction::Long, &a, &ind, &high_aligned, 2));
        let b_score = scorer.evaluate(&request("trend_rider", Direction::Long, &a, &ind, &low_aligned, 2));
        assert!(a_score.pillars.trend > b_score.pillars.trend);
    }

    #[test]
    fn test_extra_timeframes_drop_lowest() {
        let a = analysis(MarketState::Uptrend, TrendDirection::Up, 0.0);
        let ind = indicators(0.8, 1.0);
        let scorer = ConfidenceScorer::default();

        let four = [Bias::Bearish, Bias::Bullish, Bias::Bullish, Bias::Bullish];
        let three = [Bias::Bullish, Bias::Bullish, Bias::Bullish];
        let with_extra = scorer.evaluate(&request("trend_rider", Direction::Long, &a, &ind, &four, 2));
        let top_three = scorer.evaluate(&request("trend_rider", Direction::Long, &a, &ind, &three, 2));
        assert_eq!(with_extra.pillars.trend, top_three.pillars.trend);
    }

    #[test]
    fn test_high_impact_news_zeroes_sentiment() {
        let a = analysis(MarketState::Uptrend, TrendDirection::Up, 0.0);
        let ind = indicators(0.8, 1.0);
        let mut req = request("trend_rider", Direction::Long, &a, &ind, &[], 2);
        req.high_impact_news = true;
        let score = ConfidenceScorer::default().evaluate(&req);
        assert_eq!(score.pillars.sentiment, 0.0);
        assert!(score.trace.iter().any(|t| t.contains("high-impact news")));
    }

    #[test]
    fn test_positioning_preferred_over_news() {
        let a = analysis(MarketState::Uptrend, TrendDirection::Up, 0.0);
        let ind = indicators(0.8, 1.0);
        let mut req = request("trend_rider", Direction::Long, &a, &ind, &[], 2);
        req.sentiment = SentimentInput { positioning: Some(Bias::Bearish), news: Some(Bias::Bullish) };
        let opposed = ConfidenceScorer::default().evaluate(&req);
        assert_eq!(opposed.pillars.sentiment, 0.0);

        req.sentiment = SentimentInput { positioning: None, news: Some(Bias::Bullish) };
        let news_only = ConfidenceScorer::default().evaluate(&req);
        assert_eq!(news_only.pillars.sentiment, 12.0);
    }

    #[test]
    fn test_extreme_volatility_scores_nothing() {
        let a = analysis(MarketState::Uptrend, TrendDirection::Up, 0.0);
        let ind = indicators(4.0, 1.0);
        let score = ConfidenceScorer::default()
            .evaluate(&request("trend_rider", Direction::Long, &a, &ind, &[], 2));
        assert_eq!(score.pillars.volatility, 0.0);
    }

    #[test]
    fn test_threshold_modes_and_overrides() {
        let mut config = ScoringConfig {
            risk_appetite: RiskAppetite::Conservative,
            ..Default::default()
        };
        config.threshold_overrides.insert("BTCUSD".to_string(), 65.0);
        let scorer = ConfidenceScorer::new(config);

        assert_eq!(scorer.threshold_for("XAUUSD", MarketState::Range), 70.0);
        assert_eq!(scorer.threshold_for("XAUUSD", MarketState::Chaos), 85.0);
        assert_eq!(scorer.threshold_for("XAUUSD", MarketState::HighVolatility), 80.0);
        assert_eq!(scorer.threshold_for("BTCUSD", MarketState::StrongUptrend), 60.0);

        let aggressive = ConfidenceScorer::new(ScoringConfig {
            risk_appetite: RiskAppetite::Aggressive,
            ..Default::default()
        });
        assert_eq!(aggressive.threshold_for("XAUUSD", MarketState::Uptrend), 50.0);
    }

    #[test]
    fn test_weight_overrides() {
        let mut config = ScoringConfig::default();
        config.weight_overrides.insert("EURUSD".to_string(), PillarWeights::new(50.0, 50.0, 0.0, 0.0));
        config
            .weight_overrides
            .insert("EURUSD:trend_rider".to_string(), PillarWeights::new(10.0, 10.0, 10.0, 10.0));
        let scorer = ConfidenceScorer::new(config);

        assert_eq!(scorer.weights_for("EURUSD", "trend_rider"), PillarWeights::new(25.0, 25.0, 25.0, 25.0));
        assert_eq!(scorer.weights_for("EURUSD", "price_action"), PillarWeights::new(50.0, 50.0, 0.0, 0.0));
        assert_eq!(scorer.weights_for("GBPUSD", "trend_rider"), strategy::profile("trend_rider").weights);
    }

    #[test]
    fn test_total_bounded_and_deterministic() {
        let scorer = ConfidenceScorer::default();
        let states = [
            (MarketState::StrongUptrend, TrendDirection::Up, 6.0),
            (MarketState::Range, TrendDirection::Sideways, -4.0),
            (MarketState::Chaos, TrendDirection::Down, 0.0),
            (MarketState::HighVolatility, TrendDirection::Down, -10.0),
        ];
        let biases = [Bias::Bullish, Bias::Bearish, Bias::Neutral];
        for (state, trend, dev) in states {
            let a = analysis(state, trend, dev);
            for (atr, vol) in [(0.1, 0.2), (0.8, 1.3), (2.0, 2.5), (9.0, 0.0)] {
                let ind = indicators(atr, vol);
                for strategy in ["trend_rider", "mean_reversion", "range_scalper", "unknown"] {
                    for direction in [Direction::Long, Direction::Short] {
                        for confluence in [1, 3, 7] {
                            let htf = [biases[confluence as usize % 3], biases[(confluence as usize + 1) % 3]];
                            let req = request(strategy, direction, &a, &ind, &htf, confluence);
                            let first = scorer.evaluate(&req);
                            let second = scorer.evaluate(&req);
                            assert!((0.0..=100.0).contains(&first.total));
                            assert_eq!(first.total, second.total);
                            assert_eq!(first.trace, second.trace);
                        }
                    }
                }
            }
        }
    }
}
