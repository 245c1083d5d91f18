//! Decision pipeline
//!
//! Runs one candidate through classifier, scorer and coordinator:
//! regime first, then the confidence score against its dynamic threshold,
//! and only a passing score reaches the execution coordinator.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::confidence::{ConfidenceScore, ConfidenceScorer, ScoreRequest, SentimentInput};
use crate::core::coordinator::{ExecutionCoordinator, OpenedTrade, TradeRequest};
use crate::core::regime::{MarketAnalysis, RegimeClassifier};
use crate::core::types::{Bias, Direction, IndicatorMap, PriceSeries};
use crate::error::ExecutionError;

/// A raw trade idea with everything needed to judge it
#[derive(Debug, Clone)]
pub struct Candidate {
    pub asset: String,
    pub strategy: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub time_exit_minutes: i64,
    pub series: PriceSeries,
    pub indicators: IndicatorMap,
    /// Ordered lowest to highest timeframe
    pub higher_timeframes: Vec<Bias>,
    pub sentiment: SentimentInput,
    pub high_impact_news: bool,
    pub confluence_count: u32,
}

#[derive(Debug)]
pub enum Decision {
    /// Score below threshold or fast-rejected
    Skipped { score: ConfidenceScore },
    Opened { trade: OpenedTrade, score: ConfidenceScore },
    /// Score passed but the coordinator refused or failed
    Refused { error: ExecutionError, score: ConfidenceScore },
}

impl Decision {
    pub fn score(&self) -> &ConfidenceScore {
        match self {
            Decision::Skipped { score }
            | Decision::Opened { score, .. }
            | Decision::Refused { score, .. } => score,
        }
    }

    pub fn is_opened(&self) -> bool {
        matches!(self, Decision::Opened { .. })
    }
}

#[derive(Serialize)]
struct ScoreSummary<'a> {
    total: f64,
    threshold: f64,
    suitability: &'a str,
}

pub struct DecisionEngine {
    classifier: RegimeClassifier,
    scorer: ConfidenceScorer,
    coordinator: Arc<ExecutionCoordinator>,
}

impl DecisionEngine {
    pub fn new(
        classifier: RegimeClassifier,
        scorer: ConfidenceScorer,
        coordinator: Arc<ExecutionCoordinator>,
    ) -> Self {
        Self { classifier, scorer, coordinator }
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    pub async fn consider(&self, candidate: &Candidate) -> Decision {
        let analysis = self.classifier.analyze(&candidate.series);
        self.consider_with(candidate, &analysis).await
    }

    /// Same as [`consider`](Self::consider) with a regime computed by the caller
    pub async fn consider_with(&self, candidate: &Candidate, analysis: &MarketAnalysis) -> Decision {
        let score = self.scorer.evaluate(&ScoreRequest {
            asset: &candidate.asset,
            strategy: &candidate.strategy,
            direction: candidate.direction,
            indicators: &candidate.indicators,
            analysis,
            higher_timeframes: &candidate.higher_timeframes,
            sentiment: candidate.sentiment,
            high_impact_news: candidate.high_impact_news,
            confluence_count: candidate.confluence_count,
        });

        if !score.passed_threshold {
            debug!(
                asset = %candidate.asset,
                strategy = %candidate.strategy,
                total = score.total,
                threshold = score.threshold,
                "below threshold"
            );
            return Decision::Skipped { score };
        }

        info!(
            asset = %candidate.asset,
            strategy = %candidate.strategy,
            direction = %candidate.direction,
            regime = %analysis.state,
            total = score.total,
            threshold = score.threshold,
            "signal passed, requesting execution"
        );

        let summary = ScoreSummary {
            total: score.total,
            threshold: score.threshold,
            suitability: score.suitability.as_str(),
        };
        let request = TradeRequest {
            asset: candidate.asset.clone(),
            direction: candidate.direction,
            strategy: candidate.strategy.clone(),
            volume: candidate.volume,
            entry_price: candidate.entry_price,
            stop_loss: candidate.stop_loss,
            take_profit: candidate.take_profit,
            time_exit_minutes: candidate.time_exit_minutes,
            metadata: serde_json::to_value(&summary).unwrap_or(serde_json::Value::Null),
        };

        match self.coordinator.try_open_trade(&request, analysis).await {
            Ok(trade) => Decision::Opened { trade, score },
            Err(error) => Decision::Refused { error, score },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::core::guardian::{ExecutionPolicy, Violation};
    use crate::core::regime::{MarketState, StrategyCluster, TrendDirection};
    use crate::core::risk_circuit::RiskCircuitConfig;
    use crate::data::memory::MemoryStore;
    use rust_decimal_macros::dec;

    fn strong_uptrend() -> MarketAnalysis {
        MarketAnalysis {
            state: MarketState::StrongUptrend,
            trend: TrendDirection::Up,
            adx: 45.0,
            volatility: 0.8,
            normalized_volatility: 1.0,
            ema200_deviation_pct: 1.0,
            suitable_clusters: MarketState::StrongUptrend.suitable_clusters().to_vec(),
            blocked_clusters: vec![
                StrategyCluster::MeanReversion,
                StrategyCluster::PriceAction,
                StrategyCluster::Scalping,
            ],
            sample_count: 300,
        }
    }

    fn candidate() -> Candidate {
        let mut indicators = IndicatorMap::new();
        indicators.insert("atr_pct".to_string(), 0.8);
        indicators.insert("volume_ratio".to_string(), 1.6);
        Candidate {
            asset: "XAUUSD".to_string(),
            strategy: "trend_rider".to_string(),
            direction: Direction::Long,
            volume: dec!(0.1),
            entry_price: dec!(2650),
            stop_loss: dec!(2640),
            take_profit: dec!(2670),
            time_exit_minutes: 0,
            series: PriceSeries::default(),
            indicators,
            higher_timeframes: vec![Bias::Bullish, Bias::Bullish, Bias::Bullish],
            sentiment: SentimentInput { positioning: Some(Bias::Bullish), news: None },
            high_impact_news: false,
            confluence_count: 4,
        }
    }

    async fn engine() -> DecisionEngine {
        let broker = Arc::new(PaperBroker::default());
        broker.add_account("paper", dec!(100000)).await;
        broker.set_price("XAUUSD", dec!(2650)).await;
        let coordinator = ExecutionCoordinator::new(
            broker,
            Arc::new(MemoryStore::new()),
            ExecutionPolicy { platforms: vec!["paper".to_string()], ..ExecutionPolicy::default() },
            RiskCircuitConfig::default(),
        );
        DecisionEngine::new(RegimeClassifier::default(), ConfidenceScorer::default(), Arc::new(coordinator))
    }

    #[tokio::test]
    async fn test_passing_signal_opens_once() {
        let engine = engine().await;
        let analysis = strong_uptrend();

        let first = engine.consider_with(&candidate(), &analysis).await;
        assert!(first.is_opened());
        assert_eq!(first.score().total, 100.0);

        // Same signal again inside the first-entry guard
        let second = engine.consider_with(&candidate(), &analysis).await;
        match second {
            Decision::Refused { error: ExecutionError::InvariantViolated(v), .. } => {
                assert!(matches!(v, Violation::AssetCooldown { .. }))
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_history_blocks_execution() {
        // Too little history: chaos fallback with every cluster blocked.
        // The score can still pass its raised threshold; the coordinator refuses.
        let engine = engine().await;
        let decision = engine.consider(&candidate()).await;
        assert_eq!(decision.score().threshold, 75.0);
        assert!(matches!(
            decision,
            Decision::Refused { error: ExecutionError::InvariantViolated(Violation::RegimeBlocked), .. }
        ));
        assert!(engine.coordinator().tracked_trades().await.is_empty());
    }

    #[tokio::test]
    async fn test_weak_signal_is_skipped() {
        let engine = engine().await;
        let mut weak = candidate();
        weak.higher_timeframes = vec![Bias::Bearish, Bias::Bearish, Bias::Bearish];
        weak.sentiment = SentimentInput { positioning: Some(Bias::Bearish), news: None };
        weak.confluence_count = 1;

        let decision = engine.consider_with(&weak, &strong_uptrend()).await;
        assert!(matches!(decision, Decision::Skipped { .. }));
        assert!(!decision.score().passed_threshold);
    }
}
