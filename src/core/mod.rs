//! Core decision logic
//!
//! Leaves first: `types`, `regime`, `strategy`, `suitability`,
//! `confidence`, `risk_circuit`, `guardian`; then `coordinator`, which ties
//! them to the broker and the shared store, and `decision`, which runs a
//! candidate through all of it.

pub mod types;
pub mod regime;
pub mod strategy;
pub mod suitability;
pub mod confidence;
pub mod risk_circuit;
pub mod guardian;
pub mod coordinator;
pub mod decision;

// Re-export commonly used types
pub use confidence::{ConfidenceScore, ConfidenceScorer, RiskAppetite, ScoreRequest, ScoringConfig, SentimentInput};
pub use coordinator::{ExecutionCoordinator, OpenedTrade, PositionTick, RiskEvent, TradeRequest};
pub use decision::{Candidate, Decision, DecisionEngine};
pub use guardian::{ExecutionGuard, ExecutionPolicy, Violation};
pub use regime::{MarketAnalysis, MarketState, RegimeClassifier, RegimeThresholds, StrategyCluster};
pub use risk_circuit::{RiskAction, RiskCircuitConfig, RiskCircuitMonitor, TickOutcome, TradeRegistration};
pub use suitability::{Suitability, SuitabilityTier};
pub use types::{AccountInfo, Bias, Candle, Direction, IndicatorMap, OpenPosition, PriceSeries};
