//! Market Regime Classification
//!
//! Classifies a price window into one of seven market states:
//! - StrongUptrend / StrongDowntrend: ADX well above trend level, full EMA stack
//! - Uptrend / Downtrend: trending ADX with price and fast EMAs aligned
//! - Range: weak ADX, no directional stack
//! - HighVolatility: ATR expanded well beyond its own trailing baseline
//! - Chaos: volatility blow-out without directional structure, or unusable input
//!
//! The classifier uses:
//! - Wilder ADX-14 for trend strength
//! - ATR-14 normalized against the mean ATR of the trailing window
//! - EMA 20/50/200 ordering and the close's deviation from EMA-200
//!
//! Each state maps to the strategy clusters that tend to work in it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::PriceSeries;

/// Market state classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketState {
    StrongUptrend,
    Uptrend,
    Downtrend,
    StrongDowntrend,
    Range,
    HighVolatility,
    Chaos,
}

impl MarketState {
    /// Convert to database-storable string
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::StrongUptrend => "STRONG_UPTREND",
            MarketState::Uptrend => "UPTREND",
            MarketState::Downtrend => "DOWNTREND",
            MarketState::StrongDowntrend => "STRONG_DOWNTREND",
            MarketState::Range => "RANGE",
            MarketState::HighVolatility => "HIGH_VOLATILITY",
            MarketState::Chaos => "CHAOS",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STRONG_UPTREND" => Some(MarketState::StrongUptrend),
            "UPTREND" => Some(MarketState::Uptrend),
            "DOWNTREND" => Some(MarketState::Downtrend),
            "STRONG_DOWNTREND" => Some(MarketState::StrongDowntrend),
            "RANGE" => Some(MarketState::Range),
            "HIGH_VOLATILITY" => Some(MarketState::HighVolatility),
            "CHAOS" => Some(MarketState::Chaos),
            _ => None,
        }
    }

    /// Strategy clusters compatible with this state. Never empty.
    pub fn suitable_clusters(&self) -> &'static [StrategyCluster] {
        use StrategyCluster::*;
        match self {
            MarketState::StrongUptrend | MarketState::StrongDowntrend => &[TrendFollowing, Breakout],
            MarketState::Uptrend | MarketState::Downtrend => &[TrendFollowing, PriceAction, Breakout],
            MarketState::Range => &[MeanReversion, PriceAction, Scalping],
            MarketState::HighVolatility => &[Breakout, Scalping],
            MarketState::Chaos => &[PriceAction],
        }
    }

    pub fn is_trending(&self) -> bool {
        matches!(
            self,
            MarketState::StrongUptrend
                | MarketState::Uptrend
                | MarketState::Downtrend
                | MarketState::StrongDowntrend
        )
    }
}

impl std::fmt::Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Families of strategies that share a market-condition preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyCluster {
    TrendFollowing,
    MeanReversion,
    Breakout,
    PriceAction,
    Scalping,
}

impl StrategyCluster {
    pub fn all() -> [StrategyCluster; 5] {
        [
            StrategyCluster::TrendFollowing,
            StrategyCluster::MeanReversion,
            StrategyCluster::Breakout,
            StrategyCluster::PriceAction,
            StrategyCluster::Scalping,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyCluster::TrendFollowing => "trend_following",
            StrategyCluster::MeanReversion => "mean_reversion",
            StrategyCluster::Breakout => "breakout",
            StrategyCluster::PriceAction => "price_action",
            StrategyCluster::Scalping => "scalping",
        }
    }
}

impl std::fmt::Display for StrategyCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Net direction of the fast EMAs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

/// Result of one classification pass. Recomputed every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub state: MarketState,
    pub trend: TrendDirection,
    pub adx: f64,
    /// ATR as a percentage of the last close
    pub volatility: f64,
    /// Current ATR divided by the trailing mean ATR
    pub normalized_volatility: f64,
    /// (close - EMA200) / EMA200 * 100
    pub ema200_deviation_pct: f64,
    pub suitable_clusters: Vec<StrategyCluster>,
    pub blocked_clusters: Vec<StrategyCluster>,
    pub sample_count: usize,
}

impl MarketAnalysis {
    /// Conservative fallback: chaos with every cluster blocked
    pub fn degenerate(sample_count: usize) -> Self {
        Self {
            state: MarketState::Chaos,
            trend: TrendDirection::Sideways,
            adx: 0.0,
            volatility: 0.0,
            normalized_volatility: 0.0,
            ema200_deviation_pct: 0.0,
            suitable_clusters: Vec::new(),
            blocked_clusters: StrategyCluster::all().to_vec(),
            sample_count,
        }
    }

    /// True when the analysis came from the fallback path
    pub fn is_degenerate(&self) -> bool {
        self.suitable_clusters.is_empty()
    }

    pub fn is_suitable(&self, cluster: StrategyCluster) -> bool {
        self.suitable_clusters.contains(&cluster)
    }
}

/// Tunable classification boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    pub min_samples: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    pub baseline_window: usize,
    pub range_adx: f64,
    pub trend_adx: f64,
    pub strong_trend_adx: f64,
    pub high_volatility_ratio: f64,
    pub chaos_volatility_ratio: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            min_samples: 50,
            atr_period: 14,
            adx_period: 14,
            baseline_window: 50,
            range_adx: 20.0,
            trend_adx: 25.0,
            strong_trend_adx: 40.0,
            high_volatility_ratio: 1.5,
            chaos_volatility_ratio: 2.0,
        }
    }
}

/// Stateless regime classifier
#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RegimeThresholds {
        &self.thresholds
    }

    /// Classify a price window. Never fails: short or malformed input
    /// produces the degenerate chaos analysis.
    pub fn analyze(&self, series: &PriceSeries) -> MarketAnalysis {
        let t = &self.thresholds;
        let n = series.len();

        if n < t.min_samples.max(2) || !series.is_well_formed() {
            debug!(samples = n, "regime fallback: insufficient or malformed history");
            return MarketAnalysis::degenerate(n);
        }

        let closes = &series.closes;
        let last_close = closes[n - 1];

        let atr = atr_series(&series.highs, &series.lows, closes, t.atr_period);
        let atr_now = atr[n - 1];
        let window = t.baseline_window.min(n);
        let baseline = atr[n - window..].iter().sum::<f64>() / window as f64;
        let normalized_volatility = if baseline > 0.0 { atr_now / baseline } else { 1.0 };
        let volatility = atr_now / last_close * 100.0;

        let adx = adx(&series.highs, &series.lows, closes, t.adx_period);

        let ema20 = ema_last(closes, 20);
        let ema50 = ema_last(closes, 50);
        let ema200 = ema_last(closes, 200);
        let ema200_deviation_pct = if ema200 > 0.0 {
            (last_close - ema200) / ema200 * 100.0
        } else {
            0.0
        };

        let bullish_stack = last_close > ema20 && ema20 > ema50;
        let bearish_stack = last_close < ema20 && ema20 < ema50;

        let trend = if ema20 > ema50 && last_close > ema50 {
            TrendDirection::Up
        } else if ema20 < ema50 && last_close < ema50 {
            TrendDirection::Down
        } else {
            TrendDirection::Sideways
        };

        let state = if normalized_volatility >= t.chaos_volatility_ratio && adx < t.trend_adx {
            MarketState::Chaos
        } else if normalized_volatility >= t.high_volatility_ratio && adx < t.strong_trend_adx {
            MarketState::HighVolatility
        } else if adx >= t.strong_trend_adx && bullish_stack && ema50 > ema200 {
            MarketState::StrongUptrend
        } else if adx >= t.strong_trend_adx && bearish_stack && ema50 < ema200 {
            MarketState::StrongDowntrend
        } else if adx >= t.trend_adx && bullish_stack {
            MarketState::Uptrend
        } else if adx >= t.trend_adx && bearish_stack {
            MarketState::Downtrend
        } else {
            MarketState::Range
        };

        let suitable_clusters = state.suitable_clusters().to_vec();
        let blocked_clusters = StrategyCluster::all()
            .into_iter()
            .filter(|c| !suitable_clusters.contains(c))
            .collect();

        MarketAnalysis {
            state,
            trend,
            adx,
            volatility,
            normalized_volatility,
            ema200_deviation_pct,
            suitable_clusters,
            blocked_clusters,
            sample_count: n,
        }
    }
}

/// Classify with default thresholds
pub fn classify(series: &PriceSeries) -> MarketAnalysis {
    RegimeClassifier::default().analyze(series)
}

/// Last value of an EMA seeded with the first observation
fn ema_last(values: &[f64], period: usize) -> f64 {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut iter = values.iter();
    let mut ema = match iter.next() {
        Some(v) => *v,
        None => return 0.0,
    };
    for v in iter {
        ema = alpha * v + (1.0 - alpha) * ema;
    }
    ema
}

fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
        None => high - low,
    }
}

/// Wilder ATR for every bar. Bars inside the warmup use the running mean.
fn atr_series(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(closes.len());
    let mut sum = 0.0;
    let mut atr = 0.0;
    for i in 0..closes.len() {
        let prev = if i > 0 { Some(closes[i - 1]) } else { None };
        let tr = true_range(highs[i], lows[i], prev);
        if i < period {
            sum += tr;
            atr = sum / (i + 1) as f64;
        } else {
            atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        }
        out.push(atr);
    }
    out
}

/// Wilder ADX at the last bar. Returns 0 when there is not enough history.
fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let n = closes.len();
    let period = period.max(1);
    if n < period * 2 + 1 {
        return 0.0;
    }

    let p = period as f64;
    let mut sm_tr = 0.0;
    let mut sm_plus = 0.0;
    let mut sm_minus = 0.0;
    let mut dx_values: Vec<f64> = Vec::with_capacity(n);

    for i in 1..n {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        let tr = true_range(highs[i], lows[i], Some(closes[i - 1]));

        if i <= period {
            sm_tr += tr;
            sm_plus += plus_dm;
            sm_minus += minus_dm;
            if i < period {
                continue;
            }
        } else {
            sm_tr = sm_tr - sm_tr / p + tr;
            sm_plus = sm_plus - sm_plus / p + plus_dm;
            sm_minus = sm_minus - sm_minus / p + minus_dm;
        }

        if sm_tr <= 0.0 {
            dx_values.push(0.0);
            continue;
        }
        let di_plus = sm_plus / sm_tr * 100.0;
        let di_minus = sm_minus / sm_tr * 100.0;
        let di_sum = di_plus + di_minus;
        let dx = if di_sum > 0.0 { (di_plus - di_minus).abs() / di_sum * 100.0 } else { 0.0 };
        dx_values.push(dx);
    }

    if dx_values.len() < period {
        return 0.0;
    }
    let mut adx = dx_values[..period].iter().sum::<f64>() / p;
    for dx in &dx_values[period..] {
        adx = (adx * (p - 1.0) + dx) / p;
    }
    adx
}
