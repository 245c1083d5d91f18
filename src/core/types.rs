//! Core type definitions shared by the decision and execution layers
//!
//! These types are used throughout the system and represent
//! the fundamental concepts of trading.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Precomputed indicator values keyed by name (e.g. `atr_pct`, `volume_ratio`)
pub type IndicatorMap = HashMap<String, f64>;

/// Represents a single price candle (OHLCV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Timestamp of the candle open
    pub time: DateTime<Utc>,
    /// Opening price
    pub open: Decimal,
    /// Highest price during the period
    pub high: Decimal,
    /// Lowest price during the period
    pub low: Decimal,
    /// Closing price
    pub close: Decimal,
    /// Volume traded during the period
    pub volume: Decimal,
}

impl Candle {
    /// Create a new candle
    pub fn new(
        time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self { time, open, high, low, close, volume }
    }
}

/// Immutable per-cycle snapshot of one asset's price history.
///
/// Stored as `f64` columns because everything downstream is indicator math.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl PriceSeries {
    pub fn new(highs: Vec<f64>, lows: Vec<f64>, closes: Vec<f64>, volumes: Vec<f64>) -> Self {
        Self { highs, lows, closes, volumes }
    }

    /// Build a series from candles, oldest first
    pub fn from_candles(candles: &[Candle]) -> Self {
        let mut series = Self::default();
        for c in candles {
            series.highs.push(c.high.to_f64().unwrap_or(f64::NAN));
            series.lows.push(c.low.to_f64().unwrap_or(f64::NAN));
            series.closes.push(c.close.to_f64().unwrap_or(f64::NAN));
            series.volumes.push(c.volume.to_f64().unwrap_or(0.0));
        }
        series
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Lengths agree, prices are finite and positive, and no bar has high < low
    pub fn is_well_formed(&self) -> bool {
        let n = self.closes.len();
        if self.highs.len() != n || self.lows.len() != n {
            return false;
        }
        if !self.volumes.is_empty() && self.volumes.len() != n {
            return false;
        }
        (0..n).all(|i| {
            let (h, l, c) = (self.highs[i], self.lows[i], self.closes[i]);
            h.is_finite() && l.is_finite() && c.is_finite() && l > 0.0 && h >= l
        })
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Infer the direction from where the target sits relative to entry.
    ///
    /// A target equal to entry falls back to the stop-loss side.
    pub fn from_levels(entry: Decimal, stop_loss: Decimal, take_profit: Decimal) -> Self {
        if take_profit > entry {
            Direction::Long
        } else if take_profit < entry {
            Direction::Short
        } else if stop_loss > entry {
            Direction::Short
        } else {
            Direction::Long
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Some(Direction::Long),
            "SELL" | "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directional label produced by an external trend or sentiment source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    /// Lenient parse; anything unrecognized is neutral
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" | "up" | "uptrend" | "strong_uptrend" | "long" => Bias::Bullish,
            "bearish" | "down" | "downtrend" | "strong_downtrend" | "short" => Bias::Bearish,
            _ => Bias::Neutral,
        }
    }

    /// Does this label agree with a trade direction?
    pub fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bullish, Direction::Long) | (Bias::Bearish, Direction::Short)
        )
    }

    pub fn opposes(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bullish, Direction::Short) | (Bias::Bearish, Direction::Long)
        )
    }
}

/// Account information as reported live by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
}

impl AccountInfo {
    /// Margin in use as a percentage of equity.
    ///
    /// An account with no equity counts as fully utilized.
    pub fn utilization_pct(&self) -> Decimal {
        if self.equity <= Decimal::ZERO {
            return Decimal::ONE_HUNDRED;
        }
        self.margin / self.equity * Decimal::ONE_HUNDRED
    }
}

/// Open position as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub profit: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_series_from_candles() {
        let candles = vec![
            Candle::new(Utc::now(), dec!(100), dec!(101), dec!(99), dec!(100.5), dec!(10)),
            Candle::new(Utc::now(), dec!(100.5), dec!(102), dec!(100), dec!(101.5), dec!(12)),
        ];
        let series = PriceSeries::from_candles(&candles);
        assert_eq!(series.len(), 2);
        assert!(series.is_well_formed());
        assert_eq!(series.closes[1], 101.5);
    }

    #[test]
    fn test_series_malformed() {
        let series = PriceSeries::new(vec![1.0, 2.0], vec![1.5], vec![1.0, 2.0], vec![]);
        assert!(!series.is_well_formed());

        let inverted = PriceSeries::new(vec![1.0], vec![2.0], vec![1.5], vec![]);
        assert!(!inverted.is_well_formed());

        let nan = PriceSeries::new(vec![f64::NAN], vec![1.0], vec![1.0], vec![]);
        assert!(!nan.is_well_formed());
    }

    #[test]
    fn test_direction_from_levels() {
        assert_eq!(Direction::from_levels(dec!(100), dec!(95), dec!(110)), Direction::Long);
        assert_eq!(Direction::from_levels(dec!(100), dec!(105), dec!(90)), Direction::Short);
        assert_eq!(Direction::from_levels(dec!(100), dec!(105), dec!(100)), Direction::Short);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("buy"), Some(Direction::Long));
        assert_eq!(Direction::parse("SHORT"), Some(Direction::Short));
        assert_eq!(Direction::parse("hold"), None);
    }

    #[test]
    fn test_bias_alignment() {
        assert!(Bias::parse("Bullish").agrees_with(Direction::Long));
        assert!(Bias::parse("downtrend").opposes(Direction::Long));
        assert_eq!(Bias::parse("sideways"), Bias::Neutral);
        assert!(!Bias::Neutral.agrees_with(Direction::Short));
    }

    #[test]
    fn test_account_utilization() {
        let account = AccountInfo { balance: dec!(10000), equity: dec!(10000), margin: dec!(2500) };
        assert_eq!(account.utilization_pct(), dec!(25));

        let empty = AccountInfo { balance: dec!(0), equity: dec!(0), margin: dec!(0) };
        assert_eq!(empty.utilization_pct(), dec!(100));
    }
}
