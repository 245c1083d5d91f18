//! Signal inbox
//!
//! Strategy processes hand candidate signals to workers through a JSON-lines
//! file, one signal per line. A worker takes the whole file by renaming it,
//! so with several workers on one inbox each line is consumed exactly once.

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, warn};

use crate::core::confidence::SentimentInput;
use crate::core::decision::Candidate;
use crate::core::types::{Bias, Candle, Direction, IndicatorMap, PriceSeries};

/// One line of the inbox
#[derive(Debug, Clone, Deserialize)]
pub struct SignalMessage {
    pub asset: String,
    pub strategy: String,
    /// BUY / SELL (LONG / SHORT accepted)
    pub direction: String,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    #[serde(default)]
    pub time_exit_minutes: i64,
    /// Oldest first
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub indicators: IndicatorMap,
    /// Lowest to highest timeframe, e.g. `["bullish", "neutral"]`
    #[serde(default)]
    pub higher_timeframes: Vec<String>,
    #[serde(default)]
    pub positioning: Option<String>,
    #[serde(default)]
    pub news: Option<String>,
    #[serde(default)]
    pub high_impact_news: bool,
    #[serde(default)]
    pub confluence_count: u32,
}

impl SignalMessage {
    /// Latest close, used to mark the asset before execution
    pub fn last_close(&self) -> Option<Decimal> {
        self.candles.last().map(|c| c.close)
    }

    pub fn into_candidate(self) -> Result<Candidate> {
        let direction = Direction::parse(&self.direction)
            .ok_or_else(|| anyhow!("{}: unknown direction {:?}", self.asset, self.direction))?;
        Ok(Candidate {
            series: PriceSeries::from_candles(&self.candles),
            higher_timeframes: self.higher_timeframes.iter().map(|s| Bias::parse(s)).collect(),
            sentiment: SentimentInput {
                positioning: self.positioning.as_deref().map(Bias::parse),
                news: self.news.as_deref().map(Bias::parse),
            },
            asset: self.asset,
            strategy: self.strategy,
            direction,
            volume: self.volume,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            time_exit_minutes: self.time_exit_minutes,
            indicators: self.indicators,
            high_impact_news: self.high_impact_news,
            confluence_count: self.confluence_count,
        })
    }
}

/// Parse inbox contents; blank lines and `#` comments are skipped, bad
/// lines are logged and dropped.
pub fn parse_signals(contents: &str) -> Vec<SignalMessage> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(line = n, error = %e, "skipping malformed signal");
                None
            }
        })
        .collect()
}

pub struct SignalInbox {
    path: String,
    claim_path: String,
}

impl SignalInbox {
    pub fn new(path: &str, worker_id: &str) -> Self {
        Self {
            path: path.to_string(),
            claim_path: format!("{}.{}.taken", path, worker_id),
        }
    }

    /// Take every pending signal. An absent inbox is just empty.
    pub fn drain(&self) -> Result<Vec<SignalMessage>> {
        match fs::rename(&self.path, &self.claim_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("claiming {}", self.path)),
        }
        let contents = fs::read_to_string(&self.claim_path)
            .with_context(|| format!("reading {}", self.claim_path))?;
        fs::remove_file(&self.claim_path).with_context(|| format!("removing {}", self.claim_path))?;

        let signals = parse_signals(&contents);
        debug!(count = signals.len(), "signals taken from inbox");
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const LINE: &str = r#"{"asset":"XAUUSD","strategy":"trend_rider","direction":"buy","volume":"0.1","entry_price":"2650","stop_loss":"2640","take_profit":"2670","candles":[{"time":"2026-01-05T10:00:00Z","open":"2648","high":"2652","low":"2647","close":"2650","volume":"120"}],"higher_timeframes":["bullish","up"],"positioning":"bullish","confluence_count":2}"#;

    #[test]
    fn test_parse_skips_comments_and_garbage() {
        let contents = format!("# queued by strategy host\n\n{}\nnot json\n", LINE);
        let signals = parse_signals(&contents);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].last_close(), Some(dec!(2650)));
    }

    #[test]
    fn test_into_candidate() {
        let msg: SignalMessage = serde_json::from_str(LINE).unwrap();
        let c = msg.into_candidate().unwrap();
        assert_eq!(c.direction, Direction::Long);
        assert_eq!(c.series.len(), 1);
        assert_eq!(c.series.closes[0], 2650.0);
        assert_eq!(c.higher_timeframes, vec![Bias::Bullish, Bias::Bullish]);
        assert_eq!(c.sentiment.positioning, Some(Bias::Bullish));
        assert_eq!(c.sentiment.news, None);
        assert_eq!(c.confluence_count, 2);
    }

    #[test]
    fn test_unknown_direction_rejected() {
        let mut msg: SignalMessage = serde_json::from_str(LINE).unwrap();
        msg.direction = "sideways".to_string();
        assert!(msg.into_candidate().is_err());
    }

    #[test]
    fn test_drain_consumes_file_once() {
        let path = std::env::temp_dir()
            .join(format!("sentinel-inbox-{}.jsonl", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        let inbox = SignalInbox::new(&path, "w1");
        assert!(inbox.drain().unwrap().is_empty());

        fs::write(&path, format!("{}\n{}\n", LINE, LINE)).unwrap();
        assert_eq!(inbox.drain().unwrap().len(), 2);
        assert!(inbox.drain().unwrap().is_empty());
        assert!(!std::path::Path::new(&path).exists());
    }
}
