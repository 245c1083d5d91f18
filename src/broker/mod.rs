//! Broker Module
//!
//! The execution core talks to brokers only through [`Broker`]. Order
//! transport (MT5 bridge, REST, FIX) lives outside this crate; `paper` is a
//! simulated implementation for dry runs and tests.

pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::{AccountInfo, Direction, OpenPosition};

pub use paper::PaperBroker;

/// Broker trait - every account connector implements this.
///
/// An `Err` means the broker could not be reached; an explicit refusal is an
/// `Ok(OrderResult { success: false, .. })`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Live balance / equity / margin for one account
    async fn get_account_info(&self, platform: &str) -> Result<AccountInfo>;

    /// Open positions on one account
    async fn get_open_positions(&self, platform: &str) -> Result<Vec<OpenPosition>>;

    /// Market order
    async fn place_order(
        &self,
        platform: &str,
        symbol: &str,
        direction: Direction,
        volume: Decimal,
    ) -> Result<OrderResult>;

    /// `true` when the position was closed
    async fn close_position(&self, platform: &str, ticket: u64) -> Result<bool>;
}

/// Order result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub ticket: Option<u64>,
    pub price: Option<Decimal>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn filled(ticket: u64, price: Decimal) -> Self {
        Self {
            success: true,
            ticket: Some(ticket),
            price: Some(price),
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            ticket: None,
            price: None,
            error: Some(reason.into()),
        }
    }
}
