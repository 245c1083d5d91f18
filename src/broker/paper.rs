//! Paper broker
//!
//! Simulated accounts that fill market orders at the last price pushed in
//! with [`PaperBroker::set_price`]. Margin is `volume * price * margin_rate`;
//! profit is the price move times volume times contract size. Tickets are
//! seeded from the wall clock so a restarted process does not hand out
//! tickets an earlier run already used.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::{Broker, OrderResult};
use crate::core::types::{AccountInfo, Direction, OpenPosition};

#[derive(Debug, Clone)]
struct PaperPosition {
    ticket: u64,
    symbol: String,
    direction: Direction,
    volume: Decimal,
    entry_price: Decimal,
    margin: Decimal,
}

#[derive(Debug, Default)]
struct PaperAccount {
    balance: Decimal,
    positions: Vec<PaperPosition>,
}

#[derive(Debug, Default)]
struct PaperState {
    accounts: HashMap<String, PaperAccount>,
    prices: HashMap<String, Decimal>,
    next_ticket: u64,
}

impl PaperState {
    fn profit_of(&self, pos: &PaperPosition, contract_size: Decimal) -> Decimal {
        let price = self.prices.get(&pos.symbol).copied().unwrap_or(pos.entry_price);
        (price - pos.entry_price) * pos.direction.sign() * pos.volume * contract_size
    }
}

pub struct PaperBroker {
    state: Mutex<PaperState>,
    margin_rate: Decimal,
    contract_size: Decimal,
}

impl PaperBroker {
    /// `margin_rate` 0.01 corresponds to 1:100 leverage
    pub fn new(margin_rate: Decimal, contract_size: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                next_ticket: Utc::now().timestamp_millis().max(1) as u64,
                ..Default::default()
            }),
            margin_rate,
            contract_size,
        }
    }

    pub async fn add_account(&self, platform: &str, balance: Decimal) {
        let mut state = self.state.lock().await;
        state.accounts.insert(
            platform.to_string(),
            PaperAccount {
                balance,
                positions: Vec::new(),
            },
        );
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().await.prices.insert(symbol.to_string(), price);
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(dec!(0.01), Decimal::ONE)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn get_account_info(&self, platform: &str) -> Result<AccountInfo> {
        let state = self.state.lock().await;
        let account = state
            .accounts
            .get(platform)
            .ok_or_else(|| anyhow!("unknown paper account {}", platform))?;

        let floating: Decimal = account
            .positions
            .iter()
            .map(|p| state.profit_of(p, self.contract_size))
            .sum();
        let margin: Decimal = account.positions.iter().map(|p| p.margin).sum();

        Ok(AccountInfo {
            balance: account.balance,
            equity: account.balance + floating,
            margin,
        })
    }

    async fn get_open_positions(&self, platform: &str) -> Result<Vec<OpenPosition>> {
        let state = self.state.lock().await;
        let account = state
            .accounts
            .get(platform)
            .ok_or_else(|| anyhow!("unknown paper account {}", platform))?;

        Ok(account
            .positions
            .iter()
            .map(|p| OpenPosition {
                ticket: p.ticket,
                symbol: p.symbol.clone(),
                direction: p.direction,
                volume: p.volume,
                entry_price: p.entry_price,
                current_price: state.prices.get(&p.symbol).copied().unwrap_or(p.entry_price),
                profit: state.profit_of(p, self.contract_size),
            })
            .collect())
    }

    async fn place_order(
        &self,
        platform: &str,
        symbol: &str,
        direction: Direction,
        volume: Decimal,
    ) -> Result<OrderResult> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(platform) {
            return Err(anyhow!("unknown paper account {}", platform));
        }
        if volume <= Decimal::ZERO {
            return Ok(OrderResult::rejected("volume must be positive"));
        }
        let price = match state.prices.get(symbol) {
            Some(p) => *p,
            None => return Ok(OrderResult::rejected(format!("no price for {}", symbol))),
        };

        let margin = volume * price * self.margin_rate;
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let account = match state.accounts.get_mut(platform) {
            Some(a) => a,
            None => return Err(anyhow!("unknown paper account {}", platform)),
        };
        let used: Decimal = account.positions.iter().map(|p| p.margin).sum();
        if used + margin > account.balance {
            warn!(platform, symbol, %margin, "paper order rejected: insufficient margin");
            return Ok(OrderResult::rejected("insufficient margin"));
        }

        account.positions.push(PaperPosition {
            ticket,
            symbol: symbol.to_string(),
            direction,
            volume,
            entry_price: price,
            margin,
        });
        info!(platform, symbol, %direction, %volume, %price, ticket, "paper fill");
        Ok(OrderResult::filled(ticket, price))
    }

    async fn close_position(&self, platform: &str, ticket: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let (idx, profit) = {
            let account = state
                .accounts
                .get(platform)
                .ok_or_else(|| anyhow!("unknown paper account {}", platform))?;
            match account.positions.iter().position(|p| p.ticket == ticket) {
                Some(idx) => (idx, state.profit_of(&account.positions[idx], self.contract_size)),
                None => return Ok(false),
            }
        };

        if let Some(account) = state.accounts.get_mut(platform) {
            account.positions.remove(idx);
            account.balance += profit;
            info!(platform, ticket, %profit, "paper position closed");
        }
        Ok(true)
    }
}
