//! Execution Guard
//!
//! The gatekeeper for new positions. The coordinator re-runs these checks
//! under its locks right before it talks to the broker, so every check here
//! is a pure function of values the coordinator just read.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::AccountInfo;

/// Execution policy (limits for protection, not strategy)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Max simultaneous positions per asset
    pub max_positions_per_asset: usize,
    /// A first position is refused if the asset traded this recently (seconds)
    pub first_entry_guard_secs: i64,
    /// Minimum wait after the previous entry before adding a second position
    pub second_entry_cooldown_secs: i64,
    /// Cooldown per (platform, asset)
    pub account_cooldown_secs: i64,
    /// Max new trades across all assets in any rolling hour
    pub max_trades_per_hour: usize,
    /// Max margin / equity per account (percent)
    pub max_utilization_pct: Decimal,
    /// Headroom kept below the utilization limit (percent points)
    pub utilization_buffer_pct: Decimal,
    /// Distributed lock TTL in seconds
    pub lock_ttl_secs: u64,
    /// Account reservation TTL in seconds
    pub reservation_ttl_secs: u64,
    /// Broker accounts eligible for new trades
    pub platforms: Vec<String>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_positions_per_asset: 2,
            first_entry_guard_secs: 60,
            second_entry_cooldown_secs: 1800,  // 30 minutes
            account_cooldown_secs: 300,        // 5 minutes
            max_trades_per_hour: 6,
            max_utilization_pct: dec!(40),
            utilization_buffer_pct: dec!(5),
            lock_ttl_secs: 120,
            reservation_ttl_secs: 180,
            platforms: vec!["primary".to_string()],
        }
    }
}

/// Why a trade was refused. These are ordinary outcomes, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("max positions reached for asset ({open}/{max})")]
    MaxPositions { open: usize, max: usize },

    #[error("asset cooldown: {remaining_secs}s remaining")]
    AssetCooldown { remaining_secs: i64 },

    #[error("account cooldown on {platform}: {remaining_secs}s remaining")]
    AccountCooldown { platform: String, remaining_secs: i64 },

    #[error("max trades per hour reached ({count}/{max})")]
    HourlyTradeCap { count: usize, max: usize },

    #[error("no account with utilization headroom (lowest {lowest_pct}%)")]
    BalanceUtilization { lowest_pct: Decimal },

    #[error("regime blocks all strategies")]
    RegimeBlocked,

    #[error("no eligible broker accounts configured")]
    NoAccounts,
}

/// Account chosen for a new trade
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedAccount {
    pub platform: String,
    pub utilization_pct: Decimal,
}

/// Stateless invariant checks over an [`ExecutionPolicy`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionGuard {
    policy: ExecutionPolicy,
}

impl ExecutionGuard {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Check 1: per-asset position cap
    pub fn check_position_cap(&self, open_positions: usize) -> Result<(), Violation> {
        if open_positions >= self.policy.max_positions_per_asset {
            return Err(Violation::MaxPositions {
                open: open_positions,
                max: self.policy.max_positions_per_asset,
            });
        }
        Ok(())
    }

    /// Check 2: per-asset cooldown.
    ///
    /// With no open position the short first-entry guard applies (duplicate
    /// signals in one cycle); with one already open the longer second-entry
    /// cooldown applies.
    pub fn check_asset_cooldown(
        &self,
        open_positions: usize,
        last_trade: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), Violation> {
        let window = if open_positions == 0 {
            self.policy.first_entry_guard_secs
        } else {
            self.policy.second_entry_cooldown_secs
        };
        if let Some(last) = last_trade {
            let elapsed = (now - last).num_seconds();
            if elapsed < window {
                return Err(Violation::AssetCooldown {
                    remaining_secs: window - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Check 3: per-account cooldown for this asset
    pub fn check_account_cooldown(
        &self,
        platform: &str,
        last_trade: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), Violation> {
        if let Some(last) = last_trade {
            let elapsed = (now - last).num_seconds();
            if elapsed < self.policy.account_cooldown_secs {
                return Err(Violation::AccountCooldown {
                    platform: platform.to_string(),
                    remaining_secs: self.policy.account_cooldown_secs - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Check 4: rolling-hour trade cap
    pub fn check_hourly_cap(&self, trades_last_hour: usize) -> Result<(), Violation> {
        if trades_last_hour >= self.policy.max_trades_per_hour {
            return Err(Violation::HourlyTradeCap {
                count: trades_last_hour,
                max: self.policy.max_trades_per_hour,
            });
        }
        Ok(())
    }

    /// Check 5: pick the least-utilized account that still has headroom.
    ///
    /// An account qualifies when `utilization + buffer < limit`. Ties go to
    /// the platform listed first.
    pub fn select_account(&self, accounts: &[(String, AccountInfo)]) -> Result<SelectedAccount, Violation> {
        if accounts.is_empty() {
            return Err(Violation::NoAccounts);
        }

        let limit = self.policy.max_utilization_pct - self.policy.utilization_buffer_pct;
        let mut best: Option<SelectedAccount> = None;
        let mut lowest = Decimal::MAX;

        for (platform, info) in accounts {
            let utilization = info.utilization_pct();
            lowest = lowest.min(utilization);
            if utilization >= limit {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => utilization < b.utilization_pct,
            };
            if better {
                best = Some(SelectedAccount {
                    platform: platform.clone(),
                    utilization_pct: utilization,
                });
            }
        }

        best.ok_or(Violation::BalanceUtilization { lowest_pct: lowest.round_dp(2) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(equity: Decimal, margin: Decimal) -> AccountInfo {
        AccountInfo { balance: equity, equity, margin }
    }

    #[test]
    fn test_position_cap() {
        let guard = ExecutionGuard::default();
        assert!(guard.check_position_cap(0).is_ok());
        assert!(guard.check_position_cap(1).is_ok());
        assert_eq!(
            guard.check_position_cap(2),
            Err(Violation::MaxPositions { open: 2, max: 2 })
        );
    }

    #[test]
    fn test_first_entry_guard() {
        let guard = ExecutionGuard::default();
        let now = Utc::now();
        assert!(guard.check_asset_cooldown(0, None, now).is_ok());

        let recent = now - Duration::seconds(20);
        assert_eq!(
            guard.check_asset_cooldown(0, Some(recent), now),
            Err(Violation::AssetCooldown { remaining_secs: 40 })
        );
        assert!(guard.check_asset_cooldown(0, Some(now - Duration::seconds(61)), now).is_ok());
    }

    #[test]
    fn test_second_entry_cooldown() {
        let guard = ExecutionGuard::default();
        let now = Utc::now();
        let ten_min_ago = now - Duration::minutes(10);
        assert!(matches!(
            guard.check_asset_cooldown(1, Some(ten_min_ago), now),
            Err(Violation::AssetCooldown { .. })
        ));
        assert!(guard.check_asset_cooldown(1, Some(now - Duration::minutes(31)), now).is_ok());
    }

    #[test]
    fn test_account_cooldown() {
        let guard = ExecutionGuard::default();
        let now = Utc::now();
        let err = guard
            .check_account_cooldown("mt5-a", Some(now - Duration::seconds(100)), now)
            .unwrap_err();
        assert_eq!(
            err,
            Violation::AccountCooldown { platform: "mt5-a".to_string(), remaining_secs: 200 }
        );
        assert!(guard.check_account_cooldown("mt5-a", None, now).is_ok());
    }

    #[test]
    fn test_hourly_cap() {
        let guard = ExecutionGuard::default();
        assert!(guard.check_hourly_cap(5).is_ok());
        assert!(guard.check_hourly_cap(6).is_err());
    }

    #[test]
    fn test_select_lowest_utilization_with_headroom() {
        let guard = ExecutionGuard::default();
        let accounts = vec![
            ("a".to_string(), account(dec!(10000), dec!(3000))), // 30%
            ("b".to_string(), account(dec!(10000), dec!(1000))), // 10%
            ("c".to_string(), account(dec!(10000), dec!(3600))), // 36%, inside buffer
        ];
        let chosen = guard.select_account(&accounts).unwrap();
        assert_eq!(chosen.platform, "b");
        assert_eq!(chosen.utilization_pct, dec!(10));
    }

    #[test]
    fn test_all_accounts_within_buffer() {
        let guard = ExecutionGuard::default();
        let accounts = vec![
            ("a".to_string(), account(dec!(10000), dec!(3500))), // 35% == limit - buffer
            ("b".to_string(), account(dec!(10000), dec!(3900))),
        ];
        assert_eq!(
            guard.select_account(&accounts),
            Err(Violation::BalanceUtilization { lowest_pct: dec!(35) })
        );
        assert_eq!(guard.select_account(&[]), Err(Violation::NoAccounts));
    }
}
