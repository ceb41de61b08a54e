//! Simulated account book.
//!
//! Seeds a reproducible set of prop-firm accounts for demos and the
//! `simulate` command, or loads an explicit book from JSON.

use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use crate::models::{Account, Platform, PnlPoint, PropFirmRule, DAILY_LOSS_LIMIT, MAX_DRAWDOWN};

pub const PROJECTX_FIRMS: [&str; 3] = ["TopstepX", "TradeDay", "ApexTrader"];
pub const TRADOVATE_FIRMS: [&str; 3] = ["Apex", "Bulenox", "TickTick Trader"];

/// Days of P&L history generated per account
const HISTORY_DAYS: usize = 30;

fn whole(value: f64) -> Decimal {
    Decimal::from(value.round() as i64)
}

/// Random account generator.
pub struct AccountSeeder {
    rng: StdRng,
}

impl Default for AccountSeeder {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountSeeder {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Accounts `acc_1..=acc_count`.
    pub fn accounts(&mut self, count: usize) -> Vec<Account> {
        let accounts: Vec<Account> = (0..count).map(|i| self.account(i)).collect();
        info!(count = accounts.len(), "Seeded simulated accounts");
        accounts
    }

    /// Account at zero-based `index`.
    pub fn account(&mut self, index: usize) -> Account {
        let (platform, firms) = if self.rng.gen_bool(0.5) {
            (Platform::ProjectX, &PROJECTX_FIRMS)
        } else {
            (Platform::Tradovate, &TRADOVATE_FIRMS)
        };
        let firm = firms[index % firms.len()];
        let balance = Decimal::from(self.rng.gen_range(50_000_i64..150_000));

        let mut account = Account::with_rules(
            format!("acc_{}", index + 1),
            platform,
            firm,
            balance,
            self.rules(balance),
        );
        account.cushion = whole((self.rng.gen::<f64>() - 0.2) * 5000.0);

        let mut pnl = 0.0;
        for day in 0..HISTORY_DAYS {
            pnl += (self.rng.gen::<f64>() - 0.45) * 500.0;
            account.push_pnl_point(
                PnlPoint {
                    name: format!("Day {}", day + 1),
                    pnl: whole(pnl),
                },
                HISTORY_DAYS,
            );
        }

        account
    }

    /// Standard rule pair, part-consumed so every seeded account starts unbreached.
    fn rules(&mut self, balance: Decimal) -> Vec<PropFirmRule> {
        let daily_limit = (balance * Decimal::new(2, 2)).round();
        let drawdown_limit = (balance * Decimal::new(5, 2)).round();

        vec![
            PropFirmRule::with_current(
                DAILY_LOSS_LIMIT,
                daily_limit,
                self.consumed(daily_limit, 0.8),
            ),
            PropFirmRule::with_current(
                MAX_DRAWDOWN,
                drawdown_limit,
                self.consumed(drawdown_limit, 0.7),
            ),
        ]
    }

    /// Random consumption strictly below `ceiling` of `limit`.
    fn consumed(&mut self, limit: Decimal, ceiling: f64) -> Decimal {
        let limit = limit.to_f64().unwrap_or(0.0);
        let max = (limit * ceiling).floor() as i64;
        if max <= 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.rng.gen_range(0..max))
    }
}

/// Load an explicit account book from a JSON array.
pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<Account>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read accounts file {}", path.display()))?;
    let accounts: Vec<Account> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse accounts file {}", path.display()))?;

    info!(count = accounts.len(), path = %path.display(), "Loaded accounts");
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_accounts_are_reproducible_and_unbreached() {
        let a = AccountSeeder::with_seed(7).accounts(5);
        let b = AccountSeeder::with_seed(7).accounts(5);
        assert_eq!(a, b);

        for (i, account) in a.iter().enumerate() {
            assert_eq!(account.id, format!("acc_{}", i + 1));
            assert!(account.balance >= Decimal::from(50_000));
            assert!(account.balance < Decimal::from(150_000));
            assert_eq!(account.pnl_history.len(), HISTORY_DAYS);
            assert_eq!(account.pnl_history[0].name, "Day 1");
            assert!(!account.is_breached());

            let firms: &[&str] = match account.platform {
                Platform::ProjectX => &PROJECTX_FIRMS,
                Platform::Tradovate => &TRADOVATE_FIRMS,
            };
            assert_eq!(account.firm, firms[i % 3]);

            let daily = account.rule(DAILY_LOSS_LIMIT).unwrap();
            assert_eq!(daily.limit, (account.balance * Decimal::new(2, 2)).round());
            assert!(daily.current < daily.limit * Decimal::new(8, 1));
        }
    }

    #[test]
    fn test_load_accounts_from_json() {
        let accounts = AccountSeeder::with_seed(1).accounts(2);
        let path = std::env::temp_dir().join(format!("accounts-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_string(&accounts).unwrap()).unwrap();

        let loaded = load_accounts(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, accounts);

        assert!(load_accounts("/nonexistent/accounts.json").is_err());
    }
}
