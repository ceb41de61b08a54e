//! Prop-firm account model: balance, cushion, P&L history and risk rules.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderSide;

pub const DAILY_LOSS_LIMIT: &str = "Daily Loss Limit";
pub const MAX_DRAWDOWN: &str = "Max Drawdown";

/// Broker platform an account is hosted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    ProjectX,
    Tradovate,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ProjectX => "ProjectX",
            Platform::Tradovate => "Tradovate",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single prop-firm risk rule owned by one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropFirmRule {
    pub name: String,

    /// Allowed consumption in account currency
    pub limit: Decimal,

    /// Consumption so far today (never decreases within a day)
    pub current: Decimal,

    /// Derived: `current >= limit`
    #[serde(default)]
    pub breached: bool,
}

impl PropFirmRule {
    pub fn new(name: impl Into<String>, limit: Decimal) -> Self {
        Self::with_current(name, limit, Decimal::ZERO)
    }

    pub fn with_current(name: impl Into<String>, limit: Decimal, current: Decimal) -> Self {
        let mut rule = Self {
            name: name.into(),
            limit,
            current: current.max(Decimal::ZERO),
            breached: false,
        };
        rule.refresh();
        rule
    }

    /// Add consumption. Negative amounts are ignored so `current` stays monotonic.
    pub fn consume(&mut self, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.current += amount;
        }
        self.refresh();
    }

    /// Day-boundary reset.
    pub fn reset(&mut self) {
        self.current = Decimal::ZERO;
        self.refresh();
    }

    pub fn refresh(&mut self) {
        self.breached = self.current >= self.limit;
    }

    pub fn remaining(&self) -> Decimal {
        (self.limit - self.current).max(Decimal::ZERO)
    }
}

/// One point of the rolling P&L chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlPoint {
    pub name: String,
    pub pnl: Decimal,
}

/// Net futures position in one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetPosition {
    pub symbol: String,

    /// Signed contracts: positive long, negative short
    pub quantity: i64,

    pub average_price: Decimal,

    /// Price the cushion was last marked at
    pub last_mark: Decimal,
}

impl NetPosition {
    pub fn flat(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0,
            average_price: price,
            last_mark: price,
        }
    }

    /// Apply a filled quantity at `price`. The caller marks to `price` first.
    pub fn apply(&mut self, side: OrderSide, quantity: u32, price: Decimal) {
        let delta = side.sign() * i64::from(quantity);
        let new_qty = self.quantity + delta;

        let same_direction = self.quantity == 0 || self.quantity.signum() == delta.signum();
        if same_direction {
            // Averaging in
            let old = Decimal::from(self.quantity.abs()) * self.average_price;
            let added = Decimal::from(delta.abs()) * price;
            if new_qty != 0 {
                self.average_price = (old + added) / Decimal::from(new_qty.abs());
            }
        } else if new_qty.signum() != self.quantity.signum() && new_qty != 0 {
            // Flipped through flat: the remainder opens at the fill price
            self.average_price = price;
        }

        self.quantity = new_qty;
        self.last_mark = price;
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

/// Per-day activity counters, reset at the day boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub fills: u32,
    pub risk_consumed: Decimal,
    pub pnl_point_recorded: bool,
    /// Ids of the fills already booked today
    #[serde(default)]
    pub applied_fills: BTreeSet<Uuid>,
}

/// An aggregated prop-firm trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub platform: Platform,
    pub firm: String,
    pub balance: Decimal,

    /// Signed current-day P&L buffer
    pub cushion: Decimal,

    #[serde(default)]
    pub pnl_history: VecDeque<PnlPoint>,

    pub rules: Vec<PropFirmRule>,

    #[serde(default)]
    pub positions: BTreeMap<String, NetPosition>,

    #[serde(default)]
    pub daily: DailyActivity,
}

impl Account {
    /// Create an account with the standard rule pair sized from the balance
    /// (daily loss 2%, max drawdown 5%).
    pub fn new(
        id: impl Into<String>,
        platform: Platform,
        firm: impl Into<String>,
        balance: Decimal,
    ) -> Self {
        let rules = vec![
            PropFirmRule::new(DAILY_LOSS_LIMIT, (balance * dec!(0.02)).round()),
            PropFirmRule::new(MAX_DRAWDOWN, (balance * dec!(0.05)).round()),
        ];
        Self::with_rules(id, platform, firm, balance, rules)
    }

    pub fn with_rules(
        id: impl Into<String>,
        platform: Platform,
        firm: impl Into<String>,
        balance: Decimal,
        rules: Vec<PropFirmRule>,
    ) -> Self {
        Self {
            id: id.into(),
            platform,
            firm: firm.into(),
            balance,
            cushion: Decimal::ZERO,
            pnl_history: VecDeque::new(),
            rules,
            positions: BTreeMap::new(),
            daily: DailyActivity::default(),
        }
    }

    /// First rule that is breached, if any.
    pub fn breached_rule(&self) -> Option<&PropFirmRule> {
        self.rules.iter().find(|r| r.breached)
    }

    pub fn is_breached(&self) -> bool {
        self.breached_rule().is_some()
    }

    pub fn rule(&self, name: &str) -> Option<&PropFirmRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Append to the rolling P&L history, dropping the oldest past `window`.
    pub fn push_pnl_point(&mut self, point: PnlPoint, window: usize) {
        self.pnl_history.push_back(point);
        while self.pnl_history.len() > window.max(1) {
            self.pnl_history.pop_front();
        }
    }

    pub fn net_quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0)
    }

    /// Reset daily rule consumption and counters.
    pub fn start_new_day(&mut self) {
        for rule in &mut self.rules {
            rule.reset();
        }
        self.daily = DailyActivity::default();
        self.cushion = Decimal::ZERO;
    }
}
