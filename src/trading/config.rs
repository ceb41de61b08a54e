//! Engine configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::MarketQuote;

/// Opening state of one symbol on the quote board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSeed {
    pub symbol: String,
    pub price: Decimal,
    /// Change already accrued since the session open
    #[serde(default)]
    pub change: Decimal,
}

impl QuoteSeed {
    pub fn to_quote(&self) -> MarketQuote {
        MarketQuote::with_change(self.symbol.clone(), self.price, self.change)
    }
}

/// Configuration for the quote feed, ledger, execution and replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quote feed tick period in milliseconds
    pub quote_period_ms: u64,

    /// Decimal places prices are rounded to on every tick
    pub price_decimals: u32,

    /// Simulated venue latency in milliseconds
    pub execution_latency_ms: u64,

    /// Deadline after which an execution is treated as TIMEOUT
    pub execution_timeout_ms: u64,

    /// How long (causality tag, account) results are memoized
    pub idempotency_window_secs: u64,

    /// Largest order a simulated venue accepts, in contracts
    pub max_order_quantity: u32,

    /// Risk consumed per filled contract, in account currency
    pub risk_unit_per_contract: Decimal,

    /// Daily risk consumption after which the day's P&L point is recorded
    pub pnl_point_threshold: Decimal,

    /// Length of the rolling P&L history
    pub pnl_history_len: usize,

    /// Capacity of the quote broadcast channel
    pub quote_channel_capacity: usize,

    /// Initial quote board
    pub quotes: Vec<QuoteSeed>,

    /// Currency per point per contract, used for mark-to-market
    pub point_values: BTreeMap<String, Decimal>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let quotes = vec![
            QuoteSeed { symbol: "ES".to_string(), price: dec!(5320.50), change: dec!(12.25) },
            QuoteSeed { symbol: "NQ".to_string(), price: dec!(18750.75), change: dec!(-45.50) },
            QuoteSeed { symbol: "CL".to_string(), price: dec!(78.50), change: dec!(1.20) },
            QuoteSeed { symbol: "GC".to_string(), price: dec!(2350.00), change: dec!(25.30) },
        ];

        let point_values = [
            ("ES", dec!(50)),
            ("NQ", dec!(20)),
            ("CL", dec!(1000)),
            ("GC", dec!(100)),
        ]
        .into_iter()
        .map(|(s, v)| (s.to_string(), v))
        .collect();

        Self {
            quote_period_ms: 1500,          // Reference dashboard refresh
            price_decimals: 2,
            execution_latency_ms: 1500,
            execution_timeout_ms: 5000,
            idempotency_window_secs: 300,   // 5 minutes
            max_order_quantity: 50,
            risk_unit_per_contract: dec!(25),
            pnl_point_threshold: dec!(25),  // First contract of the day
            pnl_history_len: 30,
            quote_channel_capacity: 256,
            quotes,
            point_values,
        }
    }
}

impl EngineConfig {
    pub fn quote_period(&self) -> Duration {
        Duration::from_millis(self.quote_period_ms.max(1))
    }

    pub fn execution_latency(&self) -> Duration {
        Duration::from_millis(self.execution_latency_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn idempotency_window(&self) -> Duration {
        Duration::from_secs(self.idempotency_window_secs)
    }

    pub fn point_value(&self, symbol: &str) -> Decimal {
        self.point_values.get(symbol).copied().unwrap_or(Decimal::ONE)
    }
}
