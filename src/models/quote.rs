//! Market quote for a futures symbol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest price for a symbol with change against the session open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketQuote {
    pub symbol: String,

    /// Last price, always > 0
    pub price: Decimal,

    /// `price - session_open`
    pub change: Decimal,

    /// `change / session_open * 100`
    pub change_percent: Decimal,

    /// Fixed for the whole session
    pub session_open: Decimal,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl MarketQuote {
    /// Quote at the session open.
    pub fn open(symbol: impl Into<String>, price: Decimal) -> Self {
        Self::with_change(symbol, price, Decimal::ZERO)
    }

    /// Quote whose session open is `price - change`.
    pub fn with_change(symbol: impl Into<String>, price: Decimal, change: Decimal) -> Self {
        let mut quote = Self {
            symbol: symbol.into(),
            price,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            session_open: price - change,
            updated_at: Utc::now(),
        };
        quote.reprice(price);
        quote
    }

    /// Move to `new_price`, recomputing change from the session open.
    /// Non-positive prices are refused and the quote is left unchanged.
    pub fn reprice(&mut self, new_price: Decimal) -> bool {
        if new_price <= Decimal::ZERO {
            return false;
        }
        self.price = new_price;
        self.change = new_price - self.session_open;
        self.change_percent = if self.session_open.is_zero() {
            Decimal::ZERO
        } else {
            self.change / self.session_open * Decimal::ONE_HUNDRED
        };
        self.updated_at = Utc::now();
        true
    }
}
