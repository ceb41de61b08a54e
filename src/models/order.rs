//! Order intents and their resolved fills.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecutionError, ValidationError};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an order exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CausalityTag {
    /// Entered by an operator; the nonce keeps separate manual orders distinct
    Manual { nonce: Uuid },

    /// Mirrored from a leader fill to one follower
    Replicated {
        leader_fill_id: Uuid,
        follower_id: String,
    },
}

impl CausalityTag {
    pub fn manual() -> Self {
        CausalityTag::Manual {
            nonce: Uuid::new_v4(),
        }
    }

    pub fn replicated(leader_fill_id: Uuid, follower_id: impl Into<String>) -> Self {
        CausalityTag::Replicated {
            leader_fill_id,
            follower_id: follower_id.into(),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, CausalityTag::Manual { .. })
    }

    /// Stable identity used for idempotent execution.
    pub fn key(&self) -> String {
        match self {
            CausalityTag::Manual { nonce } => format!("manual:{}", nonce),
            CausalityTag::Replicated {
                leader_fill_id,
                follower_id,
            } => format!("{}:{}", leader_fill_id, follower_id),
        }
    }
}

impl fmt::Display for CausalityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CausalityTag::Manual { .. } => f.write_str("manual"),
            CausalityTag::Replicated { leader_fill_id, .. } => {
                write!(f, "leader:{}", leader_fill_id)
            }
        }
    }
}

/// Request to trade `quantity` contracts of `symbol` on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub account_id: String,
    pub causality: CausalityTag,
}

impl OrderIntent {
    pub fn manual(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: u32,
    ) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            side,
            quantity,
            account_id: account_id.into(),
            causality: CausalityTag::manual(),
        }
    }

    /// Mirror a leader fill onto `follower_id` with the given size.
    pub fn mirror(leader_fill: &Fill, follower_id: &str, quantity: u32) -> Self {
        Self {
            symbol: leader_fill.symbol.clone(),
            side: leader_fill.side,
            quantity,
            account_id: follower_id.to_string(),
            causality: CausalityTag::replicated(leader_fill.id, follower_id),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        Ok(())
    }
}

/// Terminal status of an order against one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillOutcome {
    Filled,
    Rejected,
}

/// Resolved outcome of an [`OrderIntent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub requested_quantity: u32,

    /// May be below `requested_quantity` for partial fills; zero when rejected
    pub filled_quantity: u32,

    pub filled_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub outcome: FillOutcome,
    pub rejection: Option<ExecutionError>,
    pub causality: CausalityTag,

    /// Platform order reference when the venue acknowledged the order
    #[serde(default)]
    pub venue_order_id: Option<String>,
}

impl Fill {
    pub fn filled(
        intent: &OrderIntent,
        price: Decimal,
        quantity: u32,
        venue_order_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: intent.account_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            requested_quantity: intent.quantity,
            filled_quantity: quantity,
            filled_price: Some(price),
            timestamp: Utc::now(),
            outcome: FillOutcome::Filled,
            rejection: None,
            causality: intent.causality.clone(),
            venue_order_id,
        }
    }

    pub fn rejected(intent: &OrderIntent, reason: ExecutionError) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: intent.account_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            requested_quantity: intent.quantity,
            filled_quantity: 0,
            filled_price: None,
            timestamp: Utc::now(),
            outcome: FillOutcome::Rejected,
            rejection: Some(reason),
            causality: intent.causality.clone(),
            venue_order_id: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.outcome == FillOutcome::Filled
    }

    pub fn is_partial(&self) -> bool {
        self.is_filled() && self.filled_quantity < self.requested_quantity
    }
}
