//! Platform-specific order encodings. Nothing outside the execution layer
//! sees these types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Account, OrderIntent, OrderSide, Platform};

/// ProjectX market order type code
const PROJECTX_MARKET: u8 = 2;

/// ProjectX (TopstepX-style gateway) order placement body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectXOrderRequest {
    pub account_id: String,
    pub contract_id: String,
    /// 2 = market
    #[serde(rename = "type")]
    pub order_type: u8,
    /// 0 = bid (buy), 1 = ask (sell)
    pub side: u8,
    pub size: u32,
    pub custom_tag: String,
}

/// Tradovate `placeorder` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradovateOrderRequest {
    pub account_spec: String,
    pub action: String,
    pub symbol: String,
    pub order_qty: u32,
    pub order_type: String,
    pub is_automated: bool,
    pub cl_ord_id: String,
}

/// Encoded order ready for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform")]
pub enum VenueRequest {
    ProjectX(ProjectXOrderRequest),
    Tradovate(TradovateOrderRequest),
}

impl VenueRequest {
    pub fn encode(intent: &OrderIntent, account: &Account) -> Self {
        let tag = intent.causality.key();
        match account.platform {
            Platform::ProjectX => VenueRequest::ProjectX(ProjectXOrderRequest {
                account_id: account.id.clone(),
                contract_id: format!("CON.F.US.{}", intent.symbol),
                order_type: PROJECTX_MARKET,
                side: match intent.side {
                    OrderSide::Buy => 0,
                    OrderSide::Sell => 1,
                },
                size: intent.quantity,
                custom_tag: tag,
            }),
            Platform::Tradovate => VenueRequest::Tradovate(TradovateOrderRequest {
                account_spec: account.id.clone(),
                action: match intent.side {
                    OrderSide::Buy => "Buy".to_string(),
                    OrderSide::Sell => "Sell".to_string(),
                },
                symbol: intent.symbol.clone(),
                order_qty: intent.quantity,
                order_type: "Market".to_string(),
                is_automated: !intent.causality.is_manual(),
                cl_ord_id: tag,
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            VenueRequest::ProjectX(_) => Platform::ProjectX,
            VenueRequest::Tradovate(_) => Platform::Tradovate,
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            VenueRequest::ProjectX(r) => &r.account_id,
            VenueRequest::Tradovate(r) => &r.account_spec,
        }
    }

    /// Symbol root regardless of platform naming.
    pub fn symbol(&self) -> &str {
        match self {
            VenueRequest::ProjectX(r) => r
                .contract_id
                .strip_prefix("CON.F.US.")
                .unwrap_or(&r.contract_id),
            VenueRequest::Tradovate(r) => &r.symbol,
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            VenueRequest::ProjectX(r) => r.size,
            VenueRequest::Tradovate(r) => r.order_qty,
        }
    }

    pub fn client_tag(&self) -> &str {
        match self {
            VenueRequest::ProjectX(r) => &r.custom_tag,
            VenueRequest::Tradovate(r) => &r.cl_ord_id,
        }
    }
}

/// Venue acknowledgement of an executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueAck {
    pub order_id: String,
    pub price: Decimal,
    pub filled_quantity: u32,
}
