//! Data models for accounts, quotes, orders, fills, and replication audit.

mod account;
mod order;
mod quote;
mod replication;

pub use account::{
    Account, DailyActivity, NetPosition, Platform, PnlPoint, PropFirmRule, DAILY_LOSS_LIMIT,
    MAX_DRAWDOWN,
};
pub use order::{CausalityTag, Fill, FillOutcome, OrderIntent, OrderSide};
pub use quote::MarketQuote;
pub use replication::{
    FanOutRecord, FollowerOutcome, FollowerState, FollowerStatus, LastReplication, LinkId,
    LinkState, LinkStatus,
};
