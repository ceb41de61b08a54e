//! Market data: the quote board and its simulated feed.

mod quote_feed;

pub use quote_feed::{QuoteBoard, QuoteFeed};
