//! Simulated quote feed: bounded random walk published on a fixed period.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::models::MarketQuote;
use crate::trading::QuoteSeed;

/// Maximum relative move per tick is half of this.
const WALK_SCALE: Decimal = dec!(0.0001);

/// Latest quote per symbol plus a broadcast of every update.
#[derive(Clone)]
pub struct QuoteBoard {
    quotes: Arc<RwLock<BTreeMap<String, MarketQuote>>>,
    sender: broadcast::Sender<MarketQuote>,
}

impl QuoteBoard {
    pub fn new(seeds: &[QuoteSeed], capacity: usize) -> Self {
        let quotes = seeds
            .iter()
            .map(|s| (s.symbol.clone(), s.to_quote()))
            .collect();
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            quotes: Arc::new(RwLock::new(quotes)),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketQuote> {
        self.sender.subscribe()
    }

    /// Push stream of quote updates. Lagged receivers skip ahead.
    pub fn stream(&self) -> impl Stream<Item = MarketQuote> {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(quote) => return Some((quote, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Quote subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    pub async fn latest(&self, symbol: &str) -> Option<MarketQuote> {
        self.quotes.read().await.get(symbol).cloned()
    }

    pub async fn snapshot(&self) -> Vec<MarketQuote> {
        self.quotes.read().await.values().cloned().collect()
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.quotes.read().await.keys().cloned().collect()
    }

    /// Store and broadcast a quote.
    pub async fn publish(&self, quote: MarketQuote) {
        self.quotes
            .write()
            .await
            .insert(quote.symbol.clone(), quote.clone());
        // No receivers is not an error for a feed
        let _ = self.sender.send(quote);
    }
}

/// Random-walk price generator driving a [`QuoteBoard`].
pub struct QuoteFeed {
    board: QuoteBoard,
    rng: StdRng,
    price_decimals: u32,
}

impl QuoteFeed {
    pub fn new(board: QuoteBoard, price_decimals: u32) -> Self {
        Self {
            board,
            rng: StdRng::from_entropy(),
            price_decimals,
        }
    }

    /// Deterministic feed for simulations and tests.
    pub fn with_seed(board: QuoteBoard, price_decimals: u32, seed: u64) -> Self {
        Self {
            board,
            rng: StdRng::seed_from_u64(seed),
            price_decimals,
        }
    }

    pub fn board(&self) -> &QuoteBoard {
        &self.board
    }

    /// Next price for a walk step with `u` drawn from [-0.5, 0.5).
    fn walk(&self, price: Decimal, u: f64) -> Decimal {
        let u = Decimal::from_f64(u).unwrap_or(Decimal::ZERO);
        let next = (price + u * price * WALK_SCALE).round_dp(self.price_decimals);
        if next > Decimal::ZERO {
            next
        } else {
            price
        }
    }

    /// Advance one symbol and publish it.
    pub async fn step(&mut self, symbol: &str) -> Option<MarketQuote> {
        let mut quote = self.board.latest(symbol).await?;
        let u: f64 = self.rng.gen::<f64>() - 0.5;
        let next = self.walk(quote.price, u);
        quote.reprice(next);

        self.board.publish(quote.clone()).await;
        Some(quote)
    }

    /// Advance every symbol once.
    pub async fn tick(&mut self) -> Vec<MarketQuote> {
        let mut ticked = Vec::new();
        for symbol in self.board.symbols().await {
            if let Some(quote) = self.step(&symbol).await {
                ticked.push(quote);
            }
        }
        ticked
    }

    /// Tick on `period` until `shutdown` is set.
    pub async fn run(mut self, period: Duration, shutdown: Arc<AtomicBool>) {
        info!(period_ms = period.as_millis() as u64, "Starting quote feed");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            let quotes = self.tick().await;
            debug!(count = quotes.len(), "Quote tick");
        }

        info!("Quote feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn board() -> QuoteBoard {
        let seeds = crate::trading::EngineConfig::default().quotes;
        QuoteBoard::new(&seeds, 64)
    }

    #[test]
    fn test_walk_is_bounded() {
        let feed = QuoteFeed::with_seed(board(), 2, 7);
        let price = dec!(5320.50);

        let up = feed.walk(price, 0.4999);
        let down = feed.walk(price, -0.5);
        let max_move = price * dec!(0.00005) + dec!(0.01);
        assert!((up - price).abs() <= max_move);
        assert!((price - down).abs() <= max_move);
    }

    #[tokio::test]
    async fn test_ticks_preserve_invariants() {
        let mut feed = QuoteFeed::with_seed(board(), 2, 42);
        let opens: BTreeMap<String, Decimal> = feed
            .board()
            .snapshot()
            .await
            .into_iter()
            .map(|q| (q.symbol.clone(), q.session_open))
            .collect();

        for _ in 0..500 {
            for quote in feed.tick().await {
                assert!(quote.price > Decimal::ZERO);
                assert_eq!(quote.session_open, opens[&quote.symbol]);
                assert_eq!(quote.change, quote.price - quote.session_open);

                let expected = quote.change / (quote.price - quote.change) * dec!(100);
                assert!((quote.change_percent - expected).abs() < dec!(0.0000001));
            }
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_updates_in_order() {
        let mut feed = QuoteFeed::with_seed(board(), 2, 1);
        let mut updates = Box::pin(feed.board().stream());

        let first = feed.step("ES").await.unwrap();
        let second = feed.step("ES").await.unwrap();

        assert_eq!(updates.next().await, Some(first));
        assert_eq!(updates.next().await, Some(second.clone()));
        assert_eq!(feed.board().latest("ES").await, Some(second));
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_ignored() {
        let mut feed = QuoteFeed::with_seed(board(), 2, 1);
        assert!(feed.step("ZZ").await.is_none());
    }
}
