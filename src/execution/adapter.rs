//! Execution adapter: routes an order to its account's platform, bounds it
//! by a deadline, and memoizes results per (causality tag, account).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::market::QuoteBoard;
use crate::models::{Account, Fill, OrderIntent, Platform};
use crate::trading::EngineConfig;

use super::venue::{SimulatedVenue, Venue};
use super::wire::VenueRequest;

struct MemoEntry {
    cell: Arc<OnceCell<Fill>>,
    created_at: Instant,
}

/// Platform-agnostic order execution.
pub struct ExecutionAdapter {
    venues: HashMap<Platform, Arc<dyn Venue>>,
    deadline: Duration,
    window: Duration,
    memo: Mutex<HashMap<(String, String), MemoEntry>>,
}

impl ExecutionAdapter {
    pub fn new(deadline: Duration, window: Duration) -> Self {
        Self {
            venues: HashMap::new(),
            deadline,
            window,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Register the venue serving one platform.
    pub fn with_venue(mut self, venue: Arc<dyn Venue>) -> Self {
        self.venues.insert(venue.platform(), venue);
        self
    }

    /// Adapter backed by simulated ProjectX and Tradovate venues.
    ///
    /// Returns the venues too so callers can inject latency or rejections.
    pub fn simulated(
        config: &EngineConfig,
        board: QuoteBoard,
    ) -> (Self, SimulatedVenue, SimulatedVenue) {
        let projectx = SimulatedVenue::new(
            Platform::ProjectX,
            board.clone(),
            config.execution_latency(),
            config.max_order_quantity,
        );
        let tradovate = SimulatedVenue::new(
            Platform::Tradovate,
            board,
            config.execution_latency(),
            config.max_order_quantity,
        );

        let adapter = Self::new(config.execution_timeout(), config.idempotency_window())
            .with_venue(Arc::new(projectx.clone()))
            .with_venue(Arc::new(tradovate.clone()));

        (adapter, projectx, tradovate)
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Execute `intent` against `account`.
    ///
    /// Never blocks past the deadline; a late venue yields a REJECTED fill
    /// with [`ExecutionError::Timeout`]. Repeating a (causality tag, account)
    /// pair inside the validity window returns the original fill, including
    /// while the first call is still in flight.
    pub async fn execute(&self, intent: &OrderIntent, account: &Account) -> Fill {
        let cell = self.memo_cell(intent, account).await;
        cell.get_or_init(|| self.dispatch(intent, account))
            .await
            .clone()
    }

    async fn memo_cell(&self, intent: &OrderIntent, account: &Account) -> Arc<OnceCell<Fill>> {
        let key = (intent.causality.key(), account.id.clone());
        let mut memo = self.memo.lock().await;

        let window = self.window;
        memo.retain(|_, entry| !entry.cell.initialized() || entry.created_at.elapsed() < window);

        memo.entry(key)
            .or_insert_with(|| MemoEntry {
                cell: Arc::new(OnceCell::new()),
                created_at: Instant::now(),
            })
            .cell
            .clone()
    }

    async fn dispatch(&self, intent: &OrderIntent, account: &Account) -> Fill {
        if let Err(e) = intent.validate() {
            return Fill::rejected(intent, ExecutionError::platform(e.to_string()));
        }

        let Some(venue) = self.venues.get(&account.platform) else {
            warn!(platform = %account.platform, "No venue registered for platform");
            return Fill::rejected(
                intent,
                ExecutionError::platform(format!("no venue for {}", account.platform)),
            );
        };

        let request = VenueRequest::encode(intent, account);
        let fill = match timeout(self.deadline, venue.submit(request)).await {
            Ok(Ok(ack)) => Fill::filled(
                intent,
                ack.price,
                ack.filled_quantity.min(intent.quantity),
                Some(ack.order_id),
            ),
            Ok(Err(e)) => Fill::rejected(intent, e),
            Err(_) => Fill::rejected(intent, ExecutionError::Timeout),
        };

        if fill.is_filled() {
            info!(
                account = %account.id,
                platform = %account.platform,
                symbol = %fill.symbol,
                side = %fill.side,
                quantity = fill.filled_quantity,
                price = %fill.filled_price.unwrap_or_default(),
                causality = %fill.causality,
                "Order filled"
            );
        } else {
            warn!(
                account = %account.id,
                platform = %account.platform,
                symbol = %fill.symbol,
                reason = ?fill.rejection,
                causality = %fill.causality,
                "Order rejected"
            );
        }

        fill
    }
}
