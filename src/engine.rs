//! Engine: wires the quote feed, ledger, execution adapter and trade copier
//! together and exposes the operator surface.
//!
//! Handles:
//! - Publishing simulated quotes and marking open positions
//! - Manual order entry, single-account and on the current selection
//! - Replication link configuration, activation and audit
//! - Account book maintenance and the day boundary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CopierResult, ExecutionError, StateConflictError, ValidationError};
use crate::execution::{ExecutionAdapter, SimulatedVenue};
use crate::market::{QuoteBoard, QuoteFeed};
use crate::models::{
    Account, FanOutRecord, Fill, LinkId, LinkState, LinkStatus, MarketQuote, OrderIntent,
    OrderSide, Platform,
};
use crate::trading::{
    AccountLedger, EngineConfig, GlobalStats, PositionSizer, ReplicationEvent, RiskEvaluator,
    RuleStatus, SelectionState, TradeCopier,
};

/// The replication and risk engine.
pub struct Engine {
    config: EngineConfig,
    board: QuoteBoard,
    ledger: Arc<AccountLedger>,
    adapter: Arc<ExecutionAdapter>,
    copier: Arc<TradeCopier>,
    selection: Mutex<SelectionState>,
    replication_tx: mpsc::UnboundedSender<ReplicationEvent>,
    projectx: SimulatedVenue,
    tradovate: SimulatedVenue,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine over `accounts` with simulated venues and start its
    /// replication worker. Must be called inside a Tokio runtime.
    pub async fn new(config: EngineConfig, accounts: Vec<Account>) -> Result<Self, ValidationError> {
        let board = QuoteBoard::new(&config.quotes, config.quote_channel_capacity);
        let ledger = Arc::new(AccountLedger::from_config(&config));
        for account in accounts {
            ledger.insert(account).await?;
        }

        let (adapter, projectx, tradovate) = ExecutionAdapter::simulated(&config, board.clone());
        let adapter = Arc::new(adapter);
        let copier = Arc::new(TradeCopier::new(
            ledger.clone(),
            adapter.clone(),
            PositionSizer::default(),
        ));

        let (replication_tx, replication_rx) = mpsc::unbounded_channel();
        tokio::spawn(copier.clone().run(replication_rx));

        info!(
            accounts = ledger.len().await,
            symbols = config.quotes.len(),
            "Engine initialized"
        );

        Ok(Self {
            config,
            board,
            ledger,
            adapter,
            copier,
            selection: Mutex::new(SelectionState::new()),
            replication_tx,
            projectx,
            tradovate,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Simulated venue for `platform`, for latency and rejection injection.
    pub fn venue(&self, platform: Platform) -> &SimulatedVenue {
        match platform {
            Platform::ProjectX => &self.projectx,
            Platform::Tradovate => &self.tradovate,
        }
    }

    pub fn adapter(&self) -> &ExecutionAdapter {
        &self.adapter
    }

    /// Start the quote feed and the mark-to-market subscriber.
    ///
    /// Both stop once the shutdown signal is set.
    pub fn start_market_data(&self, seed: Option<u64>) -> Vec<JoinHandle<()>> {
        let feed = match seed {
            Some(seed) => QuoteFeed::with_seed(self.board.clone(), self.config.price_decimals, seed),
            None => QuoteFeed::new(self.board.clone(), self.config.price_decimals),
        };
        let feed_task = tokio::spawn(feed.run(self.config.quote_period(), self.shutdown.clone()));

        let mut quotes = self.board.subscribe();
        let ledger = self.ledger.clone();
        let shutdown = self.shutdown.clone();
        let mark_task = tokio::spawn(async move {
            while !shutdown.load(Ordering::SeqCst) {
                match quotes.recv().await {
                    Ok(quote) => {
                        let marked = ledger.mark_to_market(&quote).await;
                        if marked > 0 {
                            debug!(symbol = %quote.symbol, accounts = marked, "Marked to market");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Mark-to-market fell behind the quote feed");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        vec![feed_task, mark_task]
    }

    /// Live quotes, ordered per symbol.
    pub fn subscribe_quotes(&self) -> impl Stream<Item = MarketQuote> {
        self.board.stream()
    }

    pub async fn quotes(&self) -> Vec<MarketQuote> {
        self.board.snapshot().await
    }

    pub async fn account_snapshot(&self, account_id: &str) -> Option<Account> {
        self.ledger.snapshot(account_id).await
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.ledger.snapshots().await
    }

    pub async fn evaluate_account(&self, account_id: &str) -> Option<Vec<RuleStatus>> {
        self.ledger.evaluate(account_id).await
    }

    pub async fn global_stats(&self) -> GlobalStats {
        self.ledger.global_stats().await
    }

    /// Execute a manual order and hand its fill to the replication worker.
    ///
    /// Malformed orders and unknown accounts are rejected up front. Every
    /// execution failure comes back as a REJECTED fill.
    pub async fn place_manual_order(&self, intent: OrderIntent) -> Result<Fill, ValidationError> {
        intent.validate()?;
        let unknown = || ValidationError::UnknownAccount(intent.account_id.clone());

        // Held until the fill is booked so the next order sees its risk
        let _entry = self.ledger.lock_orders(&intent.account_id).await.ok_or_else(unknown)?;
        let account = self
            .ledger
            .snapshot(&intent.account_id)
            .await
            .ok_or_else(unknown)?;

        if let Some(rule) = RiskEvaluator::blocking_rule(&account) {
            warn!(account = %account.id, rule = %rule, "Manual order blocked by breached rule");
            return Ok(Fill::rejected(&intent, ExecutionError::RiskBreached { rule }));
        }

        let fill = self.adapter.execute(&intent, &account).await;
        // A retry of an already booked intent is not replicated again
        let booked = self.ledger.apply_fill(&account.id, &fill).await?.is_some();
        if booked
            && self
                .replication_tx
                .send(ReplicationEvent::LeaderFill(fill.clone()))
                .is_err()
        {
            warn!(account = %account.id, "Replication worker stopped; fill not replicated");
        }
        Ok(fill)
    }

    /// Place the same manual order on every selected account in parallel.
    pub async fn place_order_on_selection(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
    ) -> Result<Vec<Fill>, ValidationError> {
        let selected = self.selection.lock().await.ids();
        if selected.is_empty() {
            return Err(ValidationError::NoAccountsSelected);
        }

        let intents: Vec<OrderIntent> = selected
            .iter()
            .map(|id| OrderIntent::manual(id.as_str(), symbol, side, quantity))
            .collect();
        if let Some(intent) = intents.first() {
            intent.validate()?;
        }

        info!(
            accounts = intents.len(),
            symbol = %symbol,
            side = %side,
            quantity,
            "Placing order on selection"
        );

        let results = join_all(intents.iter().map(|i| self.place_manual_order(i.clone()))).await;
        results
            .into_iter()
            .zip(&intents)
            .map(|(result, intent)| match result {
                Err(ValidationError::UnknownAccount(_)) => {
                    Ok(Fill::rejected(intent, ExecutionError::UnknownAccount))
                }
                other => other,
            })
            .collect()
    }

    /// Flip an account in or out of the selection. Returns true if now selected.
    pub async fn toggle_selection(&self, account_id: &str) -> Result<bool, ValidationError> {
        if !self.ledger.contains(account_id).await {
            return Err(ValidationError::UnknownAccount(account_id.to_string()));
        }
        Ok(self.selection.lock().await.toggle(account_id))
    }

    pub async fn selection(&self) -> Vec<String> {
        self.selection.lock().await.ids()
    }

    /// Resolves once every fill handed to the replication worker so far
    /// has been fanned out.
    pub async fn flush_replication(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.replication_tx.send(ReplicationEvent::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub async fn configure_replication(
        &self,
        leader_id: &str,
        follower_ids: &[String],
    ) -> CopierResult<LinkId> {
        let result = self.copier.configure(leader_id, follower_ids).await;
        if let Err(e) = &result {
            warn!(leader = %leader_id, error = %e, "Replication configuration rejected");
        }
        result
    }

    pub async fn set_replication_active(&self, link_id: LinkId, active: bool) -> CopierResult<()> {
        self.copier.set_active(link_id, active).await
    }

    /// Fan-out records for a link, oldest first.
    pub async fn replication_audit(&self, link_id: LinkId) -> CopierResult<Vec<FanOutRecord>> {
        self.copier.audit(link_id).await
    }

    pub async fn replication_status(&self, link_id: LinkId) -> CopierResult<LinkStatus> {
        self.copier.status(link_id).await
    }

    pub async fn replication_links(&self) -> Vec<LinkStatus> {
        self.copier.statuses().await
    }

    pub async fn remove_replication(&self, link_id: LinkId) -> CopierResult<()> {
        self.copier.remove(link_id).await
    }

    pub async fn resume_follower(&self, link_id: LinkId, follower_id: &str) -> CopierResult<()> {
        self.copier.resume_follower(link_id, follower_id).await
    }

    pub async fn add_account(&self, account: Account) -> Result<(), ValidationError> {
        self.ledger.insert(account).await
    }

    /// Remove an account that holds no replication role.
    pub async fn remove_account(&self, account_id: &str) -> CopierResult<Account> {
        if let Some(link) = self.copier.role_of(account_id).await {
            return Err(StateConflictError::AccountInUse {
                account: account_id.to_string(),
                link,
            }
            .into());
        }

        let account = self.ledger.remove(account_id).await?;
        self.selection.lock().await.remove(account_id);
        Ok(account)
    }

    /// Day boundary: reset rule consumption and daily counters.
    pub async fn start_new_day(&self) {
        self.ledger.start_new_day().await;
    }

    /// Stop market data and drain every active link.
    pub async fn shutdown(&self) {
        info!("Shutting down engine...");
        self.shutdown.store(true, Ordering::SeqCst);

        for link in self.copier.statuses().await {
            if link.state == LinkState::Active {
                if let Err(e) = self.copier.set_active(link.id, false).await {
                    warn!(link = %link.id, error = %e, "Failed to deactivate link");
                }
            }
        }
        self.flush_replication().await;

        info!("Engine shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn engine() -> Engine {
        let accounts = vec![
            Account::new("acc_1", Platform::ProjectX, "TopstepX", dec!(50000)),
            Account::new("acc_2", Platform::Tradovate, "Apex", dec!(100000)),
        ];
        Engine::new(EngineConfig::default(), accounts).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_order_updates_ledger() {
        let engine = engine().await;
        let fill = engine
            .place_manual_order(OrderIntent::manual("acc_1", "es", OrderSide::Buy, 2))
            .await
            .unwrap();

        assert!(fill.is_filled());
        assert_eq!(fill.symbol, "ES");

        let account = engine.account_snapshot("acc_1").await.unwrap();
        assert_eq!(account.net_quantity("ES"), 2);
        assert_eq!(account.daily.fills, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_order_validation() {
        let engine = engine().await;

        let err = engine
            .place_manual_order(OrderIntent::manual("acc_1", "ES", OrderSide::Buy, 0))
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::ZeroQuantity);

        let err = engine
            .place_manual_order(OrderIntent::manual("acc_9", "ES", OrderSide::Buy, 1))
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownAccount("acc_9".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_orders() {
        let engine = engine().await;
        let err = engine
            .place_order_on_selection("ES", OrderSide::Sell, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::NoAccountsSelected);

        assert!(engine.toggle_selection("acc_1").await.unwrap());
        assert!(engine.toggle_selection("acc_2").await.unwrap());
        assert!(engine.toggle_selection("acc_3").await.is_err());

        let fills = engine
            .place_order_on_selection("NQ", OrderSide::Sell, 1)
            .await
            .unwrap();
        assert_eq!(fills.len(), 2);
        assert!(fills.iter().all(Fill::is_filled));
        assert_eq!(engine.account_snapshot("acc_2").await.unwrap().net_quantity("NQ"), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_account_guarded_by_link() {
        let engine = engine().await;
        let link = engine
            .configure_replication("acc_1", &["acc_2".to_string()])
            .await
            .unwrap();

        let err = engine.remove_account("acc_2").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::CopierError::Conflict(StateConflictError::AccountInUse { .. })
        ));

        engine.remove_replication(link).await.unwrap();
        engine.toggle_selection("acc_2").await.unwrap();
        engine.remove_account("acc_2").await.unwrap();
        assert!(engine.selection().await.is_empty());
        assert_eq!(engine.global_stats().await.account_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_data_marks_positions() {
        let engine = engine().await;
        engine
            .place_manual_order(OrderIntent::manual("acc_1", "ES", OrderSide::Buy, 1))
            .await
            .unwrap();
        let before = engine.account_snapshot("acc_1").await.unwrap();

        let tasks = engine.start_market_data(Some(42));
        tokio::time::sleep(engine.config().quote_period() * 5).await;

        // Cushion moved by exactly the marked ES move on one contract
        let after = engine.account_snapshot("acc_1").await.unwrap();
        assert_eq!(
            after.cushion - before.cushion,
            (after.positions["ES"].last_mark - before.positions["ES"].last_mark) * dec!(50)
        );
        assert_eq!(after.balance - before.balance, after.cushion - before.cushion);

        engine.shutdown().await;
        for task in tasks {
            task.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_manual_orders_respect_breach() {
        use crate::models::{PropFirmRule, DAILY_LOSS_LIMIT, MAX_DRAWDOWN};

        let engine = engine().await;
        // One contract short of the daily loss limit
        engine
            .add_account(Account::with_rules(
                "acc_3",
                Platform::ProjectX,
                "TradeDay",
                dec!(50000),
                vec![
                    PropFirmRule::with_current(DAILY_LOSS_LIMIT, dec!(1000), dec!(990)),
                    PropFirmRule::new(MAX_DRAWDOWN, dec!(2500)),
                ],
            ))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            engine.place_manual_order(OrderIntent::manual("acc_3", "ES", OrderSide::Buy, 1)),
            engine.place_manual_order(OrderIntent::manual("acc_3", "ES", OrderSide::Buy, 1))
        );
        let fills = [a.unwrap(), b.unwrap()];

        assert_eq!(fills.iter().filter(|f| f.is_filled()).count(), 1);
        assert!(fills
            .iter()
            .any(|f| matches!(f.rejection, Some(ExecutionError::RiskBreached { .. }))));
        assert_eq!(engine.venue(Platform::ProjectX).submissions("acc_3").await, 1);

        let account = engine.account_snapshot("acc_3").await.unwrap();
        assert_eq!(account.net_quantity("ES"), 1);
        assert_eq!(account.rule(DAILY_LOSS_LIMIT).unwrap().current, dec!(1015));
    }
}
