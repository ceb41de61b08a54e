//! Account ledger: per-account state mutated by fills and quote marks.
//!
//! Each account sits behind its own mutex so a fill and a mark on the same
//! account are serialized while unrelated accounts never contend. The
//! registry lock is held only long enough to look up an account handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::ValidationError;
use crate::models::{Account, Fill, MarketQuote, NetPosition, PnlPoint};

use super::risk::{RiskEvaluator, RuleStatus};
use super::EngineConfig;

/// Maps a price move on a position to a cushion change.
pub trait ExposureModel: Send + Sync {
    fn mark_delta(&self, symbol: &str, quantity: i64, from: Decimal, to: Decimal) -> Decimal;
}

/// Leaves the cushion untouched by quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatExposure;

impl ExposureModel for FlatExposure {
    fn mark_delta(&self, _symbol: &str, _quantity: i64, _from: Decimal, _to: Decimal) -> Decimal {
        Decimal::ZERO
    }
}

/// Futures P&L: `quantity * (to - from) * point_value`.
#[derive(Debug, Clone, Default)]
pub struct PointValueExposure {
    point_values: BTreeMap<String, Decimal>,
}

impl PointValueExposure {
    pub fn new(point_values: BTreeMap<String, Decimal>) -> Self {
        Self { point_values }
    }
}

impl ExposureModel for PointValueExposure {
    fn mark_delta(&self, symbol: &str, quantity: i64, from: Decimal, to: Decimal) -> Decimal {
        let point_value = self
            .point_values
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE);
        Decimal::from(quantity) * (to - from) * point_value
    }
}

/// Ledger tuning taken from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub risk_unit_per_contract: Decimal,
    pub pnl_point_threshold: Decimal,
    pub pnl_history_len: usize,
}

impl From<&EngineConfig> for LedgerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            risk_unit_per_contract: config.risk_unit_per_contract,
            pnl_point_threshold: config.pnl_point_threshold,
            pnl_history_len: config.pnl_history_len,
        }
    }
}

/// Totals across every account in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_balance: Decimal,
    pub total_cushion: Decimal,
    pub account_count: usize,
    pub breached_accounts: usize,
}

#[derive(Clone)]
struct AccountHandle {
    state: Arc<Mutex<Account>>,
    /// Serializes order entry on the account; never held by marks
    orders: Arc<Mutex<()>>,
}

/// Holds every account's live state.
pub struct AccountLedger {
    accounts: RwLock<HashMap<String, AccountHandle>>,
    settings: LedgerSettings,
    exposure: Arc<dyn ExposureModel>,
}

impl AccountLedger {
    pub fn new(settings: LedgerSettings, exposure: Arc<dyn ExposureModel>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            settings,
            exposure,
        }
    }

    /// Ledger marking positions with the configured point values.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            LedgerSettings::from(config),
            Arc::new(PointValueExposure::new(config.point_values.clone())),
        )
    }

    async fn handle(&self, account_id: &str) -> Option<AccountHandle> {
        self.accounts.read().await.get(account_id).cloned()
    }

    async fn handles(&self) -> Vec<AccountHandle> {
        self.accounts.read().await.values().cloned().collect()
    }

    pub async fn insert(&self, mut account: Account) -> Result<(), ValidationError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(ValidationError::DuplicateAccount(account.id));
        }

        for rule in &mut account.rules {
            rule.refresh();
        }

        info!(
            account = %account.id,
            platform = %account.platform,
            firm = %account.firm,
            balance = %account.balance,
            "Account linked"
        );
        let id = account.id.clone();
        let handle = AccountHandle {
            state: Arc::new(Mutex::new(account)),
            orders: Arc::new(Mutex::new(())),
        };
        accounts.insert(id, handle);
        Ok(())
    }

    /// Remove an account. Replication-role checks are the caller's job.
    pub async fn remove(&self, account_id: &str) -> Result<Account, ValidationError> {
        let handle = self
            .accounts
            .write()
            .await
            .remove(account_id)
            .ok_or_else(|| ValidationError::UnknownAccount(account_id.to_string()))?;

        info!(account = %account_id, "Account unlinked");
        let account = handle.state.lock().await.clone();
        Ok(account)
    }

    /// Exclusive order entry on one account.
    ///
    /// Holders check risk, execute and book the fill before releasing, so a
    /// second order on the same account sees the first one's consumption.
    pub async fn lock_orders(&self, account_id: &str) -> Option<OwnedMutexGuard<()>> {
        let handle = self.handle(account_id).await?;
        Some(handle.orders.lock_owned().await)
    }

    pub async fn contains(&self, account_id: &str) -> bool {
        self.accounts.read().await.contains_key(account_id)
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Point-in-time copy of one account.
    pub async fn snapshot(&self, account_id: &str) -> Option<Account> {
        let handle = self.handle(account_id).await?;
        let account = handle.state.lock().await.clone();
        Some(account)
    }

    /// Copies of all accounts ordered by id.
    pub async fn snapshots(&self) -> Vec<Account> {
        let mut out = Vec::new();
        for handle in self.handles().await {
            out.push(handle.state.lock().await.clone());
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn evaluate(&self, account_id: &str) -> Option<Vec<RuleStatus>> {
        let handle = self.handle(account_id).await?;
        let account = handle.state.lock().await;
        Some(RiskEvaluator::evaluate(&account))
    }

    /// Record a fill against one account and return the updated snapshot.
    ///
    /// Returns `None` when the account is left unchanged: the fill was
    /// rejected, empty, or already booked under the same fill id.
    pub async fn apply_fill(
        &self,
        account_id: &str,
        fill: &Fill,
    ) -> Result<Option<Account>, ValidationError> {
        let handle = self
            .handle(account_id)
            .await
            .ok_or_else(|| ValidationError::UnknownAccount(account_id.to_string()))?;
        let mut account = handle.state.lock().await;

        let price = match fill.filled_price {
            Some(price) if fill.is_filled() && fill.filled_quantity > 0 => price,
            _ => return Ok(None),
        };
        if !account.daily.applied_fills.insert(fill.id) {
            debug!(account = %account.id, fill = %fill.id, "Fill already applied");
            return Ok(None);
        }

        // Mark the existing position to the fill price before resizing it
        let position = account
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| NetPosition::flat(fill.symbol.clone(), price));
        let delta = self
            .exposure
            .mark_delta(&fill.symbol, position.quantity, position.last_mark, price);
        position.apply(fill.side, fill.filled_quantity, price);
        if position.is_flat() {
            account.positions.remove(&fill.symbol);
        }
        account.cushion += delta;
        account.balance += delta;

        let consumption =
            Decimal::from(fill.filled_quantity) * self.settings.risk_unit_per_contract;
        for rule in &mut account.rules {
            rule.consume(consumption);
        }

        account.daily.fills += 1;
        account.daily.risk_consumed += consumption;
        if !account.daily.pnl_point_recorded
            && account.daily.risk_consumed >= self.settings.pnl_point_threshold
        {
            let previous = account
                .pnl_history
                .back()
                .map(|p| p.pnl)
                .unwrap_or(Decimal::ZERO);
            let point = PnlPoint {
                name: fill.timestamp.format("%Y-%m-%d").to_string(),
                pnl: previous + account.cushion,
            };
            account.push_pnl_point(point, self.settings.pnl_history_len);
            account.daily.pnl_point_recorded = true;
        }

        if let Some(rule) = account.breached_rule() {
            warn!(
                account = %account.id,
                rule = %rule.name,
                current = %rule.current,
                limit = %rule.limit,
                "Risk rule breached"
            );
        }

        debug!(
            account = %account.id,
            symbol = %fill.symbol,
            side = %fill.side,
            quantity = fill.filled_quantity,
            price = %price,
            "Fill applied"
        );

        Ok(Some(account.clone()))
    }

    /// Mark every position in `quote.symbol` to the new price.
    ///
    /// Returns the number of accounts whose cushion moved.
    pub async fn mark_to_market(&self, quote: &MarketQuote) -> usize {
        let mut marked = 0;

        for handle in self.handles().await {
            let mut account = handle.state.lock().await;
            let Some(position) = account.positions.get_mut(&quote.symbol) else {
                continue;
            };

            let delta = self.exposure.mark_delta(
                &quote.symbol,
                position.quantity,
                position.last_mark,
                quote.price,
            );
            position.last_mark = quote.price;

            if !delta.is_zero() {
                account.cushion += delta;
                account.balance += delta;
                marked += 1;
            }
        }

        marked
    }

    /// Day-boundary reset for every account.
    pub async fn start_new_day(&self) {
        for handle in self.handles().await {
            handle.state.lock().await.start_new_day();
        }
        info!("Ledger rolled to a new trading day");
    }

    pub async fn global_stats(&self) -> GlobalStats {
        let mut stats = GlobalStats::default();
        for handle in self.handles().await {
            let account = handle.state.lock().await;
            stats.total_balance += account.balance;
            stats.total_cushion += account.cushion;
            stats.account_count += 1;
            if account.is_breached() {
                stats.breached_accounts += 1;
            }
        }
        stats
    }
}
