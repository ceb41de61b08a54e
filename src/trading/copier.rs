//! Trade copier: replicates leader fills onto follower accounts.
//!
//! Each link is frozen while ACTIVE. A leader fill is fanned out to every
//! ENABLED follower in parallel from a membership snapshot taken when the
//! fan-out starts. Followers succeed or fail independently; a breached
//! follower is suspended on its own without touching its siblings.
//! Deactivation marks the link as draining so no new fan-outs start, then
//! waits for in-flight fan-outs before the link reads INACTIVE.
//!
//! The worker keeps one lane per leader account: fills from one leader are
//! replicated in arrival order, while different leaders never wait on each
//! other.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CopierResult, ExecutionError, StateConflictError, ValidationError};
use crate::execution::ExecutionAdapter;
use crate::models::{
    FanOutRecord, Fill, FollowerOutcome, FollowerState, FollowerStatus, LastReplication, LinkId,
    LinkState, LinkStatus, OrderIntent,
};

use super::ledger::AccountLedger;
use super::risk::RiskEvaluator;
use super::PositionSizer;

/// Work items for the replication worker.
#[derive(Debug)]
pub enum ReplicationEvent {
    /// A fill on some account; replicated if that account leads an active link
    LeaderFill(Fill),
    /// Acknowledged once every earlier event has been processed
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
struct FollowerSlot {
    state: FollowerState,
    suspended_for: Option<String>,
    last: Option<LastReplication>,
}

impl FollowerSlot {
    fn enabled() -> Self {
        Self {
            state: FollowerState::Enabled,
            suspended_for: None,
            last: None,
        }
    }
}

#[derive(Debug)]
struct LinkConfig {
    leader: String,
    followers: BTreeMap<String, FollowerSlot>,
    state: LinkState,
    draining: bool,
    /// Leader fills this link has already fanned out
    replicated: HashSet<Uuid>,
}

impl LinkConfig {
    fn is_frozen(&self) -> bool {
        self.state == LinkState::Active || self.draining
    }

    fn accepts_fan_out(&self) -> bool {
        self.state == LinkState::Active && !self.draining
    }

    fn has_member(&self, account_id: &str) -> bool {
        self.leader == account_id || self.followers.contains_key(account_id)
    }
}

struct Link {
    id: LinkId,
    config: Mutex<LinkConfig>,
    /// Fan-outs hold a read guard; deactivation takes the write guard to drain
    gate: RwLock<()>,
    audit: RwLock<Vec<FanOutRecord>>,
}

/// Owns replication links and fans leader fills out to followers.
pub struct TradeCopier {
    ledger: Arc<AccountLedger>,
    adapter: Arc<ExecutionAdapter>,
    sizer: PositionSizer,
    links: RwLock<BTreeMap<LinkId, Arc<Link>>>,
    next_link: AtomicU64,
    next_sequence: AtomicU64,
}

impl TradeCopier {
    pub fn new(
        ledger: Arc<AccountLedger>,
        adapter: Arc<ExecutionAdapter>,
        sizer: PositionSizer,
    ) -> Self {
        Self {
            ledger,
            adapter,
            sizer,
            links: RwLock::new(BTreeMap::new()),
            next_link: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
        }
    }

    async fn link(&self, link_id: LinkId) -> CopierResult<Arc<Link>> {
        self.links
            .read()
            .await
            .get(&link_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownLink(link_id).into())
    }

    async fn validate_members(&self, leader: &str, followers: &[String]) -> CopierResult<()> {
        if leader.trim().is_empty() {
            return Err(ValidationError::MissingLeader.into());
        }
        if followers.is_empty() {
            return Err(ValidationError::EmptyFollowers.into());
        }

        let mut seen = HashSet::new();
        for follower in followers {
            if follower == leader {
                return Err(ValidationError::LeaderIsFollower(follower.clone()).into());
            }
            if !seen.insert(follower.as_str()) {
                return Err(ValidationError::DuplicateFollower(follower.clone()).into());
            }
        }

        for account in std::iter::once(leader).chain(followers.iter().map(String::as_str)) {
            if !self.ledger.contains(account).await {
                return Err(ValidationError::UnknownAccount(account.to_string()).into());
            }
        }
        Ok(())
    }

    /// Create the link for `leader`, or replace the membership of its
    /// existing link. Rejected while that link is active.
    pub async fn configure(&self, leader: &str, followers: &[String]) -> CopierResult<LinkId> {
        self.validate_members(leader, followers).await?;

        let mut links = self.links.write().await;
        for link in links.values() {
            let mut config = link.config.lock().await;
            if config.leader != leader {
                continue;
            }
            if config.is_frozen() {
                warn!(link = %link.id, leader = %leader, "Reconfiguration refused: link is active");
                return Err(StateConflictError::LinkActive(link.id).into());
            }
            config.followers = followers
                .iter()
                .map(|f| (f.clone(), FollowerSlot::enabled()))
                .collect();
            info!(link = %link.id, leader = %leader, followers = ?followers, "Replication reconfigured");
            return Ok(link.id);
        }

        let id = LinkId(self.next_link.fetch_add(1, Ordering::SeqCst));
        let config = LinkConfig {
            leader: leader.to_string(),
            followers: followers
                .iter()
                .map(|f| (f.clone(), FollowerSlot::enabled()))
                .collect(),
            state: LinkState::Inactive,
            draining: false,
            replicated: HashSet::new(),
        };
        links.insert(
            id,
            Arc::new(Link {
                id,
                config: Mutex::new(config),
                gate: RwLock::new(()),
                audit: RwLock::new(Vec::new()),
            }),
        );

        info!(link = %id, leader = %leader, followers = ?followers, "Replication configured");
        Ok(id)
    }

    /// Toggle a link on or off.
    ///
    /// Turning off waits for in-flight fan-outs to drain.
    pub async fn set_active(&self, link_id: LinkId, active: bool) -> CopierResult<()> {
        let link = self.link(link_id).await?;
        if active {
            self.activate(&link).await
        } else {
            self.deactivate(&link).await;
            Ok(())
        }
    }

    async fn activate(&self, link: &Link) -> CopierResult<()> {
        let mut config = link.config.lock().await;
        if config.draining {
            return Err(StateConflictError::LinkDraining(link.id).into());
        }
        if config.state == LinkState::Active {
            return Err(StateConflictError::LinkActive(link.id).into());
        }
        if config.leader.is_empty() {
            return Err(ValidationError::MissingLeader.into());
        }
        if config.followers.is_empty() {
            return Err(ValidationError::EmptyFollowers.into());
        }

        config.state = LinkState::Active;
        info!(
            link = %link.id,
            leader = %config.leader,
            followers = config.followers.len(),
            "Trade copier started"
        );
        Ok(())
    }

    async fn deactivate(&self, link: &Link) {
        {
            let mut config = link.config.lock().await;
            if config.state == LinkState::Inactive {
                return;
            }
            config.draining = true;
        }

        debug!(link = %link.id, "Draining in-flight fan-outs");
        let _drained = link.gate.write().await;

        let mut config = link.config.lock().await;
        config.state = LinkState::Inactive;
        config.draining = false;
        info!(link = %link.id, "Trade copier stopped");
    }

    /// Remove an inactive link.
    pub async fn remove(&self, link_id: LinkId) -> CopierResult<()> {
        let mut links = self.links.write().await;
        let link = links
            .get(&link_id)
            .ok_or(ValidationError::UnknownLink(link_id))?;
        if link.config.lock().await.is_frozen() {
            return Err(StateConflictError::LinkActive(link_id).into());
        }
        links.remove(&link_id);
        info!(link = %link_id, "Replication link removed");
        Ok(())
    }

    /// Operator resumption of a suspended follower.
    pub async fn resume_follower(&self, link_id: LinkId, follower_id: &str) -> CopierResult<()> {
        let link = self.link(link_id).await?;
        let not_a_follower = || ValidationError::NotAFollower {
            link: link_id,
            follower: follower_id.to_string(),
        };
        if !link.config.lock().await.followers.contains_key(follower_id) {
            return Err(not_a_follower().into());
        }

        let account = self
            .ledger
            .snapshot(follower_id)
            .await
            .ok_or_else(|| ValidationError::UnknownAccount(follower_id.to_string()))?;
        if let Some(rule) = RiskEvaluator::blocking_rule(&account) {
            return Err(ValidationError::FollowerStillBreached {
                follower: follower_id.to_string(),
                rule,
            }
            .into());
        }

        let mut config = link.config.lock().await;
        let slot = config.followers.get_mut(follower_id).ok_or_else(not_a_follower)?;
        slot.state = FollowerState::Enabled;
        slot.suspended_for = None;
        info!(link = %link_id, follower = %follower_id, "Follower resumed by operator");
        Ok(())
    }

    /// First link in which `account_id` is leader or follower.
    pub async fn role_of(&self, account_id: &str) -> Option<LinkId> {
        for link in self.links.read().await.values() {
            if link.config.lock().await.has_member(account_id) {
                return Some(link.id);
            }
        }
        None
    }

    pub async fn audit(&self, link_id: LinkId) -> CopierResult<Vec<FanOutRecord>> {
        let link = self.link(link_id).await?;
        let audit = link.audit.read().await.clone();
        Ok(audit)
    }

    pub async fn status(&self, link_id: LinkId) -> CopierResult<LinkStatus> {
        let link = self.link(link_id).await?;
        Ok(Self::link_status(&link).await)
    }

    pub async fn statuses(&self) -> Vec<LinkStatus> {
        let links: Vec<_> = self.links.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(links.len());
        for link in links {
            out.push(Self::link_status(&link).await);
        }
        out
    }

    async fn link_status(link: &Link) -> LinkStatus {
        let fan_outs = link.audit.read().await.len();
        let config = link.config.lock().await;
        LinkStatus {
            id: link.id,
            leader_id: config.leader.clone(),
            state: config.state,
            draining: config.draining,
            followers: config
                .followers
                .iter()
                .map(|(id, slot)| FollowerStatus {
                    account_id: id.clone(),
                    state: slot.state,
                    last: slot.last.clone(),
                })
                .collect(),
            fan_outs,
        }
    }

    /// Replicate a fill to every active link led by its account.
    ///
    /// Only the leader's own manual fills are mirrored; replicated fills
    /// never cascade into further links.
    pub async fn on_leader_fill(&self, fill: &Fill) -> Vec<FanOutRecord> {
        if !fill.is_filled() || fill.filled_quantity == 0 || !fill.causality.is_manual() {
            return Vec::new();
        }

        let mut led = Vec::new();
        for link in self.links.read().await.values() {
            if link.config.lock().await.leader == fill.account_id {
                led.push(link.clone());
            }
        }

        join_all(led.iter().map(|link| self.fan_out(link, fill)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn fan_out(&self, link: &Link, leader_fill: &Fill) -> Option<FanOutRecord> {
        if !link.config.lock().await.accepts_fan_out() {
            return None;
        }
        let _in_flight = link.gate.read().await;

        // Membership snapshot, frozen for the rest of this fan-out
        let (leader, followers) = {
            let mut config = link.config.lock().await;
            if !config.accepts_fan_out() {
                return None;
            }
            if !config.replicated.insert(leader_fill.id) {
                debug!(link = %link.id, fill = %leader_fill.id, "Leader fill already replicated");
                return None;
            }
            let followers: Vec<(String, FollowerSlot)> = config
                .followers
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect();
            (config.leader.clone(), followers)
        };

        let started_at = Utc::now();
        let quantity = self.sizer.follower_quantity(leader_fill.filled_quantity);

        let mut outcomes = BTreeMap::new();
        let mut dispatches = Vec::new();
        for (follower_id, slot) in followers {
            if slot.state == FollowerState::Suspended {
                let rule = slot.suspended_for.unwrap_or_else(|| "suspended".to_string());
                outcomes.insert(follower_id, FollowerOutcome::Suspended { rule });
            } else {
                dispatches.push(self.replicate_to(link, leader_fill, follower_id, quantity));
            }
        }

        outcomes.extend(join_all(dispatches).await);

        let record = FanOutRecord {
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            link_id: link.id,
            leader_id: leader,
            leader_fill_id: leader_fill.id,
            symbol: leader_fill.symbol.clone(),
            side: leader_fill.side,
            quantity,
            started_at,
            completed_at: Utc::now(),
            outcomes,
        };

        self.record(link, &record).await;
        Some(record)
    }

    /// Mirror the leader fill onto one follower.
    ///
    /// The breach check, execution and booking all happen under the
    /// follower's order lock, the same lock manual orders take.
    async fn replicate_to(
        &self,
        link: &Link,
        leader_fill: &Fill,
        follower_id: String,
        quantity: u32,
    ) -> (String, FollowerOutcome) {
        let intent = OrderIntent::mirror(leader_fill, &follower_id, quantity);
        let missing =
            || FollowerOutcome::from_fill(Fill::rejected(&intent, ExecutionError::UnknownAccount));

        let Some(_entry) = self.ledger.lock_orders(&follower_id).await else {
            return (follower_id, missing());
        };
        let Some(account) = self.ledger.snapshot(&follower_id).await else {
            return (follower_id, missing());
        };
        if let Some(rule) = RiskEvaluator::blocking_rule(&account) {
            self.suspend(link, &follower_id, &rule).await;
            return (follower_id, FollowerOutcome::Suspended { rule });
        }

        let fill = self.adapter.execute(&intent, &account).await;
        match self.ledger.apply_fill(&follower_id, &fill).await {
            Ok(Some(updated)) => {
                if let Some(rule) = RiskEvaluator::blocking_rule(&updated) {
                    self.suspend(link, &follower_id, &rule).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(follower = %follower_id, error = %e, "Failed to record replicated fill");
            }
        }

        (follower_id, FollowerOutcome::from_fill(fill))
    }

    async fn suspend(&self, link: &Link, follower_id: &str, rule: &str) {
        let mut config = link.config.lock().await;
        if let Some(slot) = config.followers.get_mut(follower_id) {
            if slot.state == FollowerState::Enabled {
                slot.state = FollowerState::Suspended;
                slot.suspended_for = Some(rule.to_string());
                warn!(link = %link.id, follower = %follower_id, rule = %rule, "Follower suspended");
            }
        }
    }

    async fn record(&self, link: &Link, record: &FanOutRecord) {
        {
            let mut config = link.config.lock().await;
            for (follower_id, outcome) in &record.outcomes {
                if let Some(slot) = config.followers.get_mut(follower_id) {
                    slot.last = Some(LastReplication {
                        sequence: record.sequence,
                        status: outcome.label().to_string(),
                        reason: match outcome {
                            FollowerOutcome::Suspended { rule } => Some(rule.clone()),
                            other => other.rejection().map(|r| r.to_string()),
                        },
                        at: record.completed_at,
                    });
                }
            }
        }

        info!(
            link = %link.id,
            sequence = record.sequence,
            symbol = %record.symbol,
            side = %record.side,
            quantity = record.quantity,
            dispatched = record.dispatched().count(),
            "Fan-out complete"
        );
        link.audit.write().await.push(record.clone());
    }

    /// Consume replication events until every sender is dropped.
    ///
    /// Leader fills are routed to their leader's lane. A flush is
    /// acknowledged once every lane has worked through what it held when the
    /// flush arrived.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ReplicationEvent>) {
        info!("Replication worker started");
        let mut lanes: HashMap<String, mpsc::UnboundedSender<ReplicationEvent>> = HashMap::new();

        while let Some(event) = events.recv().await {
            match event {
                ReplicationEvent::LeaderFill(fill) => {
                    let lane = lanes
                        .entry(fill.account_id.clone())
                        .or_insert_with(|| self.clone().spawn_lane(fill.account_id.clone()));
                    if lane.send(ReplicationEvent::LeaderFill(fill)).is_err() {
                        error!("Replication lane closed; fill dropped");
                    }
                }
                ReplicationEvent::Flush(ack) => {
                    let mut pending = Vec::with_capacity(lanes.len());
                    for lane in lanes.values() {
                        let (tx, rx) = oneshot::channel();
                        if lane.send(ReplicationEvent::Flush(tx)).is_ok() {
                            pending.push(rx);
                        }
                    }
                    tokio::spawn(async move {
                        join_all(pending).await;
                        let _ = ack.send(());
                    });
                }
            }
        }
        info!("Replication worker stopped");
    }

    fn spawn_lane(self: Arc<Self>, leader: String) -> mpsc::UnboundedSender<ReplicationEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            debug!(leader = %leader, "Replication lane started");
            while let Some(event) = rx.recv().await {
                match event {
                    ReplicationEvent::LeaderFill(fill) => {
                        self.on_leader_fill(&fill).await;
                    }
                    ReplicationEvent::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!(leader = %leader, "Replication lane stopped");
        });
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::time::Instant;

    use crate::error::CopierError;
    use crate::execution::SimulatedVenue;
    use crate::market::QuoteBoard;
    use crate::models::{Account, OrderSide, Platform, PropFirmRule, DAILY_LOSS_LIMIT, MAX_DRAWDOWN};
    use crate::trading::EngineConfig;

    struct Harness {
        copier: Arc<TradeCopier>,
        ledger: Arc<AccountLedger>,
        projectx: SimulatedVenue,
    }

    async fn harness() -> Harness {
        let config = EngineConfig::default();
        let board = QuoteBoard::new(&config.quotes, 16);
        let (adapter, projectx, _) = ExecutionAdapter::simulated(&config, board);
        let ledger = Arc::new(AccountLedger::from_config(&config));

        for i in 1..=4 {
            ledger
                .insert(Account::new(
                    format!("acc_{}", i),
                    Platform::ProjectX,
                    "TopstepX",
                    dec!(50000),
                ))
                .await
                .unwrap();
        }

        let copier = Arc::new(TradeCopier::new(
            ledger.clone(),
            Arc::new(adapter),
            PositionSizer::default(),
        ));
        Harness { copier, ledger, projectx }
    }

    fn followers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn leader_fill(qty: u32) -> Fill {
        let intent = OrderIntent::manual("acc_1", "ES", OrderSide::Buy, qty);
        Fill::filled(&intent, dec!(5320.50), qty, None)
    }

    async fn breach(ledger: &AccountLedger, id: &str) {
        ledger.remove(id).await.unwrap();
        ledger
            .insert(Account::with_rules(
                id,
                Platform::ProjectX,
                "TopstepX",
                dec!(50000),
                vec![
                    PropFirmRule::with_current(DAILY_LOSS_LIMIT, dec!(1000), dec!(1000)),
                    PropFirmRule::new(MAX_DRAWDOWN, dec!(2500)),
                ],
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_configuration_validation() {
        let h = harness().await;

        let err = h.copier.configure("acc_1", &[]).await.unwrap_err();
        assert_eq!(err, CopierError::Validation(ValidationError::EmptyFollowers));

        let err = h.copier.configure("", &followers(&["acc_2"])).await.unwrap_err();
        assert_eq!(err, CopierError::Validation(ValidationError::MissingLeader));

        let err = h
            .copier
            .configure("acc_1", &followers(&["acc_2", "acc_1"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CopierError::Validation(ValidationError::LeaderIsFollower(_))
        ));

        let err = h
            .copier
            .configure("acc_1", &followers(&["acc_9"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CopierError::Validation(ValidationError::UnknownAccount(_))
        ));

        // Nothing was partially applied
        assert!(h.copier.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_configuration_frozen_while_active() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2", "acc_3"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let err = h
            .copier
            .configure("acc_1", &followers(&["acc_4"]))
            .await
            .unwrap_err();
        assert_eq!(err, CopierError::Conflict(StateConflictError::LinkActive(link)));

        let err = h.copier.set_active(link, true).await.unwrap_err();
        assert_eq!(err, CopierError::Conflict(StateConflictError::LinkActive(link)));

        let status = h.copier.status(link).await.unwrap();
        let ids: Vec<_> = status.followers.iter().map(|f| f.account_id.as_str()).collect();
        assert_eq!(ids, vec!["acc_2", "acc_3"]);
        assert_eq!(status.state, LinkState::Active);

        assert!(h.copier.remove(link).await.is_err());

        // Once stopped the same leader can be reconfigured in place
        h.copier.set_active(link, false).await.unwrap();
        let same = h
            .copier
            .configure("acc_1", &followers(&["acc_4"]))
            .await
            .unwrap();
        assert_eq!(same, link);
        h.copier.remove(link).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_fan_out_to_all_followers() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2", "acc_3"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let records = h.copier.on_leader_fill(&leader_fill(2)).await;
        assert_eq!(records.len(), 1);

        let record = &records[0];
        for id in ["acc_2", "acc_3"] {
            match record.outcome(id) {
                Some(FollowerOutcome::Filled { fill }) => {
                    assert_eq!(fill.side, OrderSide::Buy);
                    assert_eq!(fill.filled_quantity, 2);
                    assert_eq!(fill.symbol, "ES");
                }
                other => panic!("unexpected outcome for {}: {:?}", id, other),
            }
            assert_eq!(h.ledger.snapshot(id).await.unwrap().net_quantity("ES"), 2);
        }

        assert_eq!(h.copier.audit(link).await.unwrap(), records);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breached_follower_is_isolated() {
        let h = harness().await;
        breach(&h.ledger, "acc_3").await;

        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2", "acc_3"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let record = h.copier.on_leader_fill(&leader_fill(2)).await.remove(0);
        assert_eq!(record.outcome("acc_2").map(|o| o.label()), Some("FILLED"));
        assert_eq!(
            record.outcome("acc_3"),
            Some(&FollowerOutcome::Suspended {
                rule: DAILY_LOSS_LIMIT.to_string()
            })
        );
        assert_eq!(record.dispatched().collect::<Vec<_>>(), vec!["acc_2"]);
        assert_eq!(h.projectx.submissions("acc_3").await, 0);

        // Suspension sticks until an operator resumes it
        let status = h.copier.status(link).await.unwrap();
        let acc_3 = status.followers.iter().find(|f| f.account_id == "acc_3").unwrap();
        assert_eq!(acc_3.state, FollowerState::Suspended);

        let err = h.copier.resume_follower(link, "acc_3").await.unwrap_err();
        assert!(matches!(
            err,
            CopierError::Validation(ValidationError::FollowerStillBreached { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_without_retry() {
        let h = harness().await;
        h.projectx.set_latency("acc_2", Duration::from_secs(30)).await;

        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2", "acc_3"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let record = h.copier.on_leader_fill(&leader_fill(1)).await.remove(0);
        let acc_2 = record.outcome("acc_2").unwrap();
        assert_eq!(acc_2.label(), "REJECTED");
        assert_eq!(acc_2.rejection(), Some(&ExecutionError::Timeout));
        assert_eq!(record.outcome("acc_3").map(|o| o.label()), Some("FILLED"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.projectx.submissions("acc_2").await, 1);

        let status = h.copier.status(link).await.unwrap();
        let last = status.followers[0].last.clone().unwrap();
        assert_eq!(last.status, "REJECTED");
        assert_eq!(last.reason.as_deref(), Some("TIMEOUT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_runs_followers_in_parallel() {
        let h = harness().await;
        h.projectx.set_latency("acc_2", Duration::from_millis(500)).await;
        h.projectx.set_latency("acc_3", Duration::from_millis(2000)).await;
        h.projectx.set_latency("acc_4", Duration::from_millis(1200)).await;

        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2", "acc_3", "acc_4"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let started = Instant::now();
        let record = h.copier.on_leader_fill(&leader_fill(1)).await.remove(0);
        let elapsed = started.elapsed();

        assert_eq!(record.dispatched().count(), 3);
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(3700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_link_and_non_manual_fills_do_not_replicate() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2"]))
            .await
            .unwrap();

        assert!(h.copier.on_leader_fill(&leader_fill(1)).await.is_empty());

        h.copier.set_active(link, true).await.unwrap();
        let replicated = OrderIntent::mirror(&leader_fill(1), "acc_1", 1);
        let fill = Fill::filled(&replicated, dec!(5320.50), 1, None);
        assert!(h.copier.on_leader_fill(&fill).await.is_empty());

        let intent = OrderIntent::manual("acc_1", "ES", OrderSide::Buy, 1);
        let rejected = Fill::rejected(&intent, ExecutionError::Timeout);
        assert!(h.copier.on_leader_fill(&rejected).await.is_empty());

        assert!(h.copier.audit(link).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivation_waits_for_in_flight_fan_out() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let copier = h.copier.clone();
        let fan_out = tokio::spawn(async move { copier.on_leader_fill(&leader_fill(1)).await });

        // Let the fan-out reach the venue
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.copier.set_active(link, false).await.unwrap();

        // Deactivation returned only after the in-flight fill landed
        assert_eq!(h.copier.audit(link).await.unwrap().len(), 1);
        assert_eq!(h.ledger.snapshot("acc_2").await.unwrap().net_quantity("ES"), 1);
        assert_eq!(fan_out.await.unwrap().len(), 1);

        // No new dispatches afterwards
        assert!(h.copier.on_leader_fill(&leader_fill(1)).await.is_empty());
        assert_eq!(h.projectx.submissions("acc_2").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_suspended_after_fill_breaches() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        // Daily loss limit of 1000 is consumed by 40 contracts
        let record = h.copier.on_leader_fill(&leader_fill(40)).await.remove(0);
        assert_eq!(record.outcome("acc_2").map(|o| o.label()), Some("FILLED"));

        let status = h.copier.status(link).await.unwrap();
        assert_eq!(status.followers[0].state, FollowerState::Suspended);

        let next = h.copier.on_leader_fill(&leader_fill(1)).await.remove(0);
        assert_eq!(next.outcome("acc_2").map(|o| o.label()), Some("SUSPENDED"));
        assert_eq!(h.projectx.submissions("acc_2").await, 1);

        // A new day clears the breach and the operator can resume
        h.ledger.start_new_day().await;
        h.copier.resume_follower(link, "acc_2").await.unwrap();
        let resumed = h.copier.on_leader_fill(&leader_fill(1)).await.remove(0);
        assert_eq!(resumed.outcome("acc_2").map(|o| o.label()), Some("FILLED"));
        assert!(resumed.sequence > next.sequence);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_leader_fill_fans_out_once() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let fill = leader_fill(1);
        let (first, second) = tokio::join!(
            h.copier.on_leader_fill(&fill),
            h.copier.on_leader_fill(&fill)
        );
        assert_eq!(first.len() + second.len(), 1);
        assert!(h.copier.on_leader_fill(&fill).await.is_empty());

        assert_eq!(h.copier.audit(link).await.unwrap().len(), 1);
        assert_eq!(h.projectx.submissions("acc_2").await, 1);
        assert_eq!(h.ledger.snapshot("acc_2").await.unwrap().net_quantity("ES"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_requires_follower_in_ledger() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2"]))
            .await
            .unwrap();

        let err = h.copier.resume_follower(link, "acc_3").await.unwrap_err();
        assert!(matches!(
            err,
            CopierError::Validation(ValidationError::NotAFollower { .. })
        ));

        h.ledger.remove("acc_2").await.unwrap();
        let err = h.copier.resume_follower(link, "acc_2").await.unwrap_err();
        assert_eq!(
            err,
            CopierError::Validation(ValidationError::UnknownAccount("acc_2".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_lanes_do_not_block_other_leaders() {
        let h = harness().await;
        h.projectx.set_latency("acc_2", Duration::from_millis(4900)).await;

        let slow = h.copier.configure("acc_1", &followers(&["acc_2"])).await.unwrap();
        let fast = h.copier.configure("acc_3", &followers(&["acc_4"])).await.unwrap();
        h.copier.set_active(slow, true).await.unwrap();
        h.copier.set_active(fast, true).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(h.copier.clone().run(rx));

        let acc_3 = OrderIntent::manual("acc_3", "ES", OrderSide::Buy, 1);
        tx.send(ReplicationEvent::LeaderFill(leader_fill(1))).unwrap();
        tx.send(ReplicationEvent::LeaderFill(Fill::filled(&acc_3, dec!(5320.50), 1, None)))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert!(h.copier.audit(slow).await.unwrap().is_empty());
        assert_eq!(h.copier.audit(fast).await.unwrap().len(), 1);

        let (ack, done) = oneshot::channel();
        tx.send(ReplicationEvent::Flush(ack)).unwrap();
        done.await.unwrap();
        assert_eq!(h.copier.audit(slow).await.unwrap().len(), 1);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_keeps_leader_fill_order() {
        let h = harness().await;
        let link = h
            .copier
            .configure("acc_1", &followers(&["acc_2"]))
            .await
            .unwrap();
        h.copier.set_active(link, true).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(h.copier.clone().run(rx));

        let fills: Vec<Fill> = (1..=3).map(leader_fill).collect();
        for fill in &fills {
            tx.send(ReplicationEvent::LeaderFill(fill.clone())).unwrap();
        }
        let (ack, done) = oneshot::channel();
        tx.send(ReplicationEvent::Flush(ack)).unwrap();
        done.await.unwrap();

        let audit = h.copier.audit(link).await.unwrap();
        let order: Vec<_> = audit.iter().map(|r| r.leader_fill_id).collect();
        assert_eq!(order, fills.iter().map(|f| f.id).collect::<Vec<_>>());
        assert_eq!(h.ledger.snapshot("acc_2").await.unwrap().net_quantity("ES"), 6);
    }
}
