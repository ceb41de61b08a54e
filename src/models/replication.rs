//! Replication link identifiers, states, and audit records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

use super::{Fill, OrderSide};

/// Identifier of a replication link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Activation state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkState {
    Inactive,
    Active,
}

/// Per-follower replication state within a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FollowerState {
    Enabled,
    Suspended,
}

/// What happened to one follower during a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum FollowerOutcome {
    Filled { fill: Fill },
    Rejected { fill: Fill },
    Suspended { rule: String },
}

impl FollowerOutcome {
    pub fn from_fill(fill: Fill) -> Self {
        if fill.is_filled() {
            FollowerOutcome::Filled { fill }
        } else {
            FollowerOutcome::Rejected { fill }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FollowerOutcome::Filled { .. } => "FILLED",
            FollowerOutcome::Rejected { .. } => "REJECTED",
            FollowerOutcome::Suspended { .. } => "SUSPENDED",
        }
    }

    pub fn rejection(&self) -> Option<&ExecutionError> {
        match self {
            FollowerOutcome::Rejected { fill } => fill.rejection.as_ref(),
            _ => None,
        }
    }

    /// Whether an order was sent to the venue for this follower.
    pub fn was_dispatched(&self) -> bool {
        !matches!(self, FollowerOutcome::Suspended { .. })
    }
}

/// Audit entry for one leader fill fanned out to a link's followers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutRecord {
    pub sequence: u64,
    pub link_id: LinkId,
    pub leader_id: String,
    pub leader_fill_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcomes: BTreeMap<String, FollowerOutcome>,
}

impl FanOutRecord {
    pub fn outcome(&self, follower_id: &str) -> Option<&FollowerOutcome> {
        self.outcomes.get(follower_id)
    }

    pub fn dispatched(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.was_dispatched())
            .map(|(id, _)| id.as_str())
    }
}

impl fmt::Display for FanOutRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {} {} from {}:",
            self.sequence, self.link_id, self.side, self.quantity, self.symbol, self.leader_id
        )?;
        for (follower, outcome) in &self.outcomes {
            match outcome {
                FollowerOutcome::Filled { fill } => write!(
                    f,
                    " {{{}: FILLED {}@{}}}",
                    follower,
                    fill.filled_quantity,
                    fill.filled_price.unwrap_or_default()
                )?,
                FollowerOutcome::Rejected { fill } => write!(
                    f,
                    " {{{}: REJECTED, reason: {}}}",
                    follower,
                    fill.rejection.as_ref().map(|r| r.code()).unwrap_or("UNKNOWN")
                )?,
                FollowerOutcome::Suspended { rule } => {
                    write!(f, " {{{}: SUSPENDED ({})}}", follower, rule)?
                }
            }
        }
        Ok(())
    }
}

/// Last replication result for a follower, kept for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastReplication {
    pub sequence: u64,
    pub status: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a follower within a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowerStatus {
    pub account_id: String,
    pub state: FollowerState,
    pub last: Option<LastReplication>,
}

/// Point-in-time view of a replication link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub id: LinkId,
    pub leader_id: String,
    pub state: LinkState,
    pub draining: bool,
    pub followers: Vec<FollowerStatus>,
    pub fan_outs: usize,
}
