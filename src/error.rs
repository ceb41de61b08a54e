//! Error taxonomy for the replication and risk engine.
//!
//! Configuration problems are rejected synchronously and never partially
//! applied. Execution problems are per-order data carried inside a rejected
//! [`Fill`](crate::models::Fill) so they can be audited alongside successes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::LinkId;

/// Bad configuration or a malformed request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Leader account must be set")]
    MissingLeader,

    #[error("Follower set must not be empty")]
    EmptyFollowers,

    #[error("Account {0} cannot follow itself as leader")]
    LeaderIsFollower(String),

    #[error("Follower {0} listed more than once")]
    DuplicateFollower(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Unknown replication link: {0}")]
    UnknownLink(LinkId),

    #[error("Account {follower} is not a follower of {link}")]
    NotAFollower { link: LinkId, follower: String },

    #[error("Order quantity must be positive")]
    ZeroQuantity,

    #[error("Order symbol must not be empty")]
    EmptySymbol,

    #[error("No accounts selected")]
    NoAccountsSelected,

    #[error("Follower {follower} still breaches {rule}")]
    FollowerStillBreached { follower: String, rule: String },
}

/// An operation that is valid in general but not in the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateConflictError {
    #[error("Replication link {0} is active; configuration is frozen")]
    LinkActive(LinkId),

    #[error("Replication link {0} is draining after deactivation")]
    LinkDraining(LinkId),

    #[error("Account {account} holds a replication role in {link}")]
    AccountInUse { account: String, link: LinkId },
}

/// Errors surfaced by the replication control surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CopierError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] StateConflictError),
}

/// Per-order execution failure. Non-fatal and always recorded.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionError {
    #[error("TIMEOUT")]
    Timeout,

    #[error("REJECTED_BY_PLATFORM: {reason}")]
    RejectedByPlatform { reason: String },

    #[error("RISK_BREACHED: {rule}")]
    RiskBreached { rule: String },

    #[error("UNKNOWN_ACCOUNT")]
    UnknownAccount,
}

impl ExecutionError {
    /// Short code used in audit output.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::Timeout => "TIMEOUT",
            ExecutionError::RejectedByPlatform { .. } => "REJECTED_BY_PLATFORM",
            ExecutionError::RiskBreached { .. } => "RISK_BREACHED",
            ExecutionError::UnknownAccount => "UNKNOWN_ACCOUNT",
        }
    }

    pub fn platform(reason: impl Into<String>) -> Self {
        ExecutionError::RejectedByPlatform {
            reason: reason.into(),
        }
    }
}

pub type CopierResult<T> = std::result::Result<T, CopierError>;
