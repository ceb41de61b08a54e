//! Trade replication and risk monitoring for prop-firm futures accounts.
//!
//! Mirrors a leader account's manual fills onto follower accounts across
//! the ProjectX and Tradovate platforms while tracking each account's
//! prop-firm risk rules against a live quote feed.

pub mod engine;
pub mod error;
pub mod execution;
pub mod market;
pub mod models;
pub mod simulation;
pub mod trading;

pub use engine::Engine;
pub use error::{CopierError, CopierResult, ExecutionError, StateConflictError, ValidationError};
