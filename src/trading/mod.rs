//! Trading logic: risk evaluation, account ledger, replication.

mod config;
mod copier;
mod ledger;
mod position_sizer;
mod risk;
mod selection;

pub use config::{EngineConfig, QuoteSeed};
pub use copier::{ReplicationEvent, TradeCopier};
pub use ledger::{
    AccountLedger, ExposureModel, FlatExposure, GlobalStats, LedgerSettings, PointValueExposure,
};
pub use position_sizer::{PositionSizer, SizingMethod};
pub use risk::{RiskEvaluator, RuleStatus, Severity};
pub use selection::SelectionState;
