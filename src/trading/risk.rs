//! Prop-firm rule evaluation: utilization, severity bands, and breach gating.
//!
//! Evaluation is a pure function over an account snapshot. Severity is
//! advisory and only drives alerting; `breached` is the sole trading gate.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{Account, PropFirmRule};

const CRITICAL_ABOVE: Decimal = dec!(80);
const WARNING_ABOVE: Decimal = dec!(50);

/// Alerting band for a rule's utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Nominal,
    Warning,
    Critical,
}

impl Severity {
    pub fn from_percentage(percentage: Decimal) -> Self {
        if percentage > CRITICAL_ABOVE {
            Severity::Critical
        } else if percentage > WARNING_ABOVE {
            Severity::Warning
        } else {
            Severity::Nominal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Nominal => "nominal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Evaluated state of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub name: String,
    pub limit: Decimal,
    pub current: Decimal,
    /// `current / limit * 100`
    pub percentage: Decimal,
    pub severity: Severity,
    pub breached: bool,
}

impl RuleStatus {
    fn from_rule(rule: &PropFirmRule) -> Self {
        let percentage = if rule.limit > Decimal::ZERO {
            rule.current / rule.limit * Decimal::ONE_HUNDRED
        } else {
            // A zero limit is exhausted by definition
            Decimal::ONE_HUNDRED
        };

        Self {
            name: rule.name.clone(),
            limit: rule.limit,
            current: rule.current,
            percentage,
            severity: Severity::from_percentage(percentage),
            breached: rule.current >= rule.limit,
        }
    }
}

/// Stateless rule evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskEvaluator;

impl RiskEvaluator {
    pub fn evaluate(account: &Account) -> Vec<RuleStatus> {
        account.rules.iter().map(RuleStatus::from_rule).collect()
    }

    /// Name of the first breached rule, if trading must be blocked.
    pub fn blocking_rule(account: &Account) -> Option<String> {
        Self::evaluate(account)
            .into_iter()
            .find(|s| s.breached)
            .map(|s| s.name)
    }

    /// Highest severity across all rules.
    pub fn worst_severity(account: &Account) -> Severity {
        Self::evaluate(account)
            .iter()
            .map(|s| s.severity)
            .max()
            .unwrap_or(Severity::Nominal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, DAILY_LOSS_LIMIT, MAX_DRAWDOWN};

    fn account_with(daily: Decimal, drawdown: Decimal) -> Account {
        Account::with_rules(
            "acc_1",
            Platform::ProjectX,
            "TopstepX",
            dec!(50000),
            vec![
                PropFirmRule::with_current(DAILY_LOSS_LIMIT, dec!(1000), daily),
                PropFirmRule::with_current(MAX_DRAWDOWN, dec!(2500), drawdown),
            ],
        )
    }

    #[test]
    fn test_percentage_and_bands() {
        let account = account_with(dec!(850), dec!(1250));
        let statuses = RiskEvaluator::evaluate(&account);

        assert_eq!(statuses[0].percentage, dec!(85));
        assert_eq!(statuses[0].severity, Severity::Critical);
        assert_eq!(statuses[1].percentage, dec!(50));
        // Exactly 50% is still nominal
        assert_eq!(statuses[1].severity, Severity::Nominal);
        assert!(statuses.iter().all(|s| !s.breached));
        assert_eq!(RiskEvaluator::worst_severity(&account), Severity::Critical);
    }

    #[test]
    fn test_severity_does_not_block() {
        let account = account_with(dec!(999), dec!(0));
        assert_eq!(RiskEvaluator::blocking_rule(&account), None);
    }

    #[test]
    fn test_reaching_limit_blocks() {
        let account = account_with(dec!(0), dec!(2500));
        assert_eq!(
            RiskEvaluator::blocking_rule(&account),
            Some(MAX_DRAWDOWN.to_string())
        );
    }

    #[test]
    fn test_warning_band() {
        assert_eq!(Severity::from_percentage(dec!(50.01)), Severity::Warning);
        assert_eq!(Severity::from_percentage(dec!(80)), Severity::Warning);
        assert_eq!(Severity::from_percentage(dec!(80.01)), Severity::Critical);
    }
}
