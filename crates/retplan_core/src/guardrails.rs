//! Guyton-Klinger guardrail withdrawal policy.
//!
//! Adjustments touch only the discretionary share of spending; essential
//! spending rides through untouched. The capital-preservation, prosperity,
//! and portfolio-management rules are suspended inside the final 15 years
//! of the horizon; the inflation rule always applies.

use serde::{Deserialize, Serialize};

use crate::model::results::AdjustmentType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailInput {
    pub initial_withdrawal_rate: f64,
    pub current_withdrawal_rate: f64,
    pub previous_withdrawal: f64,
    pub portfolio_value: f64,
    pub inflation: f64,
    pub years_since_retirement: u32,
    pub remaining_horizon_years: u32,
    pub is_first_year: bool,
    pub prior_year_real_return: f64,
    /// Share of spending that is essential (the floor).
    pub essential_share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailDecision {
    pub withdrawal: f64,
    pub adjustment: AdjustmentType,
    pub reason: Option<String>,
}

/// Rules only engage with more than this many years of horizon left.
const RULE_HORIZON_YEARS: u32 = 15;
/// Hard ceiling relative to the previous withdrawal.
const CEILING_MULTIPLE: f64 = 1.5;

/// First-year withdrawal: the planned rate applied to the retirement-date
/// portfolio, but never below the actual net need (so planning levers
/// propagate into year-one behaviour).
#[must_use]
pub fn initial_withdrawal(withdrawal_rate: f64, portfolio_value: f64, net_need: f64) -> f64 {
    (withdrawal_rate * portfolio_value).max(net_need)
}

/// Apply the guardrail rules to produce this year's withdrawal from last
/// year's.
#[must_use]
pub fn apply_guardrails(input: &GuardrailInput) -> GuardrailDecision {
    let previous = input.previous_withdrawal;
    let discretionary = previous * (1.0 - input.essential_share).max(0.0);
    let rules_active = input.remaining_horizon_years > RULE_HORIZON_YEARS;

    let ratio = if input.initial_withdrawal_rate > 0.0 {
        input.current_withdrawal_rate / input.initial_withdrawal_rate
    } else {
        1.0
    };

    let mut adjustment = AdjustmentType::None;
    let mut reason = None;
    let mut withdrawal = previous;

    if rules_active && ratio > 1.3 {
        withdrawal = previous - 0.40 * discretionary;
        adjustment = AdjustmentType::GuardrailCut;
        reason = Some(format!("capital preservation: ratio {ratio:.2} > 1.3"));
    } else if rules_active && ratio > 1.2 {
        let cut = 0.20 + (ratio - 1.2) / 0.1 * 0.20;
        withdrawal = previous - cut * discretionary;
        adjustment = AdjustmentType::GuardrailCut;
        reason = Some(format!(
            "graduated cut {:.0}% of discretionary: ratio {ratio:.2}",
            cut * 100.0
        ));
    } else if rules_active && ratio > 1.1 {
        let cut = 0.10 + (ratio - 1.1) / 0.1 * 0.10;
        withdrawal = previous - cut * discretionary;
        adjustment = AdjustmentType::GuardrailCut;
        reason = Some(format!(
            "graduated cut {:.0}% of discretionary: ratio {ratio:.2}",
            cut * 100.0
        ));
    } else if rules_active && ratio < 0.7 {
        withdrawal = previous + 0.30 * discretionary;
        adjustment = AdjustmentType::GuardrailRaise;
        reason = Some(format!("prosperity: ratio {ratio:.2} < 0.7"));
    } else if rules_active && ratio < 0.8 {
        let raise = 0.10 + (0.8 - ratio) / 0.1 * 0.20;
        withdrawal = previous + raise * discretionary;
        adjustment = AdjustmentType::GuardrailRaise;
        reason = Some(format!(
            "graduated raise {:.0}% of discretionary: ratio {ratio:.2}",
            raise * 100.0
        ));
    } else if rules_active && input.prior_year_real_return < 0.0 {
        // Portfolio-management rule: freeze after a negative real year.
        adjustment = AdjustmentType::InflationSkipped;
        reason = Some("portfolio management: negative prior real return".to_string());
    } else {
        withdrawal = previous * (1.0 + input.inflation);
        adjustment = AdjustmentType::InflationAdjustment;
    }

    let floor = input.essential_share * previous;
    let ceiling = CEILING_MULTIPLE * previous;
    withdrawal = withdrawal.clamp(floor, ceiling);

    GuardrailDecision {
        withdrawal,
        adjustment,
        reason,
    }
}
