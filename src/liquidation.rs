//! Liquidation math.
//!
//! Pure functions shared by the ranked, dutch and backstop paths: the health
//! ratio, the dutch penalty parameter that steepens as health decays, and the
//! penalties charged against the liquidation-margin-requirement decrease.

use crate::types::Quote;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Dutch auction penalty curve: `d_min + (1 - health) * d_slope`, capped at 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DutchConfig {
    pub d_min: Decimal,
    pub d_slope: Decimal,
}

/// `margin_balance / lmr`, capped at 1. A non-positive requirement means there is
/// nothing left to margin, which reads as full health.
pub fn health_ratio(margin_balance: Quote, lmr: Quote) -> Decimal {
    if !lmr.is_positive() {
        return Decimal::ONE;
    }
    let ratio = margin_balance.value() / lmr.value();
    ratio.min(Decimal::ONE)
}

/// Dynamic dutch penalty parameter. Worsening health raises the penalty, capped
/// at taking the whole requirement decrease.
pub fn dutch_penalty_parameter(health: Decimal, config: &DutchConfig) -> Decimal {
    let parameter = config.d_min + (Decimal::ONE - health) * config.d_slope;
    parameter.min(Decimal::ONE)
}

/// Ranked-bid penalty: the liquidator's reward parameter applied to the
/// requirement decrease. Negative decreases are the caller's problem to reject
/// before charging anything.
pub fn requirement_decrease(lmr_before: Quote, lmr_after: Quote) -> Quote {
    lmr_before.sub(lmr_after)
}

pub fn liquidation_penalty(reward_parameter: Decimal, lmr_decrease: Quote) -> Quote {
    lmr_decrease.mul(reward_parameter)
}

/// Penalty for force-closing unfilled orders, proportional to the LM delta
/// improvement the close produced.
pub fn unfilled_order_penalty(parameter: Decimal, lm_delta_change: Quote) -> Quote {
    lm_delta_change.mul(parameter)
}

/// A counterparty's share of an insolvency shortfall, proportional to its
/// unrealized loss. This is the bankruptcy-price adjustment in quote terms.
pub fn bankruptcy_shortfall_share(
    unrealized_loss: Quote,
    total_unrealized_loss: Quote,
    shortfall: Quote,
) -> Quote {
    if !total_unrealized_loss.is_positive() {
        return Quote::zero();
    }
    shortfall.mul(unrealized_loss.value() / total_unrealized_loss.value())
}
