//! Liquidation penalty distribution.
//!
//! A penalty is split four ways: insurance fund, backstop LP, keeper, liquidator.
//! The split conserves the penalty exactly; the liquidator takes whatever the
//! fixed-fee recipients leave behind. The backstop LP's cut is withheld entirely
//! when its own free collateral sits below the configured viability floor.

use crate::types::{AccountId, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LiquidationFeeConfig {
    /// Fraction of the penalty routed to the insurance fund, and separately to
    /// the backstop LP when it is viable.
    pub liquidation_fee: Decimal,
    /// Fraction routed to the keeper that triggered execution, when one exists.
    pub bid_keeper_fee: Decimal,
    /// Fraction of the LM delta improvement charged when unfilled orders are
    /// force-closed.
    pub unfilled_penalty_parameter: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyDistribution {
    pub insurance_fund: Quote,
    pub backstop_lp: Quote,
    pub keeper: Quote,
    pub liquidator: Quote,
}

impl PenaltyDistribution {
    pub fn total(&self) -> Quote {
        self.insurance_fund
            .add(self.backstop_lp)
            .add(self.keeper)
            .add(self.liquidator)
    }
}

pub fn split_liquidation_penalty(
    penalty: Quote,
    fees: &LiquidationFeeConfig,
    keeper: Option<AccountId>,
    backstop_free_collateral: Quote,
    backstop_min_free_collateral: Quote,
) -> PenaltyDistribution {
    let insurance_fund = penalty.mul(fees.liquidation_fee);
    let backstop_lp = if backstop_free_collateral > backstop_min_free_collateral {
        penalty.mul(fees.liquidation_fee)
    } else {
        Quote::zero()
    };
    let keeper_share = if keeper.is_some() {
        penalty.mul(fees.bid_keeper_fee)
    } else {
        Quote::zero()
    };
    // remainder: exact conservation, no rounding leakage
    let liquidator = penalty.sub(insurance_fund).sub(backstop_lp).sub(keeper_share);

    PenaltyDistribution {
        insurance_fund,
        backstop_lp,
        keeper: keeper_share,
        liquidator,
    }
}
