//! Auto-exchange math.
//!
//! An account that runs a negative balance in one quote token while holding value
//! in another token of the same bubble threatens insolvency without being
//! liquidatable. Auto-exchange lets an exchanger deliver the deficit token to the
//! account in return for the account's covering collateral at a configured
//! discount.
//!
//! The functions here are pure; the engine supplies balances and prices.

use crate::types::Quote;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoExchangeConfig {
    /// Absolute USD floor on a single quote token's negative IM delta.
    pub single_threshold_usd: Decimal,
    /// Absolute USD floor on the aggregate negative balance across quote tokens.
    pub total_threshold_usd: Decimal,
    /// Aggregate negative balance as a fraction of total account value.
    pub account_value_ratio: Decimal,
    /// Fraction of the IM shortfall exchangeable per call.
    pub exchange_ratio: Decimal,
    /// Price concession to the exchanger, in [0, 1).
    pub discount: Decimal,
}

/// Both legs of the maximum exchange: what the exchanger delivers in the deficit
/// token, and the covering collateral it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoExchangeAmounts {
    pub covering_amount: Quote,
    pub auto_exchanged_amount: Quote,
}

impl AutoExchangeAmounts {
    pub fn zero() -> Self {
        Self {
            covering_amount: Quote::zero(),
            auto_exchanged_amount: Quote::zero(),
        }
    }
}

/// Eligibility is the union of three triggers: a deep single-token IM breach, a
/// large aggregate deficit, or a deficit out of proportion to the account's size.
pub fn is_eligible(
    single_im_delta_usd: Decimal,
    aggregate_negative_usd: Decimal,
    total_account_value_usd: Decimal,
    config: &AutoExchangeConfig,
) -> bool {
    if single_im_delta_usd < Decimal::ZERO && -single_im_delta_usd > config.single_threshold_usd {
        return true;
    }
    if aggregate_negative_usd > config.total_threshold_usd {
        return true;
    }
    total_account_value_usd > Decimal::ZERO
        && aggregate_negative_usd > config.account_value_ratio * total_account_value_usd
}

/// Maximum exchangeable amounts. The base is `exchange_ratio * |IM delta|` in the
/// deficit token; the covering leg converts at bubble prices with the discount in
/// the exchanger's favour, capped by the covering balance (the deficit leg scales
/// back proportionally when the cap binds).
pub fn max_exchange_amounts(
    im_delta: Quote,
    covering_balance: Quote,
    deficit_price_usd: Decimal,
    covering_price_usd: Decimal,
    config: &AutoExchangeConfig,
) -> AutoExchangeAmounts {
    if !im_delta.is_negative() || !covering_balance.is_positive() {
        return AutoExchangeAmounts::zero();
    }

    let mut auto_exchanged = im_delta.abs().mul(config.exchange_ratio);
    let discount_factor = Decimal::ONE - config.discount;
    let mut covering = Quote::new(
        auto_exchanged.value() * deficit_price_usd / (covering_price_usd * discount_factor),
    );

    if covering > covering_balance {
        covering = covering_balance;
        auto_exchanged = Quote::new(
            covering.value() * covering_price_usd * discount_factor / deficit_price_usd,
        );
    }

    AutoExchangeAmounts {
        covering_amount: covering,
        auto_exchanged_amount: auto_exchanged,
    }
}
