//! Margin requirement aggregation.
//!
//! The algorithmic core: per-market exposures are scaled into a liquidation margin
//! requirement, the worse unfilled-order scenario is charged per maker position, and
//! child-bubble results are folded into their parent with sign-dependent haircuts.
//! Everything here is pure math over values the engine fetches; nothing mutates.
//!
//! Delta sign convention throughout: positive = healthy, non-positive = breach.

use crate::types::{Quote, Token};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One exposure scenario reported by a market: a position's annualized notional
/// and the unrealized loss it would carry in that scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketExposure {
    pub annualized_notional: Decimal,
    /// Non-negative; a profitable position reports zero.
    pub unrealized_loss: Quote,
}

impl MarketExposure {
    pub fn new(annualized_notional: Decimal, unrealized_loss: Quote) -> Self {
        Self {
            annualized_notional,
            unrealized_loss,
        }
    }
}

/// The (lower, upper) unfilled-order scenarios for one position. Taker positions
/// carry no unfilled orders and report `lower == upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposurePair {
    pub lower: MarketExposure,
    pub upper: MarketExposure,
}

impl ExposurePair {
    pub fn filled(exposure: MarketExposure) -> Self {
        Self {
            lower: exposure,
            upper: exposure,
        }
    }

    pub fn new(lower: MarketExposure, upper: MarketExposure) -> Self {
        Self { lower, upper }
    }
}

/// Raw margin charge for some set of positions: the liquidation margin
/// requirement plus the unrealized loss backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawRequirement {
    pub lmr: Quote,
    pub unrealized_loss: Quote,
}

impl RawRequirement {
    pub fn zero() -> Self {
        Self {
            lmr: Quote::zero(),
            unrealized_loss: Quote::zero(),
        }
    }

    pub fn add(&self, other: RawRequirement) -> Self {
        Self {
            lmr: self.lmr.add(other.lmr),
            unrealized_loss: self.unrealized_loss.add(other.unrealized_loss),
        }
    }
}

fn scenario_requirement(exposure: &MarketExposure, risk_parameter: Decimal) -> RawRequirement {
    RawRequirement {
        lmr: Quote::new(risk_parameter * exposure.annualized_notional.abs()),
        unrealized_loss: exposure.unrealized_loss,
    }
}

/// Charge the worse of the lower/upper unfilled scenarios for one position.
/// Equal-exposure pairs skip the comparison entirely.
pub fn worse_scenario(pair: &ExposurePair, risk_parameter: Decimal) -> RawRequirement {
    if pair.lower == pair.upper {
        return scenario_requirement(&pair.lower, risk_parameter);
    }
    let lower = scenario_requirement(&pair.lower, risk_parameter);
    let upper = scenario_requirement(&pair.upper, risk_parameter);
    let lower_combined = lower.lmr.add(lower.unrealized_loss);
    let upper_combined = upper.lmr.add(upper.unrealized_loss);
    if lower_combined > upper_combined {
        lower
    } else {
        upper
    }
}

/// Total raw charge for an account's positions in one market.
pub fn market_requirement(pairs: &[ExposurePair], risk_parameter: Decimal) -> RawRequirement {
    pairs
        .iter()
        .map(|pair| worse_scenario(pair, risk_parameter))
        .fold(RawRequirement::zero(), |acc, req| acc.add(req))
}

/// Pool-level multipliers scaling the liquidation requirement into the other
/// four thresholds. Ordering invariant: im > mmr > 1 > dutch > adl > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginMultipliers {
    pub im: Decimal,
    pub mmr: Decimal,
    pub dutch: Decimal,
    pub adl: Decimal,
}

impl MarginMultipliers {
    pub fn is_ordered(&self) -> bool {
        self.im > self.mmr
            && self.mmr > Decimal::ONE
            && Decimal::ONE > self.dutch
            && self.dutch > self.adl
            && self.adl > Decimal::ZERO
    }
}

/// The five requirement deltas for one token node, each `balance - requirement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginRequirementDeltas {
    pub initial: Quote,
    pub maintenance: Quote,
    pub liquidation: Quote,
    pub dutch: Quote,
    pub adl: Quote,
}

impl MarginRequirementDeltas {
    pub fn from_balance(margin_balance: Quote, lmr: Quote, m: &MarginMultipliers) -> Self {
        Self {
            initial: margin_balance.sub(lmr.mul(m.im)),
            maintenance: margin_balance.sub(lmr.mul(m.mmr)),
            liquidation: margin_balance.sub(lmr),
            dutch: margin_balance.sub(lmr.mul(m.dutch)),
            adl: margin_balance.sub(lmr.mul(m.adl)),
        }
    }
}

/// Computed margin view for an account at one bubble node. Not persisted;
/// recomputed from stored positions on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginInfo {
    pub token: Token,
    pub net_deposits: Quote,
    pub real_balance: Quote,
    /// Real balance net of the highest unrealized loss.
    pub margin_balance: Quote,
    pub deltas: MarginRequirementDeltas,
}

impl MarginInfo {
    /// Own-token contribution, before any child bubbles are folded in.
    pub fn from_own(
        token: Token,
        net_deposits: Quote,
        real_balance: Quote,
        raw: RawRequirement,
        multipliers: &MarginMultipliers,
    ) -> Self {
        let margin_balance = real_balance.sub(raw.unrealized_loss);
        Self {
            token,
            net_deposits,
            real_balance,
            margin_balance,
            deltas: MarginRequirementDeltas::from_balance(margin_balance, raw.lmr, multipliers),
        }
    }

    /// The liquidation margin requirement backing this node's deltas.
    pub fn liquidation_requirement(&self) -> Quote {
        self.margin_balance.sub(self.deltas.liquidation)
    }

    /// Fold a child node's result into this one. `convert` maps a child-token
    /// quantity into own-token terms (exchange price plus sign-dependent
    /// haircut); it is applied per field so gains are discounted while losses
    /// pass through at the full rate.
    pub fn absorb_child(&mut self, child: &MarginInfo, mut convert: impl FnMut(Quote) -> Quote) {
        self.net_deposits = self.net_deposits.add(convert(child.net_deposits));
        self.real_balance = self.real_balance.add(convert(child.real_balance));
        self.margin_balance = self.margin_balance.add(convert(child.margin_balance));
        self.deltas.initial = self.deltas.initial.add(convert(child.deltas.initial));
        self.deltas.maintenance = self.deltas.maintenance.add(convert(child.deltas.maintenance));
        self.deltas.liquidation = self.deltas.liquidation.add(convert(child.deltas.liquidation));
        self.deltas.dutch = self.deltas.dutch.add(convert(child.deltas.dutch));
        self.deltas.adl = self.deltas.adl.add(convert(child.deltas.adl));
    }
}
