// 7.0: collateral pool configuration. markets and accounts that share risk
// parameters are grouped into a pool: margin multipliers, bid queue limits,
// penalty fees, dutch curve, backstop/insurance wiring, auto-exchange thresholds
// and the bubble graph all live here. created once, mutated only by its owner.

use crate::auto_exchange::AutoExchangeConfig;
use crate::bubble::BubbleGraph;
use crate::distribution::LiquidationFeeConfig;
use crate::exposure::MarginMultipliers;
use crate::liquidation::DutchConfig;
use crate::types::{AccountId, Address, PoolId, Quote};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackstopLpConfig {
    pub account: AccountId,
    /// Free collateral below which the backstop LP stops earning penalty shares.
    pub min_free_collateral: Quote,
    /// Extra IM headroom the backstop LP must keep while absorbing residual
    /// exposure in the solvent backstop path.
    pub im_buffer: Quote,
    /// Penalty parameter applied to the requirement decrease in the solvent
    /// backstop path.
    pub penalty_parameter: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InsuranceFundConfig {
    pub account: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralPool {
    pub id: PoolId,
    pub owner: Address,
    pub multipliers: MarginMultipliers,
    pub queue_duration_ms: i64,
    pub max_bids_per_queue: usize,
    pub max_orders_per_bid: usize,
    pub fees: LiquidationFeeConfig,
    pub dutch: DutchConfig,
    pub backstop: BackstopLpConfig,
    pub insurance: InsuranceFundConfig,
    pub auto_exchange: AutoExchangeConfig,
    pub bubbles: BubbleGraph,
}

impl CollateralPool {
    /// Pool with production-shaped defaults. The insurance fund and backstop LP
    /// accounts must already exist; the bubble graph starts empty.
    pub fn new(
        id: PoolId,
        owner: Address,
        insurance_account: AccountId,
        backstop_account: AccountId,
    ) -> Self {
        Self {
            id,
            owner,
            multipliers: MarginMultipliers {
                im: dec!(2.0),
                mmr: dec!(1.5),
                dutch: dec!(0.8),
                adl: dec!(0.5),
            },
            queue_duration_ms: 5 * 60 * 1000,
            max_bids_per_queue: 10,
            max_orders_per_bid: 5,
            fees: LiquidationFeeConfig {
                liquidation_fee: dec!(0.2),
                bid_keeper_fee: dec!(0.05),
                unfilled_penalty_parameter: dec!(0.1),
            },
            dutch: DutchConfig {
                d_min: dec!(0.05),
                d_slope: dec!(0.5),
            },
            backstop: BackstopLpConfig {
                account: backstop_account,
                min_free_collateral: Quote::new(dec!(10_000)),
                im_buffer: Quote::new(dec!(5_000)),
                penalty_parameter: dec!(0.1),
            },
            insurance: InsuranceFundConfig {
                account: insurance_account,
            },
            auto_exchange: AutoExchangeConfig {
                single_threshold_usd: dec!(100),
                total_threshold_usd: dec!(500),
                account_value_ratio: dec!(0.25),
                exchange_ratio: dec!(0.5),
                discount: dec!(0.01),
            },
            bubbles: BubbleGraph::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if !self.multipliers.is_ordered() {
            return Err(PoolError::InvalidMarginMultipliers {
                pool: self.id,
                multipliers: self.multipliers,
            });
        }
        if self.queue_duration_ms <= 0 {
            return Err(PoolError::InvalidQueueDuration {
                pool: self.id,
                duration_ms: self.queue_duration_ms,
            });
        }
        if self.max_bids_per_queue == 0 || self.max_orders_per_bid == 0 {
            return Err(PoolError::InvalidQueueLimits { pool: self.id });
        }
        // two liquidation_fee legs (insurance + backstop) plus the keeper cut
        // must leave something for the liquidator
        let fixed = self.fees.liquidation_fee * dec!(2) + self.fees.bid_keeper_fee;
        if self.fees.liquidation_fee < Decimal::ZERO
            || self.fees.bid_keeper_fee < Decimal::ZERO
            || fixed >= Decimal::ONE
        {
            return Err(PoolError::InvalidLiquidationFees { pool: self.id });
        }
        if self.dutch.d_min < Decimal::ZERO || self.dutch.d_slope < Decimal::ZERO {
            return Err(PoolError::InvalidDutchConfig { pool: self.id });
        }
        if self.auto_exchange.discount < Decimal::ZERO
            || self.auto_exchange.discount >= Decimal::ONE
            || self.auto_exchange.exchange_ratio <= Decimal::ZERO
            || self.auto_exchange.exchange_ratio > Decimal::ONE
        {
            return Err(PoolError::InvalidAutoExchangeConfig { pool: self.id });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid margin multipliers for pool {pool:?}: {multipliers:?}")]
    InvalidMarginMultipliers {
        pool: PoolId,
        multipliers: MarginMultipliers,
    },

    #[error("Invalid bid queue duration {duration_ms}ms for pool {pool:?}")]
    InvalidQueueDuration { pool: PoolId, duration_ms: i64 },

    #[error("Bid queue limits for pool {pool:?} must be non-zero")]
    InvalidQueueLimits { pool: PoolId },

    #[error("Liquidation fees for pool {pool:?} must leave the liquidator a share")]
    InvalidLiquidationFees { pool: PoolId },

    #[error("Invalid dutch auction parameters for pool {pool:?}")]
    InvalidDutchConfig { pool: PoolId },

    #[error("Invalid auto-exchange parameters for pool {pool:?}")]
    InvalidAutoExchangeConfig { pool: PoolId },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> CollateralPool {
        CollateralPool::new(
            PoolId(1),
            Address::new("0xowner"),
            AccountId(100),
            AccountId(101),
        )
    }

    #[test]
    fn defaults_validate() {
        pool().validate().unwrap();
    }

    #[test]
    fn unordered_multipliers_rejected() {
        let mut p = pool();
        p.multipliers.mmr = dec!(3.0); // above im
        assert!(matches!(
            p.validate(),
            Err(PoolError::InvalidMarginMultipliers { .. })
        ));
    }

    #[test]
    fn fee_split_must_leave_liquidator_share() {
        let mut p = pool();
        p.fees.liquidation_fee = dec!(0.5); // 2 * 0.5 already consumes everything
        assert!(matches!(
            p.validate(),
            Err(PoolError::InvalidLiquidationFees { .. })
        ));
    }

    #[test]
    fn queue_limits_must_be_positive() {
        let mut p = pool();
        p.max_bids_per_queue = 0;
        assert!(matches!(p.validate(), Err(PoolError::InvalidQueueLimits { .. })));

        let mut p = pool();
        p.queue_duration_ms = 0;
        assert!(matches!(
            p.validate(),
            Err(PoolError::InvalidQueueDuration { .. })
        ));
    }

    #[test]
    fn auto_exchange_discount_bounds() {
        let mut p = pool();
        p.auto_exchange.discount = dec!(1);
        assert!(matches!(
            p.validate(),
            Err(PoolError::InvalidAutoExchangeConfig { .. })
        ));
    }
}
