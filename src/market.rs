//! Market manager interface.
//!
//! Markets are external collaborators: the clearing core never prices or matches.
//! Each market is plugged in behind the `MarketManager` trait and registered under
//! its id with the risk parameter and collateral pool it belongs to. Every call
//! across this boundary is treated as fallible; the engine validates existence
//! before use and never assumes a market can be reached.

use crate::exposure::ExposurePair;
use crate::queue::OrderInputs;
use crate::types::{AccountId, MarketId, PoolId, Quote, Token};
use rust_decimal::Decimal;
use std::fmt;

/// Parameters for an auto-deleveraging pass over one account in one market.
/// `real_balance_and_if` is the account's raw quote balance plus the insurance
/// contribution backing the unwind. When the aggregate unrealized loss exceeds
/// it, the market must unwind at a bankruptcy price that shares the gap across
/// counterparties in proportion to unrealized loss.
#[derive(Debug, Clone, Copy)]
pub struct AdlOrder {
    pub adl_negative_upnl: bool,
    pub adl_positive_upnl: bool,
    pub total_unrealized_loss_quote: Quote,
    pub real_balance_and_if: Quote,
}

impl AdlOrder {
    /// Unwind everything at market price (no shortfall to share).
    pub fn at_market_price() -> Self {
        Self {
            adl_negative_upnl: true,
            adl_positive_upnl: true,
            total_unrealized_loss_quote: Quote::zero(),
            real_balance_and_if: Quote::zero(),
        }
    }
}

/// Capability surface of one market, dispatched dynamically via the registry.
pub trait MarketManager: fmt::Debug {
    fn id(&self) -> MarketId;

    /// Settlement token for the market. Bids and penalties are denominated here.
    fn quote_token(&self) -> Token;

    /// Filled and unfilled exposures for an account. Taker positions report an
    /// equal lower/upper pair; maker positions report the two unfilled-order
    /// scenarios.
    fn account_taker_and_maker_exposures(&self, account: AccountId) -> Vec<ExposurePair>;

    /// Static validation of encoded order inputs, before anything executes.
    fn validate_liquidation_order(
        &self,
        account: AccountId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketError>;

    /// Execute a liquidation order moving exposure from `account` to
    /// `liquidator`. Returns the realized cashflow to credit (or debit) against
    /// the liquidatee's quote-token balance.
    fn execute_liquidation_order(
        &mut self,
        account: AccountId,
        liquidator: AccountId,
        inputs: &OrderInputs,
    ) -> Result<Quote, MarketError>;

    /// Force-unwind positions matching the order's uPnL filter. Returns realized
    /// cashflow for the liquidatee's quote-token balance.
    fn execute_adl_order(&mut self, account: AccountId, order: &AdlOrder)
        -> Result<Quote, MarketError>;

    fn has_unfilled_orders(&self, account: AccountId) -> bool;

    fn close_all_unfilled_orders(&mut self, account: AccountId) -> Result<(), MarketError>;

    /// Whether the account still carries filled exposure on either side. Drives
    /// the backstop residual sweep and active-market-set pruning.
    fn has_open_filled_exposure(&self, account: AccountId) -> bool;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketError {
    #[error("Invalid liquidation order inputs for account {account:?} in market {market:?}: {reason}")]
    InvalidOrderInputs {
        market: MarketId,
        account: AccountId,
        reason: String,
    },

    #[error("Liquidation order execution failed for account {account:?} in market {market:?}: {reason}")]
    ExecutionFailed {
        market: MarketId,
        account: AccountId,
        reason: String,
    },

    #[error("Account {account:?} has no exposure in market {market:?}")]
    NoExposure {
        market: MarketId,
        account: AccountId,
    },
}

/// Registry entry: the manager plus the clearing-side risk metadata attached at
/// registration time.
#[derive(Debug)]
pub struct RegisteredMarket {
    pub manager: Box<dyn MarketManager>,
    /// Scales |annualized notional| into the liquidation margin requirement.
    pub risk_parameter: Decimal,
    pub pool: PoolId,
}

impl RegisteredMarket {
    pub fn new(manager: Box<dyn MarketManager>, risk_parameter: Decimal, pool: PoolId) -> Self {
        Self {
            manager,
            risk_parameter,
            pool,
        }
    }
}
