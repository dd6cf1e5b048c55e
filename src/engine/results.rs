// 8.0.2: result types and errors for engine operations. every precondition,
// structural, cross-pool and invariant violation surfaces here as a typed variant
// carrying the triggering ids; nothing is retried at this layer.

use crate::adl::BackstopPath;
use crate::bubble::BubbleError;
use crate::collateral::CollateralError;
use crate::market::MarketError;
use crate::pool::PoolError;
use crate::queue::QueueError;
use crate::types::{AccountId, Address, BidId, HookId, MarketId, PoolId, Quote, Token};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct BidSubmission {
    pub bid_id: BidId,
    pub queue_id: u64,
}

/// Outcome of executing the top-ranked bid. The bid is consumed either way:
/// dequeue is unconditional, a failed attempt only reports why.
#[derive(Debug, Clone)]
pub struct TopRankedBidOutcome {
    pub bid_id: BidId,
    pub liquidator: AccountId,
    pub executed: bool,
    pub penalty: Quote,
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DutchLiquidationOutcome {
    pub health: Decimal,
    pub penalty_parameter: Decimal,
    pub penalty: Quote,
    pub lm_delta_change: Quote,
}

#[derive(Debug, Clone)]
pub struct BackstopLiquidationOutcome {
    pub path: BackstopPath,
    pub insurance_contribution: Quote,
    pub penalty: Quote,
}

#[derive(Debug, Clone)]
pub struct UnfilledCloseOutcome {
    pub quote_token: Token,
    pub markets: Vec<MarketId>,
    pub lm_delta_change: Quote,
    pub penalty: Quote,
}

#[derive(Debug, Clone)]
pub struct AutoExchangeOutcome {
    pub covering_amount: Quote,
    pub auto_exchanged_amount: Quote,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    // -- existence / configuration -----------------------------------------
    #[error("Account {0:?} not found")]
    AccountNotFound(AccountId),

    #[error("Account {0:?} already exists")]
    AccountAlreadyExists(AccountId),

    #[error("Collateral pool {0:?} not found")]
    PoolNotFound(PoolId),

    #[error("Collateral pool {0:?} already exists")]
    PoolAlreadyExists(PoolId),

    #[error("Market {0:?} not found")]
    MarketNotFound(MarketId),

    #[error("Market {0:?} already registered")]
    MarketAlreadyRegistered(MarketId),

    #[error("Token {token} is not configured in pool {pool:?}")]
    UnknownCollateralToken { pool: PoolId, token: Token },

    #[error("Address {address} lacks permission on account {account:?}")]
    Unauthorized { account: AccountId, address: Address },

    #[error("Address {address} is not the owner of pool {pool:?}")]
    PoolOwnerOnly { pool: PoolId, address: Address },

    #[error("Collateral pool mismatch: expected {expected:?}, found {found:?}")]
    CollateralPoolMismatch { expected: PoolId, found: PoolId },

    // -- margin aggregation -------------------------------------------------
    #[error("Unsupported account exposure for account {account:?}")]
    UnsupportedAccountExposure { account: AccountId },

    // -- liquidation state machine ------------------------------------------
    #[error("Account {account:?} is not between MMR and LM in {token}")]
    AccountNotBetweenMmrAndLm { account: AccountId, token: Token },

    #[error("Account {account:?} is not between ADL and MMR in {token}")]
    AccountNotBetweenAdlAndMmr { account: AccountId, token: Token },

    #[error("Account {account:?} is not below MMR in {token}")]
    AccountNotBelowMmr { account: AccountId, token: Token },

    #[error("Account {account:?} is not below ADL in {token}")]
    AccountNotBelowAdl { account: AccountId, token: Token },

    #[error("Account {account:?} has unfilled orders in market {market:?}")]
    AccountHasUnfilledOrders {
        account: AccountId,
        market: MarketId,
    },

    #[error("Account {account:?} is above the dutch threshold in {token} and its bid queue is not empty")]
    AccountIsAboveDutchAndLiquidationBidQueueIsNotEmpty { account: AccountId, token: Token },

    // -- bid queue ----------------------------------------------------------
    #[error("Liquidation bid queue {queue_id} for account {account:?} in {token} has expired")]
    LiquidationBidPriorityQueueExpired {
        account: AccountId,
        token: Token,
        queue_id: u64,
    },

    #[error("No pending liquidation bids for account {account:?} in {token}")]
    LiquidationBidQueueEmpty { account: AccountId, token: Token },

    // -- structural / input -------------------------------------------------
    #[error("Order count {count} outside the allowed range (max {max})")]
    OrderCountOverflow { count: usize, max: usize },

    #[error("Market {market:?} settles in {found}, bid quotes {expected}")]
    QuoteTokenMismatch {
        market: MarketId,
        expected: Token,
        found: Token,
    },

    #[error("Liquidator reward parameter {value} outside [0, 1]")]
    InvalidRewardParameter { value: Decimal },

    #[error("Invalid liquidation hook {hook:?}")]
    InvalidLiquidationHook { hook: HookId },

    #[error("Deposit/withdrawal amount {amount} must be positive")]
    InvalidAmount { amount: Quote },

    // -- invariant fences ---------------------------------------------------
    #[error("Liquidation worsened LM delta for account {account:?} in {token}: {before} -> {after}")]
    LiquidationCausedNegativeLmDeltaChange {
        account: AccountId,
        token: Token,
        before: Quote,
        after: Quote,
    },

    #[error("Liquidator account {account:?} is below its initial margin requirement")]
    LiquidatorBelowInitialMargin { account: AccountId },

    // -- funds --------------------------------------------------------------
    #[error("Withdrawal of {requested} {token} from account {account:?} exceeds withdrawable {available}")]
    InsufficientWithdrawableCollateral {
        account: AccountId,
        token: Token,
        requested: Quote,
        available: Quote,
    },

    // -- auto-exchange ------------------------------------------------------
    #[error("Tokens {covering} and {auto_exchanged} are not in the same bubble")]
    TokensNotInSameBubble {
        covering: Token,
        auto_exchanged: Token,
    },

    #[error("Account {account:?} is not eligible for auto-exchange in {token}")]
    AccountNotEligibleForAutoExchange { account: AccountId, token: Token },

    // -- wrapped component errors -------------------------------------------
    #[error("Collateral error: {0}")]
    Collateral(#[from] CollateralError),

    #[error("Bubble error: {0}")]
    Bubble(#[from] BubbleError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
