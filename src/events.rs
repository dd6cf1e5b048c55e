// 11.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists all
// event types the clearing core emits.

use crate::adl::BackstopPath;
use crate::types::{AccountId, BidId, MarketId, PoolId, Quote, Timestamp, Token};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // configuration events
    PoolCreated(PoolCreatedEvent),
    AccountCreated(AccountCreatedEvent),

    // ledger events
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    WithdrawalRejected(WithdrawalRejectedEvent),

    // liquidation events
    LiquidationBidSubmitted(LiquidationBidSubmittedEvent),
    LiquidationBidExecuted(LiquidationBidExecutedEvent),
    LiquidationBidExecutionFailed(LiquidationBidExecutionFailedEvent),
    DutchLiquidation(DutchLiquidationEvent),
    BackstopLiquidation(BackstopLiquidationEvent),
    AdlExecuted(AdlExecutedEvent),
    UnfilledOrdersClosed(UnfilledOrdersClosedEvent),
    PenaltyDistributed(PenaltyDistributedEvent),

    // auto-exchange events
    AutoExchange(AutoExchangeEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCreatedEvent {
    pub pool_id: PoolId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCreatedEvent {
    pub account_id: AccountId,
    pub pool_id: PoolId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub account_id: AccountId,
    pub token: Token,
    pub amount: Quote,
    pub new_balance: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub account_id: AccountId,
    pub token: Token,
    pub amount: Quote,
    pub new_balance: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRejectedEvent {
    pub account_id: AccountId,
    pub token: Token,
    pub amount: Quote,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationBidSubmittedEvent {
    pub account_id: AccountId,
    pub liquidator_id: AccountId,
    pub quote_token: Token,
    pub bid_id: BidId,
    pub queue_id: u64,
    pub reward_parameter: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationBidExecutedEvent {
    pub account_id: AccountId,
    pub liquidator_id: AccountId,
    pub quote_token: Token,
    pub bid_id: BidId,
    pub penalty: Quote,
}

// a failed attempt still consumes the bid: dequeue is unconditional
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationBidExecutionFailedEvent {
    pub account_id: AccountId,
    pub liquidator_id: AccountId,
    pub quote_token: Token,
    pub bid_id: BidId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutchLiquidationEvent {
    pub account_id: AccountId,
    pub liquidator_id: AccountId,
    pub market_id: MarketId,
    pub quote_token: Token,
    pub health: Decimal,
    pub penalty_parameter: Decimal,
    pub penalty: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackstopLiquidationEvent {
    pub account_id: AccountId,
    pub quote_token: Token,
    pub path: BackstopPathTag,
    pub insurance_contribution: Quote,
    pub penalty: Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackstopPathTag {
    Solvent,
    InsolventInsuranceCovered,
    InsolventBankruptcy,
}

impl From<BackstopPath> for BackstopPathTag {
    fn from(path: BackstopPath) -> Self {
        match path {
            BackstopPath::Solvent => Self::Solvent,
            BackstopPath::InsolventInsuranceCovered => Self::InsolventInsuranceCovered,
            BackstopPath::InsolventBankruptcy => Self::InsolventBankruptcy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdlExecutedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub quote_token: Token,
    pub cashflow: Quote,
    pub at_bankruptcy_price: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnfilledOrdersClosedEvent {
    pub account_id: AccountId,
    pub quote_token: Token,
    pub markets: Vec<MarketId>,
    pub lm_delta_change: Quote,
    pub penalty: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyDistributedEvent {
    pub account_id: AccountId,
    pub quote_token: Token,
    pub penalty: Quote,
    pub insurance_fund: Quote,
    pub backstop_lp: Quote,
    pub keeper: Quote,
    pub liquidator: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoExchangeEvent {
    pub account_id: AccountId,
    pub exchanger_id: AccountId,
    pub covering_token: Token,
    pub auto_exchanged_token: Token,
    pub covering_amount: Quote,
    pub auto_exchanged_amount: Quote,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn events_serialize() {
        let event = Event::new(
            EventId(1),
            Timestamp::from_millis(1000),
            EventPayload::Deposit(DepositEvent {
                account_id: AccountId(1),
                token: Token::new("USDC"),
                amount: Quote::new(dec!(10000)),
                new_balance: Quote::new(dec!(10000)),
            }),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Deposit"));
        assert!(json.contains("USDC"));
    }

    #[test]
    fn backstop_path_tags() {
        assert_eq!(
            BackstopPathTag::from(BackstopPath::Solvent),
            BackstopPathTag::Solvent
        );
        assert_eq!(
            BackstopPathTag::from(BackstopPath::InsolventBankruptcy),
            BackstopPathTag::InsolventBankruptcy
        );
    }
}
