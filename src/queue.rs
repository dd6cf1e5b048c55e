//! Ranked liquidation bid queues.
//!
//! Bids against an undercollateralized account are collected per quote token in a
//! generation-scoped priority queue. A queue lives for a bounded window and holds a
//! bounded number of bids; once its end timestamp passes it is immutable and a new
//! generation is opened lazily by the next submission.
//!
//! Ranking policy: the bid committing to the smallest liquidator reward parameter
//! wins (cheapest liquidation for the liquidatee); submission order breaks ties.

use crate::types::{AccountId, BidId, HookId, MarketId, Timestamp, Token};
use priority_queue::PriorityQueue;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Market-specific encoded order inputs, opaque to the clearing core. The market
/// that executes the order is the only component that interprets the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInputs(pub Vec<u8>);

impl OrderInputs {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct LiquidationBid {
    pub liquidator: AccountId,
    /// Orders to execute, in submission order. Every market must settle in the
    /// bid's quote token.
    pub orders: Vec<(MarketId, OrderInputs)>,
    pub quote_token: Token,
    pub hook: Option<HookId>,
    /// Fraction of the liquidation-margin-requirement decrease charged as penalty.
    pub reward_parameter: Decimal,
    /// Keeper to reward for triggering execution, if any.
    pub keeper: Option<AccountId>,
}

/// Priority of a bid inside its queue. Greater rank pops first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidRank {
    reward_parameter: Decimal,
    sequence: u64,
}

impl BidRank {
    pub fn new(reward_parameter: Decimal, sequence: u64) -> Self {
        Self {
            reward_parameter,
            sequence,
        }
    }
}

impl PartialOrd for BidRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BidRank {
    fn cmp(&self, other: &Self) -> Ordering {
        // lower reward parameter ranks first, then earlier submission
        other
            .reward_parameter
            .cmp(&self.reward_parameter)
            .then(other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Liquidation bid priority queue overflow: {len} bids at capacity {max}")]
    LiquidationBidPriorityQueueOverflow { len: usize, max: usize },
}

/// One generation of the bid queue for an (account, quote token) pair.
#[derive(Debug, Clone)]
pub struct BidQueue {
    pub id: u64,
    pub end_timestamp: Timestamp,
    ranks: PriorityQueue<BidId, BidRank>,
    bids: HashMap<BidId, LiquidationBid>,
}

impl BidQueue {
    pub fn new(id: u64, end_timestamp: Timestamp) -> Self {
        Self {
            id,
            end_timestamp,
            ranks: PriorityQueue::new(),
            bids: HashMap::new(),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.end_timestamp
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn push(
        &mut self,
        bid_id: BidId,
        bid: LiquidationBid,
        rank: BidRank,
        max_bids: usize,
    ) -> Result<(), QueueError> {
        if self.ranks.len() >= max_bids {
            return Err(QueueError::LiquidationBidPriorityQueueOverflow {
                len: self.ranks.len(),
                max: max_bids,
            });
        }
        let _ = self.ranks.push(bid_id, rank);
        self.bids.insert(bid_id, bid);
        Ok(())
    }

    /// Remove and return the top-ranked bid.
    pub fn pop(&mut self) -> Option<(BidId, LiquidationBid)> {
        let (bid_id, _) = self.ranks.pop()?;
        let bid = self.bids.remove(&bid_id)?;
        Some((bid_id, bid))
    }

    pub fn peek(&self) -> Option<(BidId, &LiquidationBid)> {
        let (bid_id, _) = self.ranks.peek()?;
        let bid = self.bids.get(bid_id)?;
        Some((*bid_id, bid))
    }

    /// Remove a specific bid, e.g. when a post-enqueue check rejects it.
    pub fn remove(&mut self, bid_id: BidId) -> Option<LiquidationBid> {
        let _ = self.ranks.remove(&bid_id);
        self.bids.remove(&bid_id)
    }
}

/// Queue holder for one (account, quote token) pair across generations. Only the
/// current generation is retained; expired queues are unreachable by construction.
#[derive(Debug, Clone, Default)]
pub struct QueueSlot {
    pub latest_id: u64,
    pub current: Option<BidQueue>,
}

impl QueueSlot {
    /// The live queue, opening a new generation when none exists or the current
    /// one has expired.
    pub fn ensure_open(&mut self, now: Timestamp, duration_ms: i64) -> &mut BidQueue {
        let needs_new = match &self.current {
            Some(queue) => queue.is_expired(now),
            None => true,
        };
        if needs_new {
            self.latest_id += 1;
            self.current = Some(BidQueue::new(
                self.latest_id,
                Timestamp::from_millis(now.as_millis() + duration_ms),
            ));
        }
        self.current.as_mut().expect("queue just ensured")
    }

    pub fn live_queue(&self, now: Timestamp) -> Option<&BidQueue> {
        self.current.as_ref().filter(|q| !q.is_expired(now))
    }

    /// Whether a non-empty, unexpired queue is pending execution.
    pub fn has_live_bids(&self, now: Timestamp) -> bool {
        self.live_queue(now).map(|q| !q.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bid(liquidator: u64, reward: Decimal) -> LiquidationBid {
        LiquidationBid {
            liquidator: AccountId(liquidator),
            orders: vec![(MarketId(1), OrderInputs::new(b"0.5".to_vec()))],
            quote_token: Token::new("USDC"),
            hook: None,
            reward_parameter: reward,
            keeper: None,
        }
    }

    #[test]
    fn cheapest_reward_ranks_first() {
        let mut queue = BidQueue::new(1, Timestamp::from_millis(10_000));

        queue
            .push(BidId(1), bid(10, dec!(0.3)), BidRank::new(dec!(0.3), 1), 10)
            .unwrap();
        queue
            .push(BidId(2), bid(11, dec!(0.1)), BidRank::new(dec!(0.1), 2), 10)
            .unwrap();
        queue
            .push(BidId(3), bid(12, dec!(0.2)), BidRank::new(dec!(0.2), 3), 10)
            .unwrap();

        let (first, _) = queue.pop().unwrap();
        let (second, _) = queue.pop().unwrap();
        let (third, _) = queue.pop().unwrap();
        assert_eq!(first, BidId(2));
        assert_eq!(second, BidId(3));
        assert_eq!(third, BidId(1));
    }

    #[test]
    fn submission_order_breaks_ties() {
        let mut queue = BidQueue::new(1, Timestamp::from_millis(10_000));

        queue
            .push(BidId(7), bid(10, dec!(0.2)), BidRank::new(dec!(0.2), 7), 10)
            .unwrap();
        queue
            .push(BidId(8), bid(11, dec!(0.2)), BidRank::new(dec!(0.2), 8), 10)
            .unwrap();

        let (first, _) = queue.pop().unwrap();
        assert_eq!(first, BidId(7));
    }

    #[test]
    fn overflow_at_capacity() {
        let mut queue = BidQueue::new(1, Timestamp::from_millis(10_000));
        queue
            .push(BidId(1), bid(10, dec!(0.2)), BidRank::new(dec!(0.2), 1), 1)
            .unwrap();

        let err = queue.push(BidId(2), bid(11, dec!(0.1)), BidRank::new(dec!(0.1), 2), 1);
        assert!(matches!(
            err,
            Err(QueueError::LiquidationBidPriorityQueueOverflow { .. })
        ));
    }

    #[test]
    fn slot_opens_generations_lazily() {
        let mut slot = QueueSlot::default();

        let q = slot.ensure_open(Timestamp::from_millis(0), 5_000);
        assert_eq!(q.id, 1);
        assert_eq!(q.end_timestamp, Timestamp::from_millis(5_000));

        // still live: same generation
        let q = slot.ensure_open(Timestamp::from_millis(4_000), 5_000);
        assert_eq!(q.id, 1);

        // past the end timestamp: new generation
        let q = slot.ensure_open(Timestamp::from_millis(5_001), 5_000);
        assert_eq!(q.id, 2);
        assert_eq!(q.end_timestamp, Timestamp::from_millis(10_001));
    }

    #[test]
    fn expired_queue_is_not_live() {
        let mut slot = QueueSlot::default();
        let queue = slot.ensure_open(Timestamp::from_millis(0), 5_000);
        queue
            .push(BidId(1), bid(10, dec!(0.2)), BidRank::new(dec!(0.2), 1), 10)
            .unwrap();

        assert!(slot.has_live_bids(Timestamp::from_millis(5_000)));
        assert!(!slot.has_live_bids(Timestamp::from_millis(5_001)));
        assert!(slot.live_queue(Timestamp::from_millis(5_001)).is_none());
    }
}
