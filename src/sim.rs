// 9.0 sim.rs: MOCKED. deterministic in-memory market used by the simulation binary
// and the test suites. real markets live outside the clearing core behind the
// MarketManager trait; this one just tracks notional exposures and unrealized pnl
// per account and interprets order inputs as a close ratio.

use crate::exposure::{ExposurePair, MarketExposure};
use crate::liquidation::bankruptcy_shortfall_share;
use crate::market::{AdlOrder, MarketError, MarketManager};
use crate::queue::OrderInputs;
use crate::types::{AccountId, MarketId, Quote, Token};
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPosition {
    /// Signed annualized notional of the filled position.
    pub filled_notional: Decimal,
    /// Scenario notional if all unfilled orders on the lower side filled.
    pub lower_notional: Decimal,
    /// Scenario notional if all unfilled orders on the upper side filled.
    pub upper_notional: Decimal,
    /// Signed unrealized pnl at the current mark.
    pub unrealized_pnl: Quote,
}

impl SimPosition {
    pub fn taker(notional: Decimal, unrealized_pnl: Quote) -> Self {
        Self {
            filled_notional: notional,
            lower_notional: notional,
            upper_notional: notional,
            unrealized_pnl,
        }
    }

    pub fn maker(
        filled_notional: Decimal,
        lower_notional: Decimal,
        upper_notional: Decimal,
        unrealized_pnl: Quote,
    ) -> Self {
        Self {
            filled_notional,
            lower_notional,
            upper_notional,
            unrealized_pnl,
        }
    }

    fn unrealized_loss(&self) -> Quote {
        if self.unrealized_pnl.is_negative() {
            self.unrealized_pnl.negate()
        } else {
            Quote::zero()
        }
    }

    fn has_unfilled(&self) -> bool {
        self.lower_notional != self.filled_notional || self.upper_notional != self.filled_notional
    }
}

/// Encode a close ratio as order inputs for `SimMarket`.
pub fn encode_ratio(ratio: Decimal) -> OrderInputs {
    OrderInputs::new(ratio.to_string().into_bytes())
}

#[derive(Debug)]
pub struct SimMarket {
    id: MarketId,
    quote: Token,
    positions: HashMap<AccountId, Vec<SimPosition>>,
}

impl SimMarket {
    pub fn new(id: MarketId, quote: Token) -> Self {
        Self {
            id,
            quote,
            positions: HashMap::new(),
        }
    }

    pub fn set_position(&mut self, account: AccountId, position: SimPosition) {
        self.positions.entry(account).or_default().push(position);
    }

    pub fn positions(&self, account: AccountId) -> &[SimPosition] {
        self.positions.get(&account).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Move the mark against/for an account: shift every position's pnl by `delta`.
    pub fn shift_pnl(&mut self, account: AccountId, delta: Quote) {
        if let Some(positions) = self.positions.get_mut(&account) {
            for position in positions.iter_mut() {
                position.unrealized_pnl = position.unrealized_pnl.add(delta);
            }
        }
    }

    fn decode_ratio(&self, account: AccountId, inputs: &OrderInputs) -> Result<Decimal, MarketError> {
        let text = std::str::from_utf8(inputs.as_bytes()).map_err(|_| {
            MarketError::InvalidOrderInputs {
                market: self.id,
                account,
                reason: "inputs are not utf-8".to_string(),
            }
        })?;
        let ratio = Decimal::from_str(text).map_err(|_| MarketError::InvalidOrderInputs {
            market: self.id,
            account,
            reason: format!("not a decimal ratio: {text}"),
        })?;
        if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
            return Err(MarketError::InvalidOrderInputs {
                market: self.id,
                account,
                reason: format!("ratio {ratio} outside (0, 1]"),
            });
        }
        Ok(ratio)
    }
}

impl MarketManager for SimMarket {
    fn id(&self) -> MarketId {
        self.id
    }

    fn quote_token(&self) -> Token {
        self.quote.clone()
    }

    fn account_taker_and_maker_exposures(&self, account: AccountId) -> Vec<ExposurePair> {
        self.positions(account)
            .iter()
            .map(|position| {
                let loss = position.unrealized_loss();
                ExposurePair::new(
                    MarketExposure::new(position.lower_notional, loss),
                    MarketExposure::new(position.upper_notional, loss),
                )
            })
            .collect()
    }

    fn validate_liquidation_order(
        &self,
        account: AccountId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketError> {
        self.decode_ratio(account, inputs)?;
        if self.positions(account).is_empty() {
            return Err(MarketError::NoExposure {
                market: self.id,
                account,
            });
        }
        Ok(())
    }

    fn execute_liquidation_order(
        &mut self,
        account: AccountId,
        liquidator: AccountId,
        inputs: &OrderInputs,
    ) -> Result<Quote, MarketError> {
        let ratio = self.decode_ratio(account, inputs)?;
        let positions = self.positions.get_mut(&account).ok_or(MarketError::NoExposure {
            market: self.id,
            account,
        })?;
        if positions.is_empty() {
            return Err(MarketError::NoExposure {
                market: self.id,
                account,
            });
        }

        let keep = Decimal::ONE - ratio;
        let mut cashflow = Quote::zero();
        let mut taken_notional = Decimal::ZERO;

        for position in positions.iter_mut() {
            taken_notional += position.filled_notional * ratio;
            // the carved-off pnl realizes against the liquidatee's balance;
            // the liquidator enters at mark with a flat position
            cashflow = cashflow.add(position.unrealized_pnl.mul(ratio));
            position.filled_notional *= keep;
            position.lower_notional *= keep;
            position.upper_notional *= keep;
            position.unrealized_pnl = position.unrealized_pnl.mul(keep);
        }
        positions.retain(|p| {
            p.filled_notional != Decimal::ZERO
                || p.lower_notional != Decimal::ZERO
                || p.upper_notional != Decimal::ZERO
        });

        if taken_notional != Decimal::ZERO {
            self.positions
                .entry(liquidator)
                .or_default()
                .push(SimPosition::taker(taken_notional, Quote::zero()));
        }
        Ok(cashflow)
    }

    fn execute_adl_order(
        &mut self,
        account: AccountId,
        order: &AdlOrder,
    ) -> Result<Quote, MarketError> {
        let positions = self.positions.get_mut(&account).ok_or(MarketError::NoExposure {
            market: self.id,
            account,
        })?;

        // shortfall = losses to unwind minus what actually backs them
        let shortfall = order
            .total_unrealized_loss_quote
            .sub(order.real_balance_and_if)
            .max(Quote::zero());

        let mut cashflow = Quote::zero();
        let mut kept = Vec::with_capacity(positions.len());
        for position in positions.drain(..) {
            let close = if position.unrealized_pnl.is_negative() {
                order.adl_negative_upnl
            } else {
                order.adl_positive_upnl
            };
            if !close {
                kept.push(position);
                continue;
            }
            // bankruptcy relief shifts part of the loss onto the counterparties
            let relief = bankruptcy_shortfall_share(
                position.unrealized_loss(),
                order.total_unrealized_loss_quote,
                shortfall,
            );
            cashflow = cashflow.add(position.unrealized_pnl).add(relief);
        }
        *positions = kept;
        Ok(cashflow)
    }

    fn has_unfilled_orders(&self, account: AccountId) -> bool {
        self.positions(account).iter().any(SimPosition::has_unfilled)
    }

    fn close_all_unfilled_orders(&mut self, account: AccountId) -> Result<(), MarketError> {
        if let Some(positions) = self.positions.get_mut(&account) {
            for position in positions.iter_mut() {
                position.lower_notional = position.filled_notional;
                position.upper_notional = position.filled_notional;
            }
            positions.retain(|p| p.filled_notional != Decimal::ZERO);
        }
        Ok(())
    }

    fn has_open_filled_exposure(&self, account: AccountId) -> bool {
        self.positions(account)
            .iter()
            .any(|p| p.filled_notional != Decimal::ZERO)
    }
}

/// Shared handle around a `SimMarket`. The engine owns one clone behind the
/// `MarketManager` trait, the scenario driver keeps another to move prices and
/// seed positions mid-run.
#[derive(Debug, Clone)]
pub struct SharedSimMarket {
    inner: Rc<RefCell<SimMarket>>,
}

impl SharedSimMarket {
    pub fn new(market: SimMarket) -> Self {
        Self {
            inner: Rc::new(RefCell::new(market)),
        }
    }

    pub fn handle(&self) -> Self {
        self.clone()
    }

    pub fn set_position(&self, account: AccountId, position: SimPosition) {
        self.inner.borrow_mut().set_position(account, position);
    }

    pub fn shift_pnl(&self, account: AccountId, delta: Quote) {
        self.inner.borrow_mut().shift_pnl(account, delta);
    }

    pub fn position_count(&self, account: AccountId) -> usize {
        self.inner.borrow().positions(account).len()
    }

    pub fn filled_notional(&self, account: AccountId) -> Decimal {
        self.inner
            .borrow()
            .positions(account)
            .iter()
            .map(|p| p.filled_notional)
            .sum()
    }
}

impl MarketManager for SharedSimMarket {
    fn id(&self) -> MarketId {
        self.inner.borrow().id()
    }

    fn quote_token(&self) -> Token {
        self.inner.borrow().quote_token()
    }

    fn account_taker_and_maker_exposures(&self, account: AccountId) -> Vec<ExposurePair> {
        self.inner.borrow().account_taker_and_maker_exposures(account)
    }

    fn validate_liquidation_order(
        &self,
        account: AccountId,
        inputs: &OrderInputs,
    ) -> Result<(), MarketError> {
        self.inner.borrow().validate_liquidation_order(account, inputs)
    }

    fn execute_liquidation_order(
        &mut self,
        account: AccountId,
        liquidator: AccountId,
        inputs: &OrderInputs,
    ) -> Result<Quote, MarketError> {
        self.inner
            .borrow_mut()
            .execute_liquidation_order(account, liquidator, inputs)
    }

    fn execute_adl_order(
        &mut self,
        account: AccountId,
        order: &AdlOrder,
    ) -> Result<Quote, MarketError> {
        self.inner.borrow_mut().execute_adl_order(account, order)
    }

    fn has_unfilled_orders(&self, account: AccountId) -> bool {
        self.inner.borrow().has_unfilled_orders(account)
    }

    fn close_all_unfilled_orders(&mut self, account: AccountId) -> Result<(), MarketError> {
        self.inner.borrow_mut().close_all_unfilled_orders(account)
    }

    fn has_open_filled_exposure(&self, account: AccountId) -> bool {
        self.inner.borrow().has_open_filled_exposure(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> SimMarket {
        SimMarket::new(MarketId(1), Token::new("USDC"))
    }

    #[test]
    fn exposures_report_loss_not_gain() {
        let mut m = market();
        m.set_position(AccountId(1), SimPosition::taker(dec!(1000), Quote::new(dec!(-40))));
        m.set_position(AccountId(1), SimPosition::taker(dec!(500), Quote::new(dec!(25))));

        let pairs = m.account_taker_and_maker_exposures(AccountId(1));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].lower.unrealized_loss.value(), dec!(40));
        assert_eq!(pairs[1].lower.unrealized_loss.value(), dec!(0));
    }

    #[test]
    fn ratio_decoding_bounds() {
        let m = market();
        assert!(m
            .validate_liquidation_order(AccountId(1), &encode_ratio(dec!(0.5)))
            .is_err()); // no exposure yet

        let mut m = market();
        m.set_position(AccountId(1), SimPosition::taker(dec!(1000), Quote::zero()));
        m.validate_liquidation_order(AccountId(1), &encode_ratio(dec!(0.5)))
            .unwrap();
        assert!(m
            .validate_liquidation_order(AccountId(1), &encode_ratio(dec!(1.5)))
            .is_err());
        assert!(m
            .validate_liquidation_order(AccountId(1), &OrderInputs::new(b"bogus".to_vec()))
            .is_err());
    }

    #[test]
    fn liquidation_carves_exposure_to_liquidator() {
        let mut m = market();
        m.set_position(AccountId(1), SimPosition::taker(dec!(1000), Quote::new(dec!(-100))));

        let cashflow = m
            .execute_liquidation_order(AccountId(1), AccountId(2), &encode_ratio(dec!(0.4)))
            .unwrap();

        // 40% of the -100 pnl realizes
        assert_eq!(cashflow.value(), dec!(-40.0));
        assert_eq!(m.positions(AccountId(1))[0].filled_notional, dec!(600.0));
        assert_eq!(m.positions(AccountId(2))[0].filled_notional, dec!(400.0));
        assert_eq!(m.positions(AccountId(2))[0].unrealized_pnl, Quote::zero());
    }

    #[test]
    fn full_close_removes_position() {
        let mut m = market();
        m.set_position(AccountId(1), SimPosition::taker(dec!(1000), Quote::new(dec!(-100))));

        m.execute_liquidation_order(AccountId(1), AccountId(2), &encode_ratio(dec!(1)))
            .unwrap();
        assert!(m.positions(AccountId(1)).is_empty());
        assert!(!m.has_open_filled_exposure(AccountId(1)));
    }

    #[test]
    fn adl_filters_by_pnl_sign() {
        let mut m = market();
        m.set_position(AccountId(1), SimPosition::taker(dec!(1000), Quote::new(dec!(-100))));
        m.set_position(AccountId(1), SimPosition::taker(dec!(500), Quote::new(dec!(60))));

        let order = crate::adl::positive_upnl_at_market();
        let cashflow = m.execute_adl_order(AccountId(1), &order).unwrap();

        assert_eq!(cashflow.value(), dec!(60));
        assert_eq!(m.positions(AccountId(1)).len(), 1);
        assert_eq!(m.positions(AccountId(1))[0].unrealized_pnl.value(), dec!(-100));
    }

    #[test]
    fn adl_at_bankruptcy_price_shares_shortfall() {
        let mut m = market();
        m.set_position(AccountId(1), SimPosition::taker(dec!(1000), Quote::new(dec!(-100))));

        // 100 of losses backed by only 70: counterparties eat the 30 gap
        let order =
            crate::adl::negative_upnl_at_bankruptcy(Quote::new(dec!(100)), Quote::new(dec!(70)));
        let cashflow = m.execute_adl_order(AccountId(1), &order).unwrap();

        assert_eq!(cashflow.value(), dec!(-70));
        assert!(m.positions(AccountId(1)).is_empty());
    }

    #[test]
    fn unfilled_orders_lifecycle() {
        let mut m = market();
        m.set_position(
            AccountId(1),
            SimPosition::maker(dec!(1000), dec!(800), dec!(1500), Quote::zero()),
        );

        assert!(m.has_unfilled_orders(AccountId(1)));
        m.close_all_unfilled_orders(AccountId(1)).unwrap();
        assert!(!m.has_unfilled_orders(AccountId(1)));
        assert_eq!(m.positions(AccountId(1))[0].upper_notional, dec!(1000));
    }
}
