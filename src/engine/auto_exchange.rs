//! Auto-exchange engine entry points.
//!
//! Detection and settlement of deficits: eligibility is a pure read, execution
//! swaps the exchanger's deficit-token funds against the account's covering
//! collateral at bubble prices with the configured discount.

use super::core::Engine;
use super::results::{AutoExchangeOutcome, EngineError};
use crate::auto_exchange::{is_eligible, max_exchange_amounts, AutoExchangeAmounts};
use crate::events::{AutoExchangeEvent, EventPayload};
use crate::types::{AccountId, Quote, Token};
use rust_decimal::Decimal;

impl Engine {
    pub fn is_eligible_for_auto_exchange(
        &self,
        account_id: AccountId,
        quote_token: &Token,
    ) -> Result<bool, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        if !pool.bubbles.contains(quote_token) || quote_token.is_usd() {
            return Err(EngineError::UnknownCollateralToken {
                pool: pool.id,
                token: quote_token.clone(),
            });
        }

        // single-token IM delta for the quote token, in USD terms
        let info = self.node_margin_info(account, pool, quote_token, false)?;
        let quote_price = pool.bubbles.price_to_usd(quote_token)?;
        let single_im_delta_usd = info.deltas.initial.value() * quote_price;

        let (aggregate_negative_usd, total_account_value_usd) =
            self.account_value_usd(account_id)?;

        Ok(is_eligible(
            single_im_delta_usd,
            aggregate_negative_usd,
            total_account_value_usd,
            &pool.auto_exchange,
        ))
    }

    /// Maximum amounts exchangeable between two tokens of the same bubble:
    /// the deficit leg in `auto_exchanged_token`, the covering leg in
    /// `covering_token`.
    pub fn get_max_amount_to_exchange_quote(
        &self,
        account_id: AccountId,
        covering_token: &Token,
        auto_exchanged_token: &Token,
    ) -> Result<AutoExchangeAmounts, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        for token in [covering_token, auto_exchanged_token] {
            if !pool.bubbles.contains(token) || token.is_usd() {
                return Err(EngineError::UnknownCollateralToken {
                    pool: pool.id,
                    token: token.clone(),
                });
            }
        }
        if !pool.bubbles.same_bubble(covering_token, auto_exchanged_token)? {
            return Err(EngineError::TokensNotInSameBubble {
                covering: covering_token.clone(),
                auto_exchanged: auto_exchanged_token.clone(),
            });
        }

        let info = self.node_margin_info(account, pool, auto_exchanged_token, false)?;
        let covering_balance = self.get_collateral_balance(account_id, covering_token)?;
        let deficit_price = pool.bubbles.price_to_usd(auto_exchanged_token)?;
        let covering_price = pool.bubbles.price_to_usd(covering_token)?;

        Ok(max_exchange_amounts(
            info.deltas.initial,
            covering_balance,
            deficit_price,
            covering_price,
            &pool.auto_exchange,
        ))
    }

    /// Settle an auto-exchange: the exchanger delivers the deficit token, the
    /// account pays covering collateral. Hard-fails when the account is not
    /// eligible.
    pub fn execute_auto_exchange(
        &mut self,
        exchanger: AccountId,
        account_id: AccountId,
        covering_token: &Token,
        auto_exchanged_token: &Token,
    ) -> Result<AutoExchangeOutcome, EngineError> {
        if !self.is_eligible_for_auto_exchange(account_id, auto_exchanged_token)? {
            return Err(EngineError::AccountNotEligibleForAutoExchange {
                account: account_id,
                token: auto_exchanged_token.clone(),
            });
        }
        self.execute_auto_exchange_unchecked(
            exchanger,
            account_id,
            covering_token,
            auto_exchanged_token,
        )
    }

    /// Eligibility-free variant for the insolvent backstop path, which pulls
    /// pending auto-exchange funds regardless of the thresholds.
    pub(super) fn execute_auto_exchange_unchecked(
        &mut self,
        exchanger: AccountId,
        account_id: AccountId,
        covering_token: &Token,
        auto_exchanged_token: &Token,
    ) -> Result<AutoExchangeOutcome, EngineError> {
        let exchanger_pool = self.account(exchanger)?.pool;
        let account_pool = self.account(account_id)?.pool;
        if exchanger_pool != account_pool {
            return Err(EngineError::CollateralPoolMismatch {
                expected: account_pool,
                found: exchanger_pool,
            });
        }

        let amounts =
            self.get_max_amount_to_exchange_quote(account_id, covering_token, auto_exchanged_token)?;
        if !amounts.auto_exchanged_amount.is_positive() {
            return Ok(AutoExchangeOutcome {
                covering_amount: Quote::zero(),
                auto_exchanged_amount: Quote::zero(),
            });
        }

        // the exchanger tops up the deficit; it may not run a deficit itself
        self.transfer_collateral(
            exchanger,
            account_id,
            auto_exchanged_token,
            amounts.auto_exchanged_amount,
            false,
        )?;
        self.transfer_collateral(
            account_id,
            exchanger,
            covering_token,
            amounts.covering_amount,
            false,
        )?;

        self.emit_event(EventPayload::AutoExchange(AutoExchangeEvent {
            account_id,
            exchanger_id: exchanger,
            covering_token: covering_token.clone(),
            auto_exchanged_token: auto_exchanged_token.clone(),
            covering_amount: amounts.covering_amount,
            auto_exchanged_amount: amounts.auto_exchanged_amount,
        }));
        Ok(AutoExchangeOutcome {
            covering_amount: amounts.covering_amount,
            auto_exchanged_amount: amounts.auto_exchanged_amount,
        })
    }

    /// (aggregate negative balance, total positive value), both in USD, across
    /// the account's active collateral.
    fn account_value_usd(&self, account_id: AccountId) -> Result<(Decimal, Decimal), EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        let mut negative = Decimal::ZERO;
        let mut positive = Decimal::ZERO;
        let tokens: Vec<Token> = account.active_collateral().cloned().collect();
        for token in tokens {
            let balance = self
                .adapters
                .get(&token)
                .shares_to_assets(account.collateral_shares(&token));
            let usd = pool.bubbles.usd_value(&token, balance.value())?;
            if usd < Decimal::ZERO {
                negative += -usd;
            } else {
                positive += usd;
            }
        }
        Ok((negative, positive))
    }
}
