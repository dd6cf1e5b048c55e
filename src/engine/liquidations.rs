//! The liquidation state machine.
//!
//! Per account and quote token: healthy accounts are untouchable; between MMR and
//! LM liquidators stake ranked bids; below MMR the ranked auction executes (or a
//! dutch liquidation, once the bid queue is out of the way); below the ADL
//! threshold the backstop takes over, solvent and insolvent paths diverging on the
//! raw single-token margin balance.
//!
//! Every path recomputes the LM delta before and after and refuses to finalize an
//! execution that did not improve the account. That check is a correctness fence:
//! there is no retry, the caller must come back with different parameters.

use super::core::Engine;
use super::results::{
    BackstopLiquidationOutcome, BidSubmission, DutchLiquidationOutcome, EngineError,
    TopRankedBidOutcome, UnfilledCloseOutcome,
};
use crate::account::Permission;
use crate::adl::{self, BackstopPath};
use crate::distribution::{split_liquidation_penalty, PenaltyDistribution};
use crate::events::{
    AdlExecutedEvent, BackstopLiquidationEvent, DutchLiquidationEvent, EventPayload,
    LiquidationBidExecutedEvent, LiquidationBidExecutionFailedEvent, LiquidationBidSubmittedEvent,
    PenaltyDistributedEvent, UnfilledOrdersClosedEvent,
};
use crate::exposure::MarginInfo;
use crate::hooks::HookAck;
use crate::liquidation::{
    dutch_penalty_parameter, health_ratio, liquidation_penalty, requirement_decrease,
    unfilled_order_penalty,
};
use crate::market::AdlOrder;
use crate::pool::CollateralPool;
use crate::queue::{BidRank, LiquidationBid, OrderInputs};
use crate::types::{AccountId, Address, MarketId, Quote, Token};
use rust_decimal::Decimal;

impl Engine {
    // -- bid submission ------------------------------------------------------

    /// Stake a ranked liquidation bid against `liquidatee`. Only valid while the
    /// account sits between MMR and LM in the bid's quote token.
    pub fn submit_liquidation_bid(
        &mut self,
        caller: &Address,
        liquidatee: AccountId,
        bid: LiquidationBid,
    ) -> Result<BidSubmission, EngineError> {
        let pool_id = self.account(liquidatee)?.pool;
        let liquidator_account = self.account(bid.liquidator)?;
        if !liquidator_account.has_permission(caller, Permission::Admin) {
            return Err(EngineError::Unauthorized {
                account: bid.liquidator,
                address: caller.clone(),
            });
        }
        if liquidator_account.pool != pool_id {
            return Err(EngineError::CollateralPoolMismatch {
                expected: pool_id,
                found: liquidator_account.pool,
            });
        }

        let pool = self.pool(pool_id)?;
        let queue_duration = pool.queue_duration_ms;
        let max_bids = pool.max_bids_per_queue;
        let max_orders = pool.max_orders_per_bid;

        if bid.orders.is_empty() || bid.orders.len() > max_orders {
            return Err(EngineError::OrderCountOverflow {
                count: bid.orders.len(),
                max: max_orders,
            });
        }
        if bid.reward_parameter < Decimal::ZERO || bid.reward_parameter > Decimal::ONE {
            return Err(EngineError::InvalidRewardParameter {
                value: bid.reward_parameter,
            });
        }
        for (market_id, inputs) in &bid.orders {
            let registered = self.market(*market_id)?;
            if registered.pool != pool_id {
                return Err(EngineError::CollateralPoolMismatch {
                    expected: pool_id,
                    found: registered.pool,
                });
            }
            let market_quote = registered.manager.quote_token();
            if market_quote != bid.quote_token {
                return Err(EngineError::QuoteTokenMismatch {
                    market: *market_id,
                    expected: bid.quote_token.clone(),
                    found: market_quote,
                });
            }
            registered.manager.validate_liquidation_order(liquidatee, inputs)?;
        }
        if let Some(hook_id) = bid.hook {
            if !self.hooks.contains_key(&hook_id) {
                return Err(EngineError::InvalidLiquidationHook { hook: hook_id });
            }
        }

        let deltas = self.get_requirement_deltas_by_bubble(liquidatee, &bid.quote_token)?;
        if !(deltas.maintenance.is_negative() && deltas.liquidation.is_positive()) {
            return Err(EngineError::AccountNotBetweenMmrAndLm {
                account: liquidatee,
                token: bid.quote_token.clone(),
            });
        }

        let bid_id = self.allocate_bid_id();
        let now = self.current_time;
        let quote_token = bid.quote_token.clone();
        let liquidator = bid.liquidator;
        let reward_parameter = bid.reward_parameter;
        let queue_id = {
            let account = self.account_mut(liquidatee)?;
            let slot = account.bid_queue_slot_mut(&quote_token);
            let queue = slot.ensure_open(now, queue_duration);
            queue.push(
                bid_id,
                bid,
                BidRank::new(reward_parameter, bid_id.0),
                max_bids,
            )?;
            queue.id
        };

        // the liquidator must still clear its own IM with the bid staked
        let liquidator_deltas =
            self.get_requirement_deltas_by_bubble(liquidator, &quote_token)?;
        if liquidator_deltas.initial.is_negative() {
            let account = self.account_mut(liquidatee)?;
            if let Some(queue) = account
                .bid_queues
                .get_mut(&quote_token)
                .and_then(|slot| slot.current.as_mut())
            {
                queue.remove(bid_id);
            }
            return Err(EngineError::LiquidatorBelowInitialMargin { account: liquidator });
        }

        self.emit_event(EventPayload::LiquidationBidSubmitted(
            LiquidationBidSubmittedEvent {
                account_id: liquidatee,
                liquidator_id: liquidator,
                quote_token,
                bid_id,
                queue_id,
                reward_parameter,
            },
        ));
        Ok(BidSubmission { bid_id, queue_id })
    }

    // -- ranked execution ----------------------------------------------------

    /// Dequeue and execute the top-ranked bid. Dequeue is unconditional: a failed
    /// attempt consumes the bid, reports the failure in the outcome and leaves
    /// the queue ready for the next one.
    pub fn execute_top_ranked_liquidation_bid(
        &mut self,
        liquidatee: AccountId,
        quote_token: &Token,
    ) -> Result<TopRankedBidOutcome, EngineError> {
        let pool = self.pool(self.account(liquidatee)?.pool)?.clone();
        self.ensure_no_unfilled_orders(liquidatee, quote_token)?;

        let before = self.get_margin_info_by_bubble(liquidatee, quote_token)?;
        self.ensure_between_adl_and_mmr(liquidatee, quote_token, &before)?;

        let now = self.current_time;
        let (bid_id, bid) = {
            let account = self.account_mut(liquidatee)?;
            let slot = account
                .bid_queues
                .get_mut(quote_token)
                .ok_or_else(|| EngineError::LiquidationBidQueueEmpty {
                    account: liquidatee,
                    token: quote_token.clone(),
                })?;
            let queue = slot
                .current
                .as_mut()
                .ok_or_else(|| EngineError::LiquidationBidQueueEmpty {
                    account: liquidatee,
                    token: quote_token.clone(),
                })?;
            if queue.is_expired(now) {
                return Err(EngineError::LiquidationBidPriorityQueueExpired {
                    account: liquidatee,
                    token: quote_token.clone(),
                    queue_id: queue.id,
                });
            }
            queue
                .pop()
                .ok_or_else(|| EngineError::LiquidationBidQueueEmpty {
                    account: liquidatee,
                    token: quote_token.clone(),
                })?
        };

        // two-phase: the bid is already gone, the attempt may still fail
        match self.attempt_bid_execution(liquidatee, &bid, &pool, &before) {
            Ok(penalty) => {
                self.emit_event(EventPayload::LiquidationBidExecuted(
                    LiquidationBidExecutedEvent {
                        account_id: liquidatee,
                        liquidator_id: bid.liquidator,
                        quote_token: quote_token.clone(),
                        bid_id,
                        penalty,
                    },
                ));
                Ok(TopRankedBidOutcome {
                    bid_id,
                    liquidator: bid.liquidator,
                    executed: true,
                    penalty,
                    failure: None,
                })
            }
            Err(error) => {
                log::warn!(
                    "bid {:?} against account {:?} failed: {error}",
                    bid_id,
                    liquidatee
                );
                self.emit_event(EventPayload::LiquidationBidExecutionFailed(
                    LiquidationBidExecutionFailedEvent {
                        account_id: liquidatee,
                        liquidator_id: bid.liquidator,
                        quote_token: quote_token.clone(),
                        bid_id,
                        reason: error.to_string(),
                    },
                ));
                Ok(TopRankedBidOutcome {
                    bid_id,
                    liquidator: bid.liquidator,
                    executed: false,
                    penalty: Quote::zero(),
                    failure: Some(error.to_string()),
                })
            }
        }
    }

    fn attempt_bid_execution(
        &mut self,
        liquidatee: AccountId,
        bid: &LiquidationBid,
        pool: &CollateralPool,
        before: &MarginInfo,
    ) -> Result<Quote, EngineError> {
        if let Some(hook_id) = bid.hook {
            let hook = self
                .hooks
                .get_mut(&hook_id)
                .ok_or(EngineError::InvalidLiquidationHook { hook: hook_id })?;
            if hook.pre_liquidation_hook(liquidatee, bid) != HookAck::Acknowledged {
                return Err(EngineError::InvalidLiquidationHook { hook: hook_id });
            }
        }

        for (market_id, inputs) in &bid.orders {
            let cashflow = {
                let registered = self
                    .markets
                    .get_mut(market_id)
                    .ok_or(EngineError::MarketNotFound(*market_id))?;
                registered
                    .manager
                    .validate_liquidation_order(liquidatee, inputs)?;
                registered
                    .manager
                    .execute_liquidation_order(liquidatee, bid.liquidator, inputs)?
            };
            self.apply_cashflow(liquidatee, &bid.quote_token, cashflow)?;
            self.refresh_market_activity(liquidatee, *market_id)?;
            self.refresh_market_activity(bid.liquidator, *market_id)?;
        }

        if let Some(hook_id) = bid.hook {
            let hook = self
                .hooks
                .get_mut(&hook_id)
                .ok_or(EngineError::InvalidLiquidationHook { hook: hook_id })?;
            if hook.post_liquidation_hook(liquidatee, bid) != HookAck::Acknowledged {
                return Err(EngineError::InvalidLiquidationHook { hook: hook_id });
            }
        }

        let after = self.get_margin_info_by_bubble(liquidatee, &bid.quote_token)?;
        let decrease = requirement_decrease(
            before.liquidation_requirement(),
            after.liquidation_requirement(),
        );
        if after.deltas.liquidation < before.deltas.liquidation || !decrease.is_positive() {
            return Err(EngineError::LiquidationCausedNegativeLmDeltaChange {
                account: liquidatee,
                token: bid.quote_token.clone(),
                before: before.deltas.liquidation,
                after: after.deltas.liquidation,
            });
        }

        let penalty = liquidation_penalty(bid.reward_parameter, decrease);
        self.settle_penalty(
            liquidatee,
            &bid.quote_token,
            penalty,
            bid.keeper,
            bid.liquidator,
            pool,
        )?;
        Ok(penalty)
    }

    // -- dutch liquidation ---------------------------------------------------

    /// Single-order liquidation with a penalty parameter that steepens as the
    /// account's health decays. Blocked while a live bid queue still has claims
    /// and the account remains above the dutch threshold.
    pub fn execute_dutch_liquidation(
        &mut self,
        caller: &Address,
        liquidatee: AccountId,
        liquidator: AccountId,
        market_id: MarketId,
        inputs: &OrderInputs,
    ) -> Result<DutchLiquidationOutcome, EngineError> {
        let pool_id = self.account(liquidatee)?.pool;
        let liquidator_account = self.account(liquidator)?;
        if !liquidator_account.has_permission(caller, Permission::Admin) {
            return Err(EngineError::Unauthorized {
                account: liquidator,
                address: caller.clone(),
            });
        }
        if liquidator_account.pool != pool_id {
            return Err(EngineError::CollateralPoolMismatch {
                expected: pool_id,
                found: liquidator_account.pool,
            });
        }
        let registered = self.market(market_id)?;
        if registered.pool != pool_id {
            return Err(EngineError::CollateralPoolMismatch {
                expected: pool_id,
                found: registered.pool,
            });
        }
        let quote_token = registered.manager.quote_token();
        let pool = self.pool(pool_id)?.clone();

        self.ensure_no_unfilled_orders(liquidatee, &quote_token)?;

        let before = self.get_margin_info_by_bubble(liquidatee, &quote_token)?;
        self.ensure_between_adl_and_mmr(liquidatee, &quote_token, &before)?;

        // the ranked auction has priority while the account is above dutch
        if before.deltas.dutch.is_positive() {
            let has_live_bids = self
                .account(liquidatee)?
                .bid_queue_slot(&quote_token)
                .map(|slot| slot.has_live_bids(self.current_time))
                .unwrap_or(false);
            if has_live_bids {
                return Err(
                    EngineError::AccountIsAboveDutchAndLiquidationBidQueueIsNotEmpty {
                        account: liquidatee,
                        token: quote_token,
                    },
                );
            }
        }

        let health = health_ratio(before.margin_balance, before.liquidation_requirement());
        let penalty_parameter = dutch_penalty_parameter(health, &pool.dutch);

        let cashflow = {
            let registered = self
                .markets
                .get_mut(&market_id)
                .ok_or(EngineError::MarketNotFound(market_id))?;
            registered
                .manager
                .validate_liquidation_order(liquidatee, inputs)?;
            registered
                .manager
                .execute_liquidation_order(liquidatee, liquidator, inputs)?
        };
        self.apply_cashflow(liquidatee, &quote_token, cashflow)?;
        self.refresh_market_activity(liquidatee, market_id)?;
        self.refresh_market_activity(liquidator, market_id)?;

        let after = self.get_margin_info_by_bubble(liquidatee, &quote_token)?;
        let change = after.deltas.liquidation.sub(before.deltas.liquidation);
        let decrease = requirement_decrease(
            before.liquidation_requirement(),
            after.liquidation_requirement(),
        );
        if change.is_negative() || !decrease.is_positive() {
            return Err(EngineError::LiquidationCausedNegativeLmDeltaChange {
                account: liquidatee,
                token: quote_token,
                before: before.deltas.liquidation,
                after: after.deltas.liquidation,
            });
        }

        let penalty = liquidation_penalty(penalty_parameter, decrease);
        self.settle_penalty(liquidatee, &quote_token, penalty, None, liquidator, &pool)?;

        self.emit_event(EventPayload::DutchLiquidation(DutchLiquidationEvent {
            account_id: liquidatee,
            liquidator_id: liquidator,
            market_id,
            quote_token,
            health,
            penalty_parameter,
            penalty,
        }));
        Ok(DutchLiquidationOutcome {
            health,
            penalty_parameter,
            penalty,
            lm_delta_change: change,
        })
    }

    // -- backstop liquidation ------------------------------------------------

    /// Terminal tier: the backstop LP absorbs what it can, insurance underwrites
    /// the shortfall, and what neither covers is shared with counterparties at
    /// the bankruptcy price.
    pub fn execute_backstop_liquidation(
        &mut self,
        liquidatee: AccountId,
        quote_token: &Token,
        orders: &[(MarketId, OrderInputs)],
        keeper: Option<AccountId>,
    ) -> Result<BackstopLiquidationOutcome, EngineError> {
        let pool = self.pool(self.account(liquidatee)?.pool)?.clone();
        self.ensure_no_unfilled_orders(liquidatee, quote_token)?;

        let before = self.get_margin_info_by_bubble(liquidatee, quote_token)?;
        if before.deltas.adl.is_positive() {
            return Err(EngineError::AccountNotBelowAdl {
                account: liquidatee,
                token: quote_token.clone(),
            });
        }

        let raw = self.raw_margin_info(liquidatee, quote_token)?;
        let solvent = !raw.margin_balance.is_negative();

        let outcome = if solvent {
            self.backstop_solvent_path(liquidatee, quote_token, orders, keeper, &pool, &before)?
        } else {
            self.backstop_insolvent_path(liquidatee, quote_token, &pool, &before)?
        };

        self.emit_event(EventPayload::BackstopLiquidation(BackstopLiquidationEvent {
            account_id: liquidatee,
            quote_token: quote_token.clone(),
            path: outcome.path.into(),
            insurance_contribution: outcome.insurance_contribution,
            penalty: outcome.penalty,
        }));
        Ok(outcome)
    }

    fn backstop_solvent_path(
        &mut self,
        liquidatee: AccountId,
        quote_token: &Token,
        orders: &[(MarketId, OrderInputs)],
        keeper: Option<AccountId>,
        pool: &CollateralPool,
        before: &MarginInfo,
    ) -> Result<BackstopLiquidationOutcome, EngineError> {
        for (market_id, _) in orders {
            let registered = self.market(*market_id)?;
            if registered.pool != pool.id {
                return Err(EngineError::CollateralPoolMismatch {
                    expected: pool.id,
                    found: registered.pool,
                });
            }
            let market_quote = registered.manager.quote_token();
            if market_quote != *quote_token {
                return Err(EngineError::QuoteTokenMismatch {
                    market: *market_id,
                    expected: quote_token.clone(),
                    found: market_quote,
                });
            }
        }

        for (market_id, inputs) in orders {
            let cashflow = {
                let registered = self
                    .markets
                    .get_mut(market_id)
                    .ok_or(EngineError::MarketNotFound(*market_id))?;
                registered
                    .manager
                    .validate_liquidation_order(liquidatee, inputs)?;
                registered.manager.execute_liquidation_order(
                    liquidatee,
                    pool.backstop.account,
                    inputs,
                )?
            };
            self.apply_cashflow(liquidatee, quote_token, cashflow)?;
            self.refresh_market_activity(liquidatee, *market_id)?;
            self.refresh_market_activity(pool.backstop.account, *market_id)?;
        }

        // residual sweep: maker positions with filled exposure on either side are
        // unwound one market at a time while the backstop stays inside IM + buffer.
        // the active market set is re-queried after every step.
        'sweep: loop {
            let market_ids = self.account(liquidatee)?.markets_for(quote_token);
            let mut swept = false;
            for market_id in market_ids {
                let has_residual = self
                    .market(market_id)?
                    .manager
                    .has_open_filled_exposure(liquidatee);
                if !has_residual {
                    continue;
                }
                let backstop_deltas =
                    self.get_requirement_deltas_by_bubble(pool.backstop.account, quote_token)?;
                if !backstop_deltas
                    .initial
                    .sub(pool.backstop.im_buffer)
                    .is_positive()
                {
                    log::warn!("backstop LP at its IM buffer, residual sweep halted");
                    break 'sweep;
                }
                let cashflow = {
                    let registered = self
                        .markets
                        .get_mut(&market_id)
                        .ok_or(EngineError::MarketNotFound(market_id))?;
                    registered
                        .manager
                        .execute_adl_order(liquidatee, &AdlOrder::at_market_price())?
                };
                let still_exposed = self
                    .market(market_id)?
                    .manager
                    .has_open_filled_exposure(liquidatee);
                self.apply_cashflow(liquidatee, quote_token, cashflow)?;
                self.refresh_market_activity(liquidatee, market_id)?;
                self.emit_event(EventPayload::AdlExecuted(AdlExecutedEvent {
                    account_id: liquidatee,
                    market_id,
                    quote_token: quote_token.clone(),
                    cashflow,
                    at_bankruptcy_price: false,
                }));
                // progress means exposure actually moved; a no-op keeps the
                // sweep from spinning on an un-unwindable market
                swept = swept || !still_exposed || !cashflow.is_zero();
            }
            if !swept {
                break;
            }
        }

        let after = self.get_margin_info_by_bubble(liquidatee, quote_token)?;
        let change = after.deltas.liquidation.sub(before.deltas.liquidation);
        let decrease = requirement_decrease(
            before.liquidation_requirement(),
            after.liquidation_requirement(),
        );
        if change.is_negative() || !decrease.is_positive() {
            return Err(EngineError::LiquidationCausedNegativeLmDeltaChange {
                account: liquidatee,
                token: quote_token.clone(),
                before: before.deltas.liquidation,
                after: after.deltas.liquidation,
            });
        }

        let penalty = liquidation_penalty(pool.backstop.penalty_parameter, decrease);
        self.settle_penalty(
            liquidatee,
            quote_token,
            penalty,
            keeper,
            pool.backstop.account,
            pool,
        )?;

        Ok(BackstopLiquidationOutcome {
            path: BackstopPath::Solvent,
            insurance_contribution: Quote::zero(),
            penalty,
        })
    }

    fn backstop_insolvent_path(
        &mut self,
        liquidatee: AccountId,
        quote_token: &Token,
        pool: &CollateralPool,
        before: &MarginInfo,
    ) -> Result<BackstopLiquidationOutcome, EngineError> {
        // 1. realize gains first: unwind positive-uPnL positions at market price
        self.adl_each_market(liquidatee, quote_token, &adl::positive_upnl_at_market(), false)?;

        // 2. measure what is left to cover
        let margin_balance = self.raw_margin_info(liquidatee, quote_token)?.margin_balance;
        let shortfall = margin_balance.negate().max(Quote::zero());
        let insurance_balance = self
            .get_collateral_balance(pool.insurance.account, quote_token)?
            .max(Quote::zero());

        let (path, contribution) = if insurance_balance >= shortfall {
            // fully underwritten: credit the hole and unwind the rest at market
            self.transfer_collateral(
                pool.insurance.account,
                liquidatee,
                quote_token,
                shortfall,
                false,
            )?;
            self.adl_each_market(liquidatee, quote_token, &adl::negative_upnl_at_market(), false)?;
            (BackstopPath::InsolventInsuranceCovered, shortfall)
        } else {
            // partial cover: drain the fund, pull auto-exchange, then share the
            // remaining shortfall at the bankruptcy price
            self.transfer_collateral(
                pool.insurance.account,
                liquidatee,
                quote_token,
                insurance_balance,
                false,
            )?;
            self.pull_auto_exchange_funds(liquidatee, quote_token, pool)?;

            let mut total_unrealized_loss = Quote::zero();
            for market_id in self.account(liquidatee)?.markets_for(quote_token) {
                let registered = self.market(market_id)?;
                let pairs = registered
                    .manager
                    .account_taker_and_maker_exposures(liquidatee);
                total_unrealized_loss =
                    total_unrealized_loss.add(adl::total_unrealized_loss(&pairs));
            }
            let real_balance_and_if = self.get_collateral_balance(liquidatee, quote_token)?;
            let order =
                adl::negative_upnl_at_bankruptcy(total_unrealized_loss, real_balance_and_if);
            self.adl_each_market(liquidatee, quote_token, &order, true)?;
            (BackstopPath::InsolventBankruptcy, insurance_balance)
        };

        let after = self.get_margin_info_by_bubble(liquidatee, quote_token)?;
        let change = after.deltas.liquidation.sub(before.deltas.liquidation);
        if change.is_negative() {
            return Err(EngineError::LiquidationCausedNegativeLmDeltaChange {
                account: liquidatee,
                token: quote_token.clone(),
                before: before.deltas.liquidation,
                after: after.deltas.liquidation,
            });
        }

        Ok(BackstopLiquidationOutcome {
            path,
            insurance_contribution: contribution,
            penalty: Quote::zero(),
        })
    }

    fn adl_each_market(
        &mut self,
        account_id: AccountId,
        quote_token: &Token,
        order: &AdlOrder,
        at_bankruptcy_price: bool,
    ) -> Result<(), EngineError> {
        // re-query the active set after every execution
        loop {
            let market_ids = self.account(account_id)?.markets_for(quote_token);
            let mut executed = false;
            for market_id in market_ids {
                let has_exposure = self
                    .market(market_id)?
                    .manager
                    .has_open_filled_exposure(account_id);
                if !has_exposure {
                    continue;
                }
                let cashflow = {
                    let registered = self
                        .markets
                        .get_mut(&market_id)
                        .ok_or(EngineError::MarketNotFound(market_id))?;
                    registered.manager.execute_adl_order(account_id, order)?
                };
                let still_exposed = self
                    .market(market_id)?
                    .manager
                    .has_open_filled_exposure(account_id);
                self.apply_cashflow(account_id, quote_token, cashflow)?;
                self.refresh_market_activity(account_id, market_id)?;
                // only real progress re-arms the loop; positions that fail the
                // uPnL filter stay put and must not spin the sweep
                if !cashflow.is_zero() || !still_exposed {
                    self.emit_event(EventPayload::AdlExecuted(AdlExecutedEvent {
                        account_id,
                        market_id,
                        quote_token: quote_token.clone(),
                        cashflow,
                        at_bankruptcy_price,
                    }));
                    executed = true;
                }
            }
            if !executed {
                break;
            }
        }
        Ok(())
    }

    /// Best-effort auto-exchange pull for the insolvent path: the backstop LP
    /// acts as the exchanger against every covering token in the quote token's
    /// bubble. Failures are logged and skipped, never fatal here.
    fn pull_auto_exchange_funds(
        &mut self,
        account_id: AccountId,
        quote_token: &Token,
        pool: &CollateralPool,
    ) -> Result<(), EngineError> {
        let coverings: Vec<Token> = self
            .account(account_id)?
            .active_collateral()
            .filter(|t| *t != quote_token)
            .cloned()
            .collect();
        for covering in coverings {
            let same_bubble = pool
                .bubbles
                .same_bubble(&covering, quote_token)
                .unwrap_or(false);
            if !same_bubble {
                continue;
            }
            if let Err(error) = self.execute_auto_exchange_unchecked(
                pool.backstop.account,
                account_id,
                &covering,
                quote_token,
            ) {
                log::warn!(
                    "auto-exchange pull {covering} -> {quote_token} for {:?} skipped: {error}",
                    account_id
                );
            }
        }
        Ok(())
    }

    // -- unfilled orders -----------------------------------------------------

    /// Force-close unfilled orders in every breached quote token. Requires the
    /// account below MMR; the LM delta change per token must be non-negative and
    /// an unfilled penalty proportional to it is distributed.
    pub fn close_all_unfilled_orders(
        &mut self,
        liquidatee: AccountId,
        keeper: Option<AccountId>,
    ) -> Result<Vec<UnfilledCloseOutcome>, EngineError> {
        let pool = self.pool(self.account(liquidatee)?.pool)?.clone();
        let quote_tokens = self.account(liquidatee)?.active_quote_tokens();

        let mut breached: Vec<(Token, MarginInfo)> = Vec::new();
        for token in &quote_tokens {
            let info = self.get_margin_info_by_bubble(liquidatee, token)?;
            if info.deltas.maintenance.is_negative() {
                breached.push((token.clone(), info));
            }
        }
        if breached.is_empty() {
            return Err(EngineError::AccountNotBelowMmr {
                account: liquidatee,
                token: quote_tokens.first().cloned().unwrap_or_else(Token::usd),
            });
        }

        let mut outcomes = Vec::new();
        for (token, before) in breached {
            let market_ids = self.account(liquidatee)?.markets_for(&token);
            let mut closed_markets = Vec::new();
            for market_id in market_ids {
                let had_unfilled = self
                    .market(market_id)?
                    .manager
                    .has_unfilled_orders(liquidatee);
                if !had_unfilled {
                    continue;
                }
                {
                    let registered = self
                        .markets
                        .get_mut(&market_id)
                        .ok_or(EngineError::MarketNotFound(market_id))?;
                    registered.manager.close_all_unfilled_orders(liquidatee)?;
                }
                self.refresh_market_activity(liquidatee, market_id)?;
                closed_markets.push(market_id);
            }
            if closed_markets.is_empty() {
                continue;
            }

            let after = self.get_margin_info_by_bubble(liquidatee, &token)?;
            let change = after.deltas.liquidation.sub(before.deltas.liquidation);
            if change.is_negative() {
                return Err(EngineError::LiquidationCausedNegativeLmDeltaChange {
                    account: liquidatee,
                    token: token.clone(),
                    before: before.deltas.liquidation,
                    after: after.deltas.liquidation,
                });
            }

            let penalty = unfilled_order_penalty(pool.fees.unfilled_penalty_parameter, change);
            let recipient = keeper.unwrap_or(pool.insurance.account);
            self.settle_penalty(liquidatee, &token, penalty, keeper, recipient, &pool)?;

            self.emit_event(EventPayload::UnfilledOrdersClosed(UnfilledOrdersClosedEvent {
                account_id: liquidatee,
                quote_token: token.clone(),
                markets: closed_markets.clone(),
                lm_delta_change: change,
                penalty,
            }));
            outcomes.push(UnfilledCloseOutcome {
                quote_token: token,
                markets: closed_markets,
                lm_delta_change: change,
                penalty,
            });
        }
        Ok(outcomes)
    }

    // -- shared helpers ------------------------------------------------------

    pub(super) fn ensure_no_unfilled_orders(
        &self,
        account_id: AccountId,
        quote_token: &Token,
    ) -> Result<(), EngineError> {
        let account = self.account(account_id)?;
        for market_id in account.markets_for(quote_token) {
            let registered = self.market(market_id)?;
            if registered.manager.has_unfilled_orders(account_id) {
                return Err(EngineError::AccountHasUnfilledOrders {
                    account: account_id,
                    market: market_id,
                });
            }
        }
        Ok(())
    }

    fn ensure_between_adl_and_mmr(
        &self,
        account_id: AccountId,
        quote_token: &Token,
        info: &MarginInfo,
    ) -> Result<(), EngineError> {
        if !info.deltas.maintenance.is_negative() {
            return Err(EngineError::AccountNotBelowMmr {
                account: account_id,
                token: quote_token.clone(),
            });
        }
        if !info.deltas.adl.is_positive() {
            return Err(EngineError::AccountNotBetweenAdlAndMmr {
                account: account_id,
                token: quote_token.clone(),
            });
        }
        Ok(())
    }

    /// Debit the penalty from the liquidatee (deficit allowed) and credit each
    /// recipient its share. Pure ledger mutation, no external calls.
    pub(super) fn settle_penalty(
        &mut self,
        liquidatee: AccountId,
        quote_token: &Token,
        penalty: Quote,
        keeper: Option<AccountId>,
        liquidator: AccountId,
        pool: &CollateralPool,
    ) -> Result<PenaltyDistribution, EngineError> {
        if !penalty.is_positive() {
            return Ok(PenaltyDistribution {
                insurance_fund: Quote::zero(),
                backstop_lp: Quote::zero(),
                keeper: Quote::zero(),
                liquidator: Quote::zero(),
            });
        }

        let backstop_free = if self.accounts.contains_key(&pool.backstop.account) {
            self.get_requirement_deltas_by_bubble(pool.backstop.account, quote_token)?
                .initial
        } else {
            Quote::zero()
        };

        let split = split_liquidation_penalty(
            penalty,
            &pool.fees,
            keeper,
            backstop_free,
            pool.backstop.min_free_collateral,
        );

        self.transfer_collateral(
            liquidatee,
            pool.insurance.account,
            quote_token,
            split.insurance_fund,
            true,
        )?;
        self.transfer_collateral(
            liquidatee,
            pool.backstop.account,
            quote_token,
            split.backstop_lp,
            true,
        )?;
        if let Some(keeper_id) = keeper {
            self.transfer_collateral(liquidatee, keeper_id, quote_token, split.keeper, true)?;
        }
        self.transfer_collateral(liquidatee, liquidator, quote_token, split.liquidator, true)?;

        self.emit_event(EventPayload::PenaltyDistributed(PenaltyDistributedEvent {
            account_id: liquidatee,
            quote_token: quote_token.clone(),
            penalty,
            insurance_fund: split.insurance_fund,
            backstop_lp: split.backstop_lp,
            keeper: split.keeper,
            liquidator: split.liquidator,
        }));
        Ok(split)
    }
}
