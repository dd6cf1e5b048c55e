//! Margin views over the bubble graph.
//!
//! Pure reads: nothing here mutates. Exposures are re-queried from the market
//! managers on every call; there is no caching contract, so callers tolerate the
//! recomputation cost in exchange for never seeing a stale requirement.

use super::core::Engine;
use super::results::EngineError;
use crate::account::{Account, AccountMode};
use crate::exposure::{market_requirement, MarginInfo, MarginRequirementDeltas, RawRequirement};
use crate::pool::CollateralPool;
use crate::types::{AccountId, Quote, Token};

impl Engine {
    /// Margin view for an account at a bubble node. Multi-token accounts fold in
    /// every child token with the sign-dependent haircut; single-token accounts
    /// read the requested token in isolation.
    pub fn get_margin_info_by_bubble(
        &self,
        account_id: AccountId,
        token: &Token,
    ) -> Result<MarginInfo, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        if !pool.bubbles.contains(token) {
            return Err(EngineError::UnknownCollateralToken {
                pool: pool.id,
                token: token.clone(),
            });
        }
        match account.mode {
            AccountMode::SingleToken => {
                self.single_token_guard(account)?;
                self.node_margin_info(account, pool, token, false)
            }
            AccountMode::MultiToken => self.node_margin_info(account, pool, token, true),
        }
    }

    pub fn get_requirement_deltas_by_bubble(
        &self,
        account_id: AccountId,
        token: &Token,
    ) -> Result<MarginRequirementDeltas, EngineError> {
        Ok(self.get_margin_info_by_bubble(account_id, token)?.deltas)
    }

    /// Raw single-token view, no bubble recursion. Solvency checks in the
    /// backstop path read this regardless of account mode.
    pub(super) fn raw_margin_info(
        &self,
        account_id: AccountId,
        token: &Token,
    ) -> Result<MarginInfo, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        self.node_margin_info(account, pool, token, false)
    }

    /// A single-token account active in more than one quote token is in a state
    /// the aggregation cannot price. Fence, not a user error.
    fn single_token_guard(&self, account: &Account) -> Result<(), EngineError> {
        if account.active_quote_tokens().len() > 1 {
            return Err(EngineError::UnsupportedAccountExposure {
                account: account.id,
            });
        }
        Ok(())
    }

    pub(super) fn node_margin_info(
        &self,
        account: &Account,
        pool: &CollateralPool,
        token: &Token,
        recurse: bool,
    ) -> Result<MarginInfo, EngineError> {
        let raw = self.account_raw_requirement(account, token)?;
        let real_balance = if token.is_usd() {
            // the root sentinel holds no balances of its own
            Quote::zero()
        } else {
            self.adapters
                .get(token)
                .shares_to_assets(account.collateral_shares(token))
        };
        let net_deposits = account.net_collateral_deposits(token);
        let mut info = MarginInfo::from_own(
            token.clone(),
            net_deposits,
            real_balance,
            raw,
            &pool.multipliers,
        );

        if recurse {
            for child in pool.bubbles.children(token) {
                let child_info = self.node_margin_info(account, pool, &child, true)?;
                let edge = pool
                    .bubbles
                    .node(&child)
                    .ok_or_else(|| crate::bubble::BubbleError::UnknownToken(child.clone()))?;
                info.absorb_child(&child_info, |q| Quote::new(edge.convert(q.value())));
            }
        }
        Ok(info)
    }

    /// Own-token margin charge: every market the account is active in under
    /// `token`, worse unfilled scenario per position.
    pub(super) fn account_raw_requirement(
        &self,
        account: &Account,
        token: &Token,
    ) -> Result<RawRequirement, EngineError> {
        let mut raw = RawRequirement::zero();
        for market_id in account.markets_for(token) {
            let registered = self.market(market_id)?;
            let pairs = registered.manager.account_taker_and_maker_exposures(account.id);
            raw = raw.add(market_requirement(&pairs, registered.risk_parameter));
        }
        Ok(raw)
    }
}
