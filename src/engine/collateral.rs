//! Collateral ledger operations.
//!
//! Deposits and withdrawals convert raw asset amounts into internal shares through
//! the per-token adapter. A withdrawal is bounded by the triple minimum of the
//! bubble-level initial margin delta, the bubble-level real balance and the
//! token-level real balance, so it can never breach IM nor overdraw either level.

use super::core::Engine;
use super::results::EngineError;
use crate::account::AccountMode;
use crate::events::{DepositEvent, EventPayload, WithdrawalEvent, WithdrawalRejectedEvent};
use crate::types::{AccountId, Quote, Token};

impl Engine {
    // -- ledger primitives ---------------------------------------------------

    /// Credit collateral and net deposits. The raw amount converts to shares via
    /// the token's adapter.
    pub fn increase_net_collateral_deposits(
        &mut self,
        account_id: AccountId,
        token: &Token,
        amount: Quote,
    ) -> Result<(), EngineError> {
        self.ensure_pool_token(account_id, token)?;
        let shares = self.adapters.get(token).assets_to_shares(amount);
        let account = self.account_mut(account_id)?;
        account.credit_shares(token, shares);
        account.adjust_net_deposits(token, amount);
        Ok(())
    }

    /// Debit collateral and net deposits. Fails with `InsufficientCollateral`
    /// when the share balance would go negative; only liquidation and
    /// auto-exchange flows may run a deficit, and they do not come through here.
    pub fn decrease_net_collateral_deposits(
        &mut self,
        account_id: AccountId,
        token: &Token,
        amount: Quote,
    ) -> Result<(), EngineError> {
        self.ensure_pool_token(account_id, token)?;
        let shares = self.adapters.get(token).assets_to_shares(amount);
        let account = self.account_mut(account_id)?;
        account.debit_shares(token, shares, false)?;
        account.adjust_net_deposits(token, amount.negate());
        Ok(())
    }

    /// Signed variant dispatching on the amount's sign.
    pub fn update_net_collateral_deposits(
        &mut self,
        account_id: AccountId,
        token: &Token,
        amount: Quote,
    ) -> Result<(), EngineError> {
        if amount.is_negative() {
            self.decrease_net_collateral_deposits(account_id, token, amount.abs())
        } else {
            self.increase_net_collateral_deposits(account_id, token, amount)
        }
    }

    pub fn get_account_net_collateral_deposits(
        &self,
        account_id: AccountId,
        token: &Token,
    ) -> Result<Quote, EngineError> {
        Ok(self.account(account_id)?.net_collateral_deposits(token))
    }

    /// Real (settled) balance in asset terms: shares through the adapter.
    pub fn get_collateral_balance(
        &self,
        account_id: AccountId,
        token: &Token,
    ) -> Result<Quote, EngineError> {
        let shares = self.account(account_id)?.collateral_shares(token);
        Ok(self.adapters.get(token).shares_to_assets(shares))
    }

    // -- public deposit / withdraw -------------------------------------------

    pub fn deposit(
        &mut self,
        account_id: AccountId,
        token: &Token,
        amount: Quote,
    ) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount { amount });
        }
        self.increase_net_collateral_deposits(account_id, token, amount)?;
        let new_balance = self.get_collateral_balance(account_id, token)?;
        self.emit_event(EventPayload::Deposit(DepositEvent {
            account_id,
            token: token.clone(),
            amount,
            new_balance,
        }));
        Ok(())
    }

    /// Withdraw up to the withdrawable bound. A rejected withdrawal emits an
    /// audit event before surfacing the error.
    pub fn withdraw(
        &mut self,
        account_id: AccountId,
        token: &Token,
        amount: Quote,
    ) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount { amount });
        }
        let withdrawable = self.get_account_withdrawable_collateral_balance(account_id, token)?;
        if amount > withdrawable {
            self.emit_event(EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                account_id,
                token: token.clone(),
                amount,
                reason: format!("withdrawable is {withdrawable}"),
            }));
            return Err(EngineError::InsufficientWithdrawableCollateral {
                account: account_id,
                token: token.clone(),
                requested: amount,
                available: withdrawable,
            });
        }
        self.decrease_net_collateral_deposits(account_id, token, amount)?;
        let new_balance = self.get_collateral_balance(account_id, token)?;
        self.emit_event(EventPayload::Withdrawal(WithdrawalEvent {
            account_id,
            token: token.clone(),
            amount,
            new_balance,
        }));
        Ok(())
    }

    /// `max(0, min(im_delta_bubble, real_balance_bubble, real_balance_token))`.
    pub fn get_account_withdrawable_collateral_balance(
        &self,
        account_id: AccountId,
        token: &Token,
    ) -> Result<Quote, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        if !pool.bubbles.contains(token) || token.is_usd() {
            return Err(EngineError::UnknownCollateralToken {
                pool: pool.id,
                token: token.clone(),
            });
        }

        let bubble_root = pool.bubbles.bubble_root(token)?;
        let recurse = account.mode == AccountMode::MultiToken;
        let info = self.node_margin_info(account, pool, &bubble_root, recurse)?;
        let token_balance = self.get_collateral_balance(account_id, token)?;

        Ok(Quote::zero().max(info.deltas.initial.min(info.real_balance).min(token_balance)))
    }

    // -- internal flows --------------------------------------------------------

    /// Apply a realized cashflow from a market execution. Deficits are expected
    /// here: losses realize into negative balances that auto-exchange and the
    /// insolvency paths deal with.
    pub(super) fn apply_cashflow(
        &mut self,
        account_id: AccountId,
        token: &Token,
        cashflow: Quote,
    ) -> Result<(), EngineError> {
        if cashflow.is_zero() {
            return Ok(());
        }
        let shares = self.adapters.get(token).assets_to_shares(cashflow.abs());
        let account = self.account_mut(account_id)?;
        if cashflow.is_positive() {
            account.credit_shares(token, shares);
        } else {
            account.debit_shares(token, shares, true)?;
        }
        Ok(())
    }

    /// Move collateral between two accounts. `allow_deficit` lets penalty
    /// settlement pull a liquidatee below zero.
    pub(super) fn transfer_collateral(
        &mut self,
        from: AccountId,
        to: AccountId,
        token: &Token,
        amount: Quote,
        allow_deficit: bool,
    ) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Ok(());
        }
        if !self.accounts.contains_key(&to) {
            return Err(EngineError::AccountNotFound(to));
        }
        let shares = self.adapters.get(token).assets_to_shares(amount);
        self.account_mut(from)?.debit_shares(token, shares, allow_deficit)?;
        self.account_mut(to)?.credit_shares(token, shares);
        Ok(())
    }

    fn ensure_pool_token(&self, account_id: AccountId, token: &Token) -> Result<(), EngineError> {
        let account = self.account(account_id)?;
        let pool = self.pool(account.pool)?;
        if !pool.bubbles.contains(token) || token.is_usd() {
            return Err(EngineError::UnknownCollateralToken {
                pool: pool.id,
                token: token.clone(),
            });
        }
        Ok(())
    }
}
