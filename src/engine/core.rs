// 8.1 engine/core.rs: main engine. holds pools, accounts, the market and hook
// registries, the adapter registry and the audit event buffer. every public entry
// point runs to completion or returns an error with nothing persisted halfway;
// callers serialize access per account.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::account::{Account, AccountMode, Permission};
use crate::collateral::{AdapterRegistry, CollateralAdapter};
use crate::events::{AccountCreatedEvent, Event, EventId, EventPayload, PoolCreatedEvent};
use crate::hooks::LiquidationHook;
use crate::market::{MarketManager, RegisteredMarket};
use crate::pool::CollateralPool;
use crate::types::{AccountId, Address, HookId, MarketId, PoolId, Timestamp};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) pools: HashMap<PoolId, CollateralPool>,
    pub(super) accounts: HashMap<AccountId, Account>,
    pub(super) adapters: AdapterRegistry,
    pub(super) markets: HashMap<MarketId, RegisteredMarket>,
    pub(super) hooks: HashMap<HookId, Box<dyn LiquidationHook>>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) next_bid_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            pools: HashMap::new(),
            accounts: HashMap::new(),
            adapters: AdapterRegistry::new(),
            markets: HashMap::new(),
            hooks: HashMap::new(),
            events: Vec::new(),
            next_event_id: 1,
            next_bid_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    // -- clock --------------------------------------------------------------

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    // -- pools ---------------------------------------------------------------

    /// Create a pool. Creation is one-shot: an id collision is an error, never an
    /// overwrite.
    pub fn create_collateral_pool(&mut self, pool: CollateralPool) -> Result<PoolId, EngineError> {
        pool.validate()?;
        let pool_id = pool.id;
        if self.pools.contains_key(&pool_id) {
            return Err(EngineError::PoolAlreadyExists(pool_id));
        }
        self.pools.insert(pool_id, pool);
        self.emit_event(EventPayload::PoolCreated(PoolCreatedEvent { pool_id }));
        log::info!("collateral pool {:?} created", pool_id);
        Ok(pool_id)
    }

    /// Replace a pool's configuration. Only the pool owner may do this.
    pub fn update_collateral_pool(
        &mut self,
        caller: &Address,
        pool: CollateralPool,
    ) -> Result<(), EngineError> {
        pool.validate()?;
        let existing = self
            .pools
            .get(&pool.id)
            .ok_or(EngineError::PoolNotFound(pool.id))?;
        if existing.owner != *caller {
            return Err(EngineError::PoolOwnerOnly {
                pool: pool.id,
                address: caller.clone(),
            });
        }
        self.pools.insert(pool.id, pool);
        Ok(())
    }

    pub fn get_pool(&self, pool_id: PoolId) -> Option<&CollateralPool> {
        self.pools.get(&pool_id)
    }

    pub(super) fn pool(&self, pool_id: PoolId) -> Result<&CollateralPool, EngineError> {
        self.pools
            .get(&pool_id)
            .ok_or(EngineError::PoolNotFound(pool_id))
    }

    // -- accounts ------------------------------------------------------------

    /// Create an account in a pool. Idempotent on nothing: an id collision is an
    /// error. Accounts are never deleted afterwards.
    pub fn create_account(
        &mut self,
        id: AccountId,
        owner: Address,
        mode: AccountMode,
        pool_id: PoolId,
    ) -> Result<AccountId, EngineError> {
        if !self.pools.contains_key(&pool_id) {
            return Err(EngineError::PoolNotFound(pool_id));
        }
        if self.accounts.contains_key(&id) {
            return Err(EngineError::AccountAlreadyExists(id));
        }
        let account = Account::new(id, owner, mode, pool_id, self.current_time);
        self.accounts.insert(id, account);
        self.emit_event(EventPayload::AccountCreated(AccountCreatedEvent {
            account_id: id,
            pool_id,
        }));
        Ok(id)
    }

    pub fn get_account(&self, account_id: AccountId) -> Option<&Account> {
        self.accounts.get(&account_id)
    }

    pub(super) fn account(&self, account_id: AccountId) -> Result<&Account, EngineError> {
        self.accounts
            .get(&account_id)
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    pub(super) fn account_mut(&mut self, account_id: AccountId) -> Result<&mut Account, EngineError> {
        self.accounts
            .get_mut(&account_id)
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    /// Grant a named permission on an account. Only an address that already holds
    /// admin (or the owner) may change the permission set.
    pub fn grant_permission(
        &mut self,
        caller: &Address,
        account_id: AccountId,
        permission: Permission,
        grantee: Address,
    ) -> Result<(), EngineError> {
        let account = self.account_mut(account_id)?;
        if !account.has_permission(caller, Permission::Admin) {
            return Err(EngineError::Unauthorized {
                account: account_id,
                address: caller.clone(),
            });
        }
        account.grant_permission(permission, grantee);
        Ok(())
    }

    pub fn revoke_permission(
        &mut self,
        caller: &Address,
        account_id: AccountId,
        permission: Permission,
        grantee: &Address,
    ) -> Result<(), EngineError> {
        let account = self.account_mut(account_id)?;
        if !account.has_permission(caller, Permission::Admin) {
            return Err(EngineError::Unauthorized {
                account: account_id,
                address: caller.clone(),
            });
        }
        account.revoke_permission(permission, grantee);
        Ok(())
    }

    // -- adapters ------------------------------------------------------------

    pub fn register_adapter(&mut self, token: crate::types::Token, adapter: CollateralAdapter) {
        self.adapters.register(token, adapter);
    }

    pub fn set_adapter_rate(
        &mut self,
        token: &crate::types::Token,
        rate: Decimal,
    ) -> Result<(), EngineError> {
        self.adapters.set_rate(token, rate)?;
        Ok(())
    }

    // -- markets -------------------------------------------------------------

    /// Register a market under a pool. The market's quote token must already be
    /// configured in the pool's bubble graph.
    pub fn register_market(
        &mut self,
        manager: Box<dyn MarketManager>,
        risk_parameter: Decimal,
        pool_id: PoolId,
    ) -> Result<MarketId, EngineError> {
        let market_id = manager.id();
        let quote = manager.quote_token();
        if self.markets.contains_key(&market_id) {
            return Err(EngineError::MarketAlreadyRegistered(market_id));
        }
        let pool = self.pool(pool_id)?;
        if !pool.bubbles.contains(&quote) || quote.is_usd() {
            return Err(EngineError::UnknownCollateralToken {
                pool: pool_id,
                token: quote,
            });
        }
        self.markets.insert(
            market_id,
            RegisteredMarket::new(manager, risk_parameter, pool_id),
        );
        log::info!("market {:?} registered in pool {:?}", market_id, pool_id);
        Ok(market_id)
    }

    pub(super) fn market(&self, market_id: MarketId) -> Result<&RegisteredMarket, EngineError> {
        self.markets
            .get(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    /// Mark an account as active in a market, e.g. after the execution layer
    /// reports an external fill. The quote token comes from the market itself.
    pub fn set_account_active_in_market(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<(), EngineError> {
        let (quote, market_pool) = {
            let registered = self.market(market_id)?;
            (registered.manager.quote_token(), registered.pool)
        };
        let account = self.account_mut(account_id)?;
        if account.pool != market_pool {
            return Err(EngineError::CollateralPoolMismatch {
                expected: market_pool,
                found: account.pool,
            });
        }
        account.add_active_market(&quote, market_id);
        Ok(())
    }

    /// Re-derive an account's membership in a market from what the market
    /// reports. Liquidation paths call this after every execution so the active
    /// set never goes stale mid-flow.
    pub(super) fn refresh_market_activity(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<(), EngineError> {
        let (quote, active) = {
            let registered = self.market(market_id)?;
            let active = registered.manager.has_open_filled_exposure(account_id)
                || registered.manager.has_unfilled_orders(account_id);
            (registered.manager.quote_token(), active)
        };
        let account = self.account_mut(account_id)?;
        if active {
            account.add_active_market(&quote, market_id);
        } else {
            account.remove_active_market(&quote, market_id);
        }
        Ok(())
    }

    // -- hooks ---------------------------------------------------------------

    pub fn register_hook(&mut self, hook_id: HookId, hook: Box<dyn LiquidationHook>) {
        self.hooks.insert(hook_id, hook);
    }

    // -- events --------------------------------------------------------------

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            log::debug!("[event {}] {:?}", event.id.0, event.payload);
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }

    pub(super) fn allocate_bid_id(&mut self) -> crate::types::BidId {
        let id = crate::types::BidId(self.next_bid_id);
        self.next_bid_id += 1;
        id
    }
}
