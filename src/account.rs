//! Account records.
//!
//! An account owns share-based collateral balances, a capability permission set,
//! per-quote-token active market sets, and per-quote-token liquidation bid queues.
//! Accounts are created once and never deleted; a fully liquidated account simply
//! ends up empty.

use crate::collateral::CollateralError;
use crate::queue::QueueSlot;
use crate::types::{AccountId, Address, MarketId, PoolId, Quote, Shares, Timestamp, Token};
use std::collections::{BTreeMap, BTreeSet};

/// Single-token accounts margin each quote token in isolation; multi-token
/// accounts cross-collateralize through the bubble graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMode {
    SingleToken,
    MultiToken,
}

/// Named capabilities granted to addresses. The owner implicitly holds all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    Admin,
    Trade,
    Withdraw,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub owner: Address,
    pub mode: AccountMode,
    pub pool: PoolId,
    permissions: BTreeMap<Permission, BTreeSet<Address>>,
    collateral: BTreeMap<Token, Shares>,
    net_deposits: BTreeMap<Token, Quote>,
    active_collateral: BTreeSet<Token>,
    active_markets: BTreeMap<Token, BTreeSet<MarketId>>,
    pub bid_queues: BTreeMap<Token, QueueSlot>,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(
        id: AccountId,
        owner: Address,
        mode: AccountMode,
        pool: PoolId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            owner,
            mode,
            pool,
            permissions: BTreeMap::new(),
            collateral: BTreeMap::new(),
            net_deposits: BTreeMap::new(),
            active_collateral: BTreeSet::new(),
            active_markets: BTreeMap::new(),
            bid_queues: BTreeMap::new(),
            created_at,
        }
    }

    // -- permissions --------------------------------------------------------

    pub fn has_permission(&self, address: &Address, permission: Permission) -> bool {
        if *address == self.owner {
            return true;
        }
        self.permissions
            .get(&permission)
            .map(|grantees| grantees.contains(address))
            .unwrap_or(false)
    }

    pub fn grant_permission(&mut self, permission: Permission, address: Address) {
        self.permissions.entry(permission).or_default().insert(address);
    }

    pub fn revoke_permission(&mut self, permission: Permission, address: &Address) {
        if let Some(grantees) = self.permissions.get_mut(&permission) {
            grantees.remove(address);
        }
    }

    // -- collateral ---------------------------------------------------------

    pub fn collateral_shares(&self, token: &Token) -> Shares {
        self.collateral.get(token).copied().unwrap_or(Shares::zero())
    }

    /// Credit shares, toggling active-collateral membership on the zero crossing.
    pub fn credit_shares(&mut self, token: &Token, shares: Shares) {
        let balance = self.collateral_shares(token).add(shares);
        self.store_balance(token, balance);
    }

    /// Debit shares. A plain withdrawal/decrease may never go negative; the
    /// liquidation and auto-exchange paths explicitly permit a deficit.
    pub fn debit_shares(
        &mut self,
        token: &Token,
        shares: Shares,
        allow_deficit: bool,
    ) -> Result<(), CollateralError> {
        let balance = self.collateral_shares(token);
        let remaining = balance.sub(shares);
        if remaining.is_negative() && !allow_deficit {
            return Err(CollateralError::InsufficientCollateral {
                account: self.id,
                token: token.clone(),
                requested: Quote::new(shares.value()),
                available: Quote::new(balance.value()),
            });
        }
        self.store_balance(token, remaining);
        Ok(())
    }

    fn store_balance(&mut self, token: &Token, balance: Shares) {
        if balance.is_zero() {
            self.collateral.remove(token);
            self.active_collateral.remove(token);
        } else {
            self.collateral.insert(token.clone(), balance);
            self.active_collateral.insert(token.clone());
        }
    }

    pub fn active_collateral(&self) -> impl Iterator<Item = &Token> {
        self.active_collateral.iter()
    }

    pub fn is_collateral_active(&self, token: &Token) -> bool {
        self.active_collateral.contains(token)
    }

    // -- net deposits -------------------------------------------------------

    pub fn net_collateral_deposits(&self, token: &Token) -> Quote {
        self.net_deposits.get(token).copied().unwrap_or(Quote::zero())
    }

    pub fn adjust_net_deposits(&mut self, token: &Token, delta: Quote) {
        let updated = self.net_collateral_deposits(token).add(delta);
        if updated.is_zero() {
            self.net_deposits.remove(token);
        } else {
            self.net_deposits.insert(token.clone(), updated);
        }
    }

    // -- market membership --------------------------------------------------

    pub fn add_active_market(&mut self, quote_token: &Token, market: MarketId) {
        self.active_markets
            .entry(quote_token.clone())
            .or_default()
            .insert(market);
    }

    pub fn remove_active_market(&mut self, quote_token: &Token, market: MarketId) {
        if let Some(markets) = self.active_markets.get_mut(quote_token) {
            markets.remove(&market);
            if markets.is_empty() {
                self.active_markets.remove(quote_token);
            }
        }
    }

    pub fn markets_for(&self, quote_token: &Token) -> Vec<MarketId> {
        self.active_markets
            .get(quote_token)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Quote tokens with at least one active market.
    pub fn active_quote_tokens(&self) -> Vec<Token> {
        self.active_markets.keys().cloned().collect()
    }

    // -- bid queues ---------------------------------------------------------

    pub fn bid_queue_slot_mut(&mut self, quote_token: &Token) -> &mut QueueSlot {
        self.bid_queues.entry(quote_token.clone()).or_default()
    }

    pub fn bid_queue_slot(&self, quote_token: &Token) -> Option<&QueueSlot> {
        self.bid_queues.get(quote_token)
    }
}
