// 2.0: share-based collateral accounting. deposits convert raw asset amounts into
// internal shares through a per-token adapter, so rebasing/yield-bearing wrapped
// tokens accrue without touching every account. standard tokens convert 1:1.

use crate::types::{AccountId, Quote, Shares, Token};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// 2.1: conversion between raw asset units and internal shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralAdapter {
    /// 1 share == 1 asset unit.
    Standard,
    /// assets = shares * rate. the rate grows as yield accrues.
    Rebasing { rate: Decimal },
}

impl CollateralAdapter {
    pub fn rebasing(rate: Decimal) -> Option<Self> {
        if rate > Decimal::ZERO {
            Some(Self::Rebasing { rate })
        } else {
            None
        }
    }

    pub fn assets_to_shares(&self, assets: Quote) -> Shares {
        match self {
            Self::Standard => Shares::new(assets.value()),
            Self::Rebasing { rate } => Shares::new(assets.value() / rate),
        }
    }

    pub fn shares_to_assets(&self, shares: Shares) -> Quote {
        match self {
            Self::Standard => Quote::new(shares.value()),
            Self::Rebasing { rate } => Quote::new(shares.value() * rate),
        }
    }
}

// 2.2: per-token adapter registry. tokens without an explicit entry are standard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Token, CollateralAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, token: Token, adapter: CollateralAdapter) {
        self.adapters.insert(token, adapter);
    }

    pub fn get(&self, token: &Token) -> CollateralAdapter {
        self.adapters
            .get(token)
            .copied()
            .unwrap_or(CollateralAdapter::Standard)
    }

    /// Update a rebasing token's rate after yield accrual. No-op error for
    /// standard tokens, which have no rate to move.
    pub fn set_rate(&mut self, token: &Token, rate: Decimal) -> Result<(), CollateralError> {
        if rate <= Decimal::ZERO {
            return Err(CollateralError::InvalidRebaseRate {
                token: token.clone(),
                rate,
            });
        }
        match self.adapters.get_mut(token) {
            Some(CollateralAdapter::Rebasing { rate: r }) => {
                *r = rate;
                Ok(())
            }
            _ => Err(CollateralError::NotRebasing {
                token: token.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CollateralError {
    #[error("Insufficient collateral for account {account:?} in {token}: requested {requested}, available {available}")]
    InsufficientCollateral {
        account: AccountId,
        token: Token,
        requested: Quote,
        available: Quote,
    },

    #[error("Token {token} has no rebasing adapter")]
    NotRebasing { token: Token },

    #[error("Invalid rebase rate {rate} for token {token}")]
    InvalidRebaseRate { token: Token, rate: Decimal },
}
