//! Collateral bubble graph.
//!
//! Collateral types form a tree per pool: a stable quote token sits directly under
//! the global USD root, wrapped/yield-bearing variants hang off it as children. Each
//! edge carries an exchange price (parent-denominated) and a haircut. Conversions are
//! sign-dependent: positive quantities moving toward the parent are discounted by the
//! haircut, negative quantities pass through at the full exchange rate.
//!
//! The tree is validated at configuration time: a node can only be attached to a
//! parent that already exists, so the graph is acyclic by construction.

use crate::types::Token;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleNode {
    pub parent: Token,
    /// Price of one unit of this token, denominated in the parent token.
    pub exchange_price: Decimal,
    /// Fraction in [0, 1) shaved off positive quantities converted into the parent.
    pub haircut: Decimal,
}

impl BubbleNode {
    /// Sign-dependent conversion into parent terms: gains are discounted by the
    /// haircut, losses convert at the full rate.
    pub fn convert(&self, quantity: Decimal) -> Decimal {
        let converted = quantity * self.exchange_price;
        if converted > Decimal::ZERO {
            converted * (Decimal::ONE - self.haircut)
        } else {
            converted
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BubbleGraph {
    nodes: BTreeMap<Token, BubbleNode>,
}

impl BubbleGraph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Attach `token` under `parent`. The parent must be the USD root or an
    /// already-attached token, which keeps the graph a single acyclic tree.
    pub fn add_token(
        &mut self,
        token: Token,
        parent: Token,
        exchange_price: Decimal,
        haircut: Decimal,
    ) -> Result<(), BubbleError> {
        if token.is_usd() {
            return Err(BubbleError::RootIsNotConfigurable);
        }
        if self.nodes.contains_key(&token) {
            return Err(BubbleError::DuplicateToken(token));
        }
        if !parent.is_usd() && !self.nodes.contains_key(&parent) {
            return Err(BubbleError::UnknownParent { token, parent });
        }
        if exchange_price <= Decimal::ZERO {
            return Err(BubbleError::InvalidExchangePrice {
                token,
                price: exchange_price,
            });
        }
        if haircut < Decimal::ZERO || haircut >= Decimal::ONE {
            return Err(BubbleError::InvalidHaircut { token, haircut });
        }

        self.nodes.insert(
            token,
            BubbleNode {
                parent,
                exchange_price,
                haircut,
            },
        );
        Ok(())
    }

    pub fn contains(&self, token: &Token) -> bool {
        token.is_usd() || self.nodes.contains_key(token)
    }

    pub fn node(&self, token: &Token) -> Option<&BubbleNode> {
        self.nodes.get(token)
    }

    /// Direct children of `token`, in deterministic (symbol) order.
    pub fn children(&self, token: &Token) -> Vec<Token> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent == *token)
            .map(|(child, _)| child.clone())
            .collect()
    }

    /// All configured tokens, root excluded.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.nodes.keys()
    }

    /// The topmost ancestor of `token` below the USD root. Margin constraints for a
    /// withdrawal are evaluated at this node.
    pub fn bubble_root(&self, token: &Token) -> Result<Token, BubbleError> {
        if token.is_usd() {
            return Ok(token.clone());
        }
        let mut current = token.clone();
        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| BubbleError::UnknownToken(current.clone()))?;
            if node.parent.is_usd() {
                return Ok(current);
            }
            current = node.parent.clone();
        }
    }

    /// Whether two tokens live in the same bubble (share a topmost ancestor).
    pub fn same_bubble(&self, a: &Token, b: &Token) -> Result<bool, BubbleError> {
        Ok(self.bubble_root(a)? == self.bubble_root(b)?)
    }

    /// Convert a signed quantity of `token` into parent terms. Positive quantities
    /// are discounted by the haircut, negative quantities convert at the full rate.
    pub fn convert_to_parent(&self, token: &Token, quantity: Decimal) -> Result<Decimal, BubbleError> {
        let node = self
            .nodes
            .get(token)
            .ok_or_else(|| BubbleError::UnknownToken(token.clone()))?;
        Ok(node.convert(quantity))
    }

    /// Price of one unit of `token` in USD-root terms: the product of exchange
    /// prices up the tree. No haircut; this is a price, not a margin conversion.
    pub fn price_to_usd(&self, token: &Token) -> Result<Decimal, BubbleError> {
        if token.is_usd() {
            return Ok(Decimal::ONE);
        }
        let mut price = Decimal::ONE;
        let mut current = token.clone();
        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| BubbleError::UnknownToken(current.clone()))?;
            price *= node.exchange_price;
            if node.parent.is_usd() {
                return Ok(price);
            }
            current = node.parent.clone();
        }
    }

    /// Signed USD value of a quantity of `token`, for threshold comparisons.
    pub fn usd_value(&self, token: &Token, quantity: Decimal) -> Result<Decimal, BubbleError> {
        Ok(quantity * self.price_to_usd(token)?)
    }

    /// Reprice an edge, e.g. after an oracle update. Haircut is untouched.
    pub fn set_exchange_price(&mut self, token: &Token, price: Decimal) -> Result<(), BubbleError> {
        if price <= Decimal::ZERO {
            return Err(BubbleError::InvalidExchangePrice {
                token: token.clone(),
                price,
            });
        }
        let node = self
            .nodes
            .get_mut(token)
            .ok_or_else(|| BubbleError::UnknownToken(token.clone()))?;
        node.exchange_price = price;
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BubbleError {
    #[error("Token {0:?} is already configured in this bubble graph")]
    DuplicateToken(Token),

    #[error("Token {0:?} is not configured in this bubble graph")]
    UnknownToken(Token),

    #[error("Parent {parent:?} of token {token:?} is not configured")]
    UnknownParent { token: Token, parent: Token },

    #[error("Invalid exchange price {price} for token {token:?}")]
    InvalidExchangePrice { token: Token, price: Decimal },

    #[error("Invalid haircut {haircut} for token {token:?}")]
    InvalidHaircut { token: Token, haircut: Decimal },

    #[error("The USD root cannot be reconfigured")]
    RootIsNotConfigurable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdc() -> Token {
        Token::new("USDC")
    }

    fn susdc() -> Token {
        Token::new("sUSDC")
    }

    fn graph() -> BubbleGraph {
        let mut g = BubbleGraph::new();
        g.add_token(usdc(), Token::usd(), dec!(1), dec!(0)).unwrap();
        g.add_token(susdc(), usdc(), dec!(1.05), dec!(0.1)).unwrap();
        g
    }

    #[test]
    fn parent_must_exist() {
        let mut g = BubbleGraph::new();
        let err = g.add_token(susdc(), usdc(), dec!(1.05), dec!(0.1));
        assert!(matches!(err, Err(BubbleError::UnknownParent { .. })));
    }

    #[test]
    fn duplicate_rejected() {
        let mut g = graph();
        let err = g.add_token(usdc(), Token::usd(), dec!(1), dec!(0));
        assert!(matches!(err, Err(BubbleError::DuplicateToken(_))));
    }

    #[test]
    fn haircut_bounds() {
        let mut g = graph();
        let err = g.add_token(Token::new("wETH"), usdc(), dec!(2000), dec!(1));
        assert!(matches!(err, Err(BubbleError::InvalidHaircut { .. })));
    }

    #[test]
    fn sign_dependent_conversion() {
        let g = graph();

        // positive: 100 sUSDC * 1.05 = 105, haircut 10% -> 94.5
        let up = g.convert_to_parent(&susdc(), dec!(100)).unwrap();
        assert_eq!(up, dec!(94.50));

        // negative: full rate, no haircut relief on losses
        let down = g.convert_to_parent(&susdc(), dec!(-100)).unwrap();
        assert_eq!(down, dec!(-105.00));
    }

    #[test]
    fn usd_pricing_chains_edges() {
        let g = graph();
        assert_eq!(g.price_to_usd(&usdc()).unwrap(), dec!(1));
        assert_eq!(g.price_to_usd(&susdc()).unwrap(), dec!(1.05));
        assert_eq!(g.usd_value(&susdc(), dec!(-10)).unwrap(), dec!(-10.50));
    }

    #[test]
    fn bubble_root_walks_up() {
        let g = graph();
        assert_eq!(g.bubble_root(&susdc()).unwrap(), usdc());
        assert_eq!(g.bubble_root(&usdc()).unwrap(), usdc());
        assert!(g.same_bubble(&usdc(), &susdc()).unwrap());
    }

    #[test]
    fn children_are_ordered() {
        let mut g = graph();
        g.add_token(Token::new("aUSDC"), usdc(), dec!(1.01), dec!(0.05))
            .unwrap();
        let kids = g.children(&usdc());
        assert_eq!(kids, vec![Token::new("aUSDC"), susdc()]);
    }

    #[test]
    fn repricing_edge() {
        let mut g = graph();
        g.set_exchange_price(&susdc(), dec!(1.10)).unwrap();
        assert_eq!(g.price_to_usd(&susdc()).unwrap(), dec!(1.10));
    }
}
