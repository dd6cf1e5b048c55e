// 6.2: auto-deleveraging support. when no liquidator shows up and the backstop is
// on the hook, residual positions are force-unwound: profitable ones first at market
// price, losing ones at market price while insurance covers the hole, and at a
// bankruptcy price that shares the shortfall once it does not.

use crate::exposure::ExposurePair;
use crate::market::AdlOrder;
use crate::types::Quote;

/// Which backstop branch an account went down. Solvency is judged on the raw
/// single-token margin balance in the quote token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackstopPath {
    Solvent,
    InsolventInsuranceCovered,
    InsolventBankruptcy,
}

/// Aggregate unrealized loss across an account's filled exposures. Callers reach
/// this point only after unfilled orders are gone, so lower == upper and either
/// scenario reads the same.
pub fn total_unrealized_loss(exposures: &[ExposurePair]) -> Quote {
    exposures
        .iter()
        .map(|pair| pair.lower.unrealized_loss)
        .sum()
}

/// Unwind only profitable positions at market price. Their holders absorb no
/// shortfall; the realized gains shrink the hole first.
pub fn positive_upnl_at_market() -> AdlOrder {
    AdlOrder {
        adl_negative_upnl: false,
        adl_positive_upnl: true,
        total_unrealized_loss_quote: Quote::zero(),
        real_balance_and_if: Quote::zero(),
    }
}

/// Unwind losing positions at market price. Valid only while the insurance fund
/// fully underwrites the shortfall.
pub fn negative_upnl_at_market() -> AdlOrder {
    AdlOrder {
        adl_negative_upnl: true,
        adl_positive_upnl: false,
        total_unrealized_loss_quote: Quote::zero(),
        real_balance_and_if: Quote::zero(),
    }
}

/// Unwind losing positions at the bankruptcy price: `real_balance_and_if` is
/// what actually backs the unwind (raw balance plus the insurance
/// contribution). The gap to the aggregate unrealized loss is the shortfall,
/// and each counterparty eats `unrealized_loss / total * shortfall`.
pub fn negative_upnl_at_bankruptcy(
    total_unrealized_loss_quote: Quote,
    real_balance_and_if: Quote,
) -> AdlOrder {
    AdlOrder {
        adl_negative_upnl: true,
        adl_positive_upnl: false,
        total_unrealized_loss_quote,
        real_balance_and_if,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::MarketExposure;
    use rust_decimal_macros::dec;

    #[test]
    fn aggregates_filled_losses() {
        let exposures = vec![
            ExposurePair::filled(MarketExposure::new(dec!(1000), Quote::new(dec!(120)))),
            ExposurePair::filled(MarketExposure::new(dec!(-400), Quote::zero())),
            ExposurePair::filled(MarketExposure::new(dec!(200), Quote::new(dec!(30)))),
        ];

        assert_eq!(total_unrealized_loss(&exposures).value(), dec!(150));
    }

    #[test]
    fn order_constructors_set_upnl_filters() {
        let positive = positive_upnl_at_market();
        assert!(positive.adl_positive_upnl && !positive.adl_negative_upnl);

        let negative = negative_upnl_at_market();
        assert!(negative.adl_negative_upnl && !negative.adl_positive_upnl);
        assert!(negative.total_unrealized_loss_quote.is_zero());

        let bankruptcy =
            negative_upnl_at_bankruptcy(Quote::new(dec!(500)), Quote::new(dec!(-200)));
        assert!(bankruptcy.adl_negative_upnl);
        assert_eq!(bankruptcy.real_balance_and_if.value(), dec!(-200));
    }
}
