//! Solvency invariant tests.
//!
//! These tests verify critical invariants that must hold for the clearing
//! layer to stay solvent: margin views are pure, deposits only improve
//! health, withdrawals never unlock more than is there, and every
//! liquidation leaves the account at least as healthy as it found it.

use clearing_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn usdc() -> Token {
    Token::new("USDC")
}

fn susdc() -> Token {
    Token::new("sUSDC")
}

const INSURANCE: AccountId = AccountId(100);
const BACKSTOP: AccountId = AccountId(101);
const POOL: PoolId = PoolId(1);
const MARKET: MarketId = MarketId(1);

fn setup() -> (Engine, SharedSimMarket) {
    let mut engine = Engine::new(EngineConfig::default());

    let mut pool = CollateralPool::new(POOL, Address::new("0xpool"), INSURANCE, BACKSTOP);
    pool.bubbles
        .add_token(usdc(), Token::usd(), dec!(1), dec!(0))
        .unwrap();
    pool.bubbles
        .add_token(susdc(), usdc(), dec!(1.05), dec!(0.1))
        .unwrap();
    engine.create_collateral_pool(pool).unwrap();

    engine
        .create_account(INSURANCE, Address::new("0xif"), AccountMode::MultiToken, POOL)
        .unwrap();
    engine
        .create_account(BACKSTOP, Address::new("0xbslp"), AccountMode::MultiToken, POOL)
        .unwrap();
    engine
        .deposit(INSURANCE, &usdc(), Quote::new(dec!(1_000_000)))
        .unwrap();
    engine
        .deposit(BACKSTOP, &usdc(), Quote::new(dec!(1_000_000)))
        .unwrap();

    engine.register_adapter(susdc(), CollateralAdapter::rebasing(dec!(1)).unwrap());

    let market = SharedSimMarket::new(SimMarket::new(MARKET, usdc()));
    engine
        .register_market(Box::new(market.handle()), dec!(0.1), POOL)
        .unwrap();

    (engine, market)
}

fn trader(engine: &mut Engine, id: u64, deposit: Decimal) -> AccountId {
    let account = AccountId(id);
    engine
        .create_account(
            account,
            Address::new(format!("0xtrader{id}")),
            AccountMode::MultiToken,
            POOL,
        )
        .unwrap();
    if deposit > Decimal::ZERO {
        engine
            .deposit(account, &usdc(), Quote::new(deposit))
            .unwrap();
    }
    account
}

proptest! {
    /// Margin computation is a pure view: two calls without intervening
    /// mutation return identical results.
    #[test]
    fn margin_computation_idempotent(
        deposit in (0i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        wrapped in (0i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        notional in (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        pnl in (-50_000i64..50_000i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let (mut engine, market) = setup();
        let alice = trader(&mut engine, 1, deposit);
        if wrapped > Decimal::ZERO {
            engine.deposit(alice, &susdc(), Quote::new(wrapped)).unwrap();
        }
        market.set_position(alice, SimPosition::taker(notional, Quote::new(pnl)));
        engine.set_account_active_in_market(alice, MARKET).unwrap();

        let first = engine.get_margin_info_by_bubble(alice, &usdc()).unwrap();
        let second = engine.get_margin_info_by_bubble(alice, &usdc()).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Depositing more collateral never decreases the initial margin delta in
    /// the bubble containing that token.
    #[test]
    fn deposit_monotonicity(
        deposit in (0i64..500_000i64).prop_map(|x| Decimal::new(x, 2)),
        extra in (1i64..500_000i64).prop_map(|x| Decimal::new(x, 2)),
        notional in (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        wrapped_extra in proptest::bool::ANY,
    ) {
        let (mut engine, market) = setup();
        let alice = trader(&mut engine, 1, deposit);
        market.set_position(alice, SimPosition::taker(notional, Quote::zero()));
        engine.set_account_active_in_market(alice, MARKET).unwrap();

        let before = engine
            .get_requirement_deltas_by_bubble(alice, &usdc())
            .unwrap();

        // a deposit in the token itself or in a child of its bubble
        let token = if wrapped_extra { susdc() } else { usdc() };
        engine.deposit(alice, &token, Quote::new(extra)).unwrap();

        let after = engine
            .get_requirement_deltas_by_bubble(alice, &usdc())
            .unwrap();
        prop_assert!(
            after.initial >= before.initial,
            "IM delta shrank from {} to {}",
            before.initial,
            after.initial
        );
    }

    /// Withdrawable balance never exceeds the token balance and is never
    /// negative, whatever the margin situation.
    #[test]
    fn withdrawable_never_exceeds_balance(
        deposit in (0i64..500_000i64).prop_map(|x| Decimal::new(x, 2)),
        notional in (0i64..2_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        pnl in (-100_000i64..10_000i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let (mut engine, market) = setup();
        let alice = trader(&mut engine, 1, deposit);
        if notional > Decimal::ZERO {
            market.set_position(alice, SimPosition::taker(notional, Quote::new(pnl)));
            engine.set_account_active_in_market(alice, MARKET).unwrap();
        }

        let withdrawable = engine
            .get_account_withdrawable_collateral_balance(alice, &usdc())
            .unwrap();
        let balance = engine.get_collateral_balance(alice, &usdc()).unwrap();

        prop_assert!(!withdrawable.is_negative());
        prop_assert!(withdrawable <= balance.max(Quote::zero()));
    }

    /// Every successful ranked liquidation leaves the LM delta at least where
    /// it was, and the distributed penalty is conserved across recipients.
    #[test]
    fn liquidation_improves_health(
        notional in (100_000i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        balance_factor in (105i64..145i64).prop_map(|x| Decimal::new(x, 2)),
        close_ratio in (20i64..100i64).prop_map(|x| Decimal::new(x, 2)),
        reward in (5i64..95i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let (mut engine, market) = setup();
        // margin balance sits between LM (1.0x) and MMR (1.5x)
        let lmr = notional * dec!(0.1);
        let alice = trader(&mut engine, 1, lmr * balance_factor);
        let bob = trader(&mut engine, 2, dec!(1_000_000));

        market.set_position(alice, SimPosition::taker(notional, Quote::zero()));
        engine.set_account_active_in_market(alice, MARKET).unwrap();

        let before = engine
            .get_requirement_deltas_by_bubble(alice, &usdc())
            .unwrap();
        prop_assert!(before.maintenance.is_negative());
        prop_assert!(before.liquidation.is_positive());

        engine
            .submit_liquidation_bid(
                &Address::new("0xtrader2"),
                alice,
                LiquidationBid {
                    liquidator: bob,
                    orders: vec![(MARKET, encode_ratio(close_ratio))],
                    quote_token: usdc(),
                    hook: None,
                    reward_parameter: reward,
                    keeper: None,
                },
            )
            .unwrap();

        let outcome = engine
            .execute_top_ranked_liquidation_bid(alice, &usdc())
            .unwrap();
        prop_assert!(outcome.executed, "attempt failed: {:?}", outcome.failure);

        let after = engine
            .get_requirement_deltas_by_bubble(alice, &usdc())
            .unwrap();
        prop_assert!(
            after.liquidation >= before.liquidation,
            "LM delta worsened: {} -> {}",
            before.liquidation,
            after.liquidation
        );

        // penalty conservation, straight from the audit trail
        let distributed = engine
            .events()
            .iter()
            .find_map(|event| match &event.payload {
                EventPayload::PenaltyDistributed(e) => Some(e.clone()),
                _ => None,
            })
            .expect("penalty distribution event");
        let reassembled = distributed
            .insurance_fund
            .add(distributed.backstop_lp)
            .add(distributed.keeper)
            .add(distributed.liquidator);
        prop_assert_eq!(reassembled, distributed.penalty);
    }

    /// Rebasing yield only ever raises the asset value of held shares, and the
    /// margin view follows.
    #[test]
    fn rebase_accrual_raises_margin(
        deposit in (1_000i64..500_000i64).prop_map(|x| Decimal::new(x, 2)),
        rate_bump in (1i64..100i64).prop_map(|x| Decimal::ONE + Decimal::new(x, 3)),
    ) {
        let (mut engine, _market) = setup();
        let alice = trader(&mut engine, 1, dec!(0));
        engine.deposit(alice, &susdc(), Quote::new(deposit)).unwrap();

        let before = engine.get_margin_info_by_bubble(alice, &usdc()).unwrap();
        engine.set_adapter_rate(&susdc(), rate_bump).unwrap();
        let after = engine.get_margin_info_by_bubble(alice, &usdc()).unwrap();

        prop_assert!(after.real_balance >= before.real_balance);
        prop_assert!(after.deltas.initial >= before.deltas.initial);
    }
}
