//! Clearing Core Simulation.
//!
//! Walks the full liquidation ladder: deposits and margin views, ranked bid
//! auction, dutch liquidation, backstop liquidation with ADL, and auto-exchange.

use clearing_core::*;
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

fn main() {
    env_logger::init();

    println!("Clearing Core Simulation");
    println!("Cross-Collateral Margin, Multi-Tier Liquidation\n");

    scenario_1_margin_views();
    scenario_2_ranked_auction();
    scenario_3_dutch_liquidation();
    scenario_4_backstop_and_adl();
    scenario_5_auto_exchange();

    println!("\nAll simulations completed successfully.");
}

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
    engine.deposit(INSURANCE, &usdc(), Quote::new(dec!(1_000_000))).unwrap();
    engine.deposit(BACKSTOP, &usdc(), Quote::new(dec!(1_000_000))).unwrap();

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
    engine.deposit(account, &usdc(), Quote::new(deposit)).unwrap();
    account
}

/// Deposit, open a position, inspect the margin ladder.
fn scenario_1_margin_views() {
    println!("Scenario 1: Margin Views Across the Bubble\n");

    let (mut engine, market) = setup();
    let alice = trader(&mut engine, 1, dec!(1000));

    // 1000 notional at risk parameter 0.1: lmr 100, im requirement 200
    market.set_position(alice, SimPosition::taker(dec!(1000), Quote::zero()));
    engine.set_account_active_in_market(alice, MARKET).unwrap();

    let info = engine.get_margin_info_by_bubble(alice, &usdc()).unwrap();
    println!("  real balance:      {}", info.real_balance);
    println!("  margin balance:    {}", info.margin_balance);
    println!("  initial delta:     {}", info.deltas.initial);
    println!("  maintenance delta: {}", info.deltas.maintenance);
    println!("  liquidation delta: {}", info.deltas.liquidation);
    assert_eq!(info.deltas.initial.value(), dec!(800.0));

    let withdrawable = engine
        .get_account_withdrawable_collateral_balance(alice, &usdc())
        .unwrap();
    println!("  withdrawable:      {withdrawable}\n");
}

/// Breach MMR, stake bids, execute the top-ranked one.
fn scenario_2_ranked_auction() {
    println!("Scenario 2: Ranked Bid Auction\n");

    let (mut engine, market) = setup();
    let alice = trader(&mut engine, 1, dec!(1200));
    let bob = trader(&mut engine, 2, dec!(50_000));
    let carol = trader(&mut engine, 3, dec!(50_000));

    market.set_position(alice, SimPosition::taker(dec!(10_000), Quote::zero()));
    engine.set_account_active_in_market(alice, MARKET).unwrap();

    // margin balance 1200 against lmr 1000: below MMR (1500), above LM
    for (liquidator, reward) in [(bob, dec!(0.3)), (carol, dec!(0.2))] {
        let owner = engine.get_account(liquidator).unwrap().owner.clone();
        let submission = engine
            .submit_liquidation_bid(
                &owner,
                alice,
                LiquidationBid {
                    liquidator,
                    orders: vec![(MARKET, encode_ratio(dec!(0.5)))],
                    quote_token: usdc(),
                    hook: None,
                    reward_parameter: reward,
                    keeper: None,
                },
            )
            .unwrap();
        println!(
            "  bid {:?} staked by account {:?} in queue {}",
            submission.bid_id, liquidator, submission.queue_id
        );
    }

    let outcome = engine
        .execute_top_ranked_liquidation_bid(alice, &usdc())
        .unwrap();
    println!(
        "  executed bid {:?}: liquidator {:?}, penalty {}\n",
        outcome.bid_id, outcome.liquidator, outcome.penalty
    );
    // carol's cheaper bid wins
    assert_eq!(outcome.liquidator, carol);
    assert!(outcome.executed);
}

/// Let health decay and run the dutch path.
fn scenario_3_dutch_liquidation() {
    println!("Scenario 3: Dutch Liquidation\n");

    let (mut engine, market) = setup();
    let alice = trader(&mut engine, 1, dec!(1200));
    let bob = trader(&mut engine, 2, dec!(50_000));

    // losses drag margin balance to 600 against lmr 1000
    market.set_position(alice, SimPosition::taker(dec!(10_000), Quote::new(dec!(-600))));
    engine.set_account_active_in_market(alice, MARKET).unwrap();

    let owner = engine.get_account(bob).unwrap().owner.clone();
    let outcome = engine
        .execute_dutch_liquidation(&owner, alice, bob, MARKET, &encode_ratio(dec!(1)))
        .unwrap();
    println!("  health:            {}", outcome.health);
    println!("  penalty parameter: {}", outcome.penalty_parameter);
    println!("  penalty:           {}\n", outcome.penalty);
    assert_eq!(outcome.penalty_parameter, dec!(0.25));
}

/// Insolvent account: insurance underwrites, ADL unwinds.
fn scenario_4_backstop_and_adl() {
    println!("Scenario 4: Backstop Liquidation\n");

    let (mut engine, market) = setup();
    let alice = trader(&mut engine, 1, dec!(100));

    // margin balance -500: insolvent, below every threshold
    market.set_position(alice, SimPosition::taker(dec!(10_000), Quote::new(dec!(-600))));
    engine.set_account_active_in_market(alice, MARKET).unwrap();

    let outcome = engine
        .execute_backstop_liquidation(alice, &usdc(), &[], None)
        .unwrap();
    println!("  path:                   {:?}", outcome.path);
    println!("  insurance contribution: {}", outcome.insurance_contribution);

    let balance = engine.get_collateral_balance(alice, &usdc()).unwrap();
    println!("  final balance:          {balance}\n");
    assert_eq!(outcome.path, BackstopPath::InsolventInsuranceCovered);
    assert!(market.position_count(alice) == 0);
}

/// Negative quote balance covered by wrapped collateral.
fn scenario_5_auto_exchange() {
    println!("Scenario 5: Auto-Exchange\n");

    let (mut engine, market) = setup();
    let alice = trader(&mut engine, 1, dec!(2000));
    let keeper = trader(&mut engine, 2, dec!(50_000));

    engine.deposit(alice, &susdc(), Quote::new(dec!(3000))).unwrap();

    // a deep unrealized loss leaves the quote token under-margined
    market.set_position(alice, SimPosition::taker(dec!(10_000), Quote::new(dec!(-2400))));
    engine.set_account_active_in_market(alice, MARKET).unwrap();

    let eligible = engine.is_eligible_for_auto_exchange(alice, &usdc()).unwrap();
    println!("  eligible: {eligible}");
    assert!(eligible);

    let amounts = engine
        .get_max_amount_to_exchange_quote(alice, &susdc(), &usdc())
        .unwrap();
    println!(
        "  max exchange: {} USDC against {} sUSDC",
        amounts.auto_exchanged_amount, amounts.covering_amount
    );

    let outcome = engine
        .execute_auto_exchange(keeper, alice, &susdc(), &usdc())
        .unwrap();
    println!(
        "  executed: {} USDC delivered, {} sUSDC received\n",
        outcome.auto_exchanged_amount, outcome.covering_amount
    );
}
