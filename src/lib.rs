// clearing-core: margined derivatives clearing engine.
// risk-first architecture: margin aggregation and liquidation take priority.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: AccountId, MarketId, Token, Quote, Shares
//   2.x  collateral.rs: share-based ledger, rebasing adapters
//   3.x  hooks.rs: pre/post liquidation callbacks
//   4.x  bubble.rs: collateral bubble graph, haircut conversions
//   5.x  exposure.rs: margin requirement aggregation (the algorithmic core)
//   6.x  liquidation.rs: health ratio, dutch curve, penalties
//   6.2  adl.rs: auto-deleveraging orders, bankruptcy sharing
//   6.5  queue.rs: ranked liquidation bid queues, generations
//   7.x  pool.rs: collateral pool risk parameters
//   8.x  engine/: engine: ledger, margin views, liquidation state machine
//   9.x  sim.rs: deterministic market stand-in (mocked)
//   10.x account.rs: accounts, permissions, active sets
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market manager trait, registry entries
//   13.x auto_exchange.rs: deficit detection and exchange math
//   14.x distribution.rs: penalty split across recipients

// core clearing modules
pub mod account;
pub mod bubble;
pub mod collateral;
pub mod engine;
pub mod events;
pub mod exposure;
pub mod market;
pub mod pool;
pub mod types;

// liquidation modules
pub mod adl;
pub mod auto_exchange;
pub mod distribution;
pub mod hooks;
pub mod liquidation;
pub mod queue;

// integration modules
pub mod sim;

// re exports for convenience
pub use account::*;
pub use adl::*;
pub use auto_exchange::*;
pub use bubble::*;
pub use collateral::*;
pub use distribution::*;
pub use engine::*;
pub use events::*;
pub use exposure::*;
pub use hooks::*;
pub use liquidation::*;
pub use market::*;
pub use pool::*;
pub use queue::*;
pub use sim::*;
pub use types::*;
