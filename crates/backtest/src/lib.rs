//! Simulated exchange for tick-level backtesting.
//!
//! This crate provides:
//! - Tick playback loop with crossday settlement
//! - Queue-position estimation from published depth
//! - Matching for limit, market, FAK and FOK orders
//! - Position and margin ledger with freeze/thaw
//! - Per-contract order statistics

pub mod context;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod queue;
pub mod simulator;
pub mod statistics;

pub use context::{EventHandler, TradingContext};
pub use events::{ExchangeEvent, RejectKind};
pub use ledger::{DealOutcome, Ledger};
pub use matching::{MatchState, MatchingEngine, WorkingOrder, WorkingOrders};
pub use simulator::{LiquidationHook, NoLiquidation, PlayState, TickSimulator};
pub use statistics::{DailyFlow, OrderStatistics, StatisticsRecorder};
