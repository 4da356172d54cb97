//! spot-core - Core Library
//! In-process spot exchange: matching, risk and ledger

pub mod core;
pub mod catalog;
pub mod ledger;
pub mod orderbook;
pub mod position;
pub mod engine;
pub mod risk;
pub mod execution;
pub mod feeds;
pub mod notify;
pub mod store;

// Re-exports
pub use core::{Config, Error, Result};
pub use catalog::{TradingPair, TradingPairCatalog};
pub use engine::{MatchingEngine, SubmitOutcome, TradeRecorder};
pub use execution::{OrderLifecycleManager, Sweeper, SweeperHandle};
pub use feeds::MarkPriceBoard;
pub use ledger::AccountLedger;
pub use notify::{ChannelNotifier, LogNotifier};
pub use position::{Position, PositionTracker};
pub use risk::{Reservation, RiskEngine};
pub use store::MemoryStore;
