//! Matching engine - Price-time priority books and trade settlement

mod matching;
mod settlement;

pub use matching::{MatchingEngine, SubmitOutcome};
pub use settlement::{Settlement, TradeRecorder};
