//! Matching logic module
//!
//! Price crossing rules and sequenced log construction

pub mod crossing;
pub mod executor;

pub use crossing::{can_match, taker_crosses};
pub use executor::MatchExecutor;
