//! Matching Engine Service
//!
//! Per-product limit order book with price-time priority matching, an
//! order id dedup window, and a fetch → apply → commit → snapshot pipeline
//! that restarts from its latest committed snapshot.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced
//! - Deterministic matching (same orders in, same logs out)
//! - Log sequences are gapless per product
//! - A snapshot is stored only after every log it covers is committed

pub mod book;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod matching;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod window;

pub use book::OrderBook;
pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, StoreError};
pub use events::{DoneLog, Log, LogObserver, MatchLog, OpenLog};
pub use snapshot::{BookSnapshot, Snapshot};
pub use store::{LogStore, OrderReader, SnapshotStore};
pub use window::Window;
