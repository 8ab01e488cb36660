//! Matching log: the engine's only output
//!
//! Every state change of the book is described by exactly one [`Log`]. Logs
//! of a product carry a gapless, strictly increasing `sequence`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::ids::{OrderId, ProductId, TradeId};
use types::numeric::{Price, Quantity};
use types::order::{DoneReason, Side};

/// An order started resting on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLog {
    pub sequence: u64,
    pub product_id: ProductId,
    pub time: DateTime<Utc>,
    pub order_id: OrderId,
    pub remaining_size: Quantity,
    pub price: Price,
    pub side: Side,
}

/// A trade between a taker and a resting maker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchLog {
    pub sequence: u64,
    pub product_id: ProductId,
    pub time: DateTime<Utc>,
    pub trade_id: TradeId,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    /// The maker's side.
    pub side: Side,
    /// Always the maker's price.
    pub price: Price,
    pub size: Quantity,
}

/// An order left the book, or never made it there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneLog {
    pub sequence: u64,
    pub product_id: ProductId,
    pub time: DateTime<Utc>,
    pub order_id: OrderId,
    /// Zero for market orders.
    pub price: Price,
    pub remaining_size: Quantity,
    pub reason: DoneReason,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Log {
    Open(OpenLog),
    Match(MatchLog),
    Done(DoneLog),
}

impl Log {
    pub fn sequence(&self) -> u64 {
        match self {
            Log::Open(log) => log.sequence,
            Log::Match(log) => log.sequence,
            Log::Done(log) => log.sequence,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        match self {
            Log::Open(log) => &log.product_id,
            Log::Match(log) => &log.product_id,
            Log::Done(log) => &log.product_id,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Log::Open(log) => log.time,
            Log::Match(log) => log.time,
            Log::Done(log) => log.time,
        }
    }

    /// Short type tag, also used as the journal event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Log::Open(_) => "open",
            Log::Match(_) => "match",
            Log::Done(_) => "done",
        }
    }

    /// Hand this log to the observer callback for its variant.
    pub async fn dispatch<O: LogObserver + ?Sized>(&self, observer: &mut O, offset: u64) {
        match self {
            Log::Open(log) => observer.on_open_log(log, offset).await,
            Log::Match(log) => observer.on_match_log(log, offset).await,
            Log::Done(log) => observer.on_done_log(log, offset).await,
        }
    }
}

/// Downstream consumer of a product's committed log.
#[async_trait]
pub trait LogObserver: Send {
    async fn on_open_log(&mut self, log: &OpenLog, offset: u64);
    async fn on_match_log(&mut self, log: &MatchLog, offset: u64);
    async fn on_done_log(&mut self, log: &DoneLog, offset: u64);
}
