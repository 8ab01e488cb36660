//! Persisted engine state

use serde::{Deserialize, Serialize};
use types::ids::ProductId;

use crate::book::BookOrder;
use crate::window::Window;

/// Everything needed to rebuild an [`OrderBook`](crate::book::OrderBook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub product_id: ProductId,
    /// Asks then bids, each in price-time priority.
    pub orders: Vec<BookOrder>,
    pub trade_seq: u64,
    pub log_seq: u64,
    pub order_id_window: Window,
}

/// Book state tagged with the offset of the last order applied to it.
///
/// Only stored once every log up to `order_book.log_seq` is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub order_book: BookSnapshot,
    pub order_offset: u64,
}

impl Snapshot {
    pub fn log_seq(&self) -> u64 {
        self.order_book.log_seq
    }

    pub fn product_id(&self) -> &ProductId {
        &self.order_book.product_id
    }
}
