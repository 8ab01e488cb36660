//! Log construction and sequencing
//!
//! The executor owns a product's trade and log sequences. Every log it
//! builds takes the next log sequence, so emission order is sequence order.

use chrono::Utc;
use types::ids::{OrderId, ProductId, TradeId};
use types::numeric::{Price, Quantity};
use types::order::{DoneReason, Side};

use crate::book::BookOrder;
use crate::events::{DoneLog, Log, MatchLog, OpenLog};

/// Issues sequenced logs for one product.
#[derive(Debug, Clone)]
pub struct MatchExecutor {
    product_id: ProductId,
    trade_seq: u64,
    log_seq: u64,
}

impl MatchExecutor {
    /// Continue after the given last-issued sequences (0 for a fresh book).
    pub fn new(product_id: ProductId, trade_seq: u64, log_seq: u64) -> Self {
        Self {
            product_id,
            trade_seq,
            log_seq,
        }
    }

    /// Last issued trade sequence.
    pub fn trade_seq(&self) -> u64 {
        self.trade_seq
    }

    /// Last issued log sequence.
    pub fn log_seq(&self) -> u64 {
        self.log_seq
    }

    fn next_log_seq(&mut self) -> u64 {
        self.log_seq += 1;
        self.log_seq
    }

    fn next_trade_seq(&mut self) -> u64 {
        self.trade_seq += 1;
        self.trade_seq
    }

    pub fn open(&mut self, order: &BookOrder) -> Log {
        Log::Open(OpenLog {
            sequence: self.next_log_seq(),
            product_id: self.product_id.clone(),
            time: Utc::now(),
            order_id: order.order_id,
            remaining_size: order.size,
            price: order.price,
            side: order.side,
        })
    }

    /// Trade at the maker's price.
    pub fn matched(&mut self, taker: &BookOrder, maker: &BookOrder, size: Quantity) -> Log {
        Log::Match(MatchLog {
            sequence: self.next_log_seq(),
            product_id: self.product_id.clone(),
            time: Utc::now(),
            trade_id: TradeId::new(self.next_trade_seq()),
            taker_order_id: taker.order_id,
            maker_order_id: maker.order_id,
            side: maker.side,
            price: maker.price,
            size,
        })
    }

    pub fn done(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        remaining_size: Quantity,
        reason: DoneReason,
    ) -> Log {
        Log::Done(DoneLog {
            sequence: self.next_log_seq(),
            product_id: self.product_id.clone(),
            time: Utc::now(),
            order_id,
            price,
            remaining_size,
            reason,
            side,
        })
    }
}
