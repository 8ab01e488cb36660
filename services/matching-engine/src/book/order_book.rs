//! Per-product order book and matching
//!
//! Single-writer: only the apply stage of a product's engine touches it.

use std::cmp;

use tracing::{debug, warn};
use types::errors::BookError;
use types::numeric::{affordable_size, Price, Quantity};
use types::order::{DoneReason, Order, OrderType, Side};
use types::product::Product;

use super::{BookOrder, Depth};
use crate::events::Log;
use crate::matching::{taker_crosses, MatchExecutor};
use crate::snapshot::BookSnapshot;
use crate::window::Window;

/// Aggregated top-of-book view.
#[derive(Debug, Clone, PartialEq)]
pub struct BookLevels {
    pub bids: Vec<(Price, Quantity)>,
    pub asks: Vec<(Price, Quantity)>,
}

pub struct OrderBook {
    product: Product,
    bids: Depth,
    asks: Depth,
    executor: MatchExecutor,
    window: Window,
    window_capacity: u64,
}

impl OrderBook {
    pub fn new(product: Product, window_capacity: u64) -> Self {
        Self {
            executor: MatchExecutor::new(product.id.clone(), 0, 0),
            product,
            bids: Depth::new(Side::Buy),
            asks: Depth::new(Side::Sell),
            window: Window::with_capacity(window_capacity),
            window_capacity,
        }
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Last issued log sequence.
    pub fn log_seq(&self) -> u64 {
        self.executor.log_seq()
    }

    pub fn trade_seq(&self) -> u64 {
        self.executor.trade_seq()
    }

    /// Match `order` against the opposite side and rest or finish it.
    ///
    /// Orders rejected by the dedup window produce no logs.
    pub fn apply_order(&mut self, order: &Order) -> Result<Vec<Log>, BookError> {
        if let Err(err) = self.window.put(order.id.value()) {
            warn!(
                product = %self.product.id,
                order_id = %order.id,
                error = %err,
                "order rejected by dedup window"
            );
            return Ok(Vec::new());
        }

        let Self {
            product,
            bids,
            asks,
            executor,
            ..
        } = self;
        let (own, opposite) = match order.side {
            Side::Buy => (bids, asks),
            Side::Sell => (asks, bids),
        };

        let mut taker = BookOrder::from(order);
        let mut logs = Vec::new();

        while let Some(maker) = opposite.best().cloned() {
            if !taker_crosses(&taker, maker.price) {
                break;
            }

            let size = match (taker.order_type, taker.side) {
                (OrderType::Market, Side::Buy) => {
                    if taker.funds <= rust_decimal::Decimal::ZERO {
                        break;
                    }
                    let affordable = affordable_size(taker.funds, maker.price, product.base_scale);
                    if affordable.is_zero() {
                        break;
                    }
                    let size = cmp::min(affordable, maker.size);
                    taker.funds -= size.notional(maker.price);
                    size
                }
                _ => {
                    if taker.size.is_zero() {
                        break;
                    }
                    let size = cmp::min(taker.size, maker.size);
                    taker.size = taker.size - size;
                    size
                }
            };

            let remaining = opposite.decr_size(maker.order_id, size).map_err(|err| match err {
                BookError::NotFound { order_id } => {
                    BookError::InvariantViolation(format!("best maker {} missing from index", order_id))
                }
                fatal => fatal,
            })?;

            logs.push(executor.matched(&taker, &maker, size));
            if remaining.is_zero() {
                logs.push(executor.done(
                    maker.order_id,
                    maker.side,
                    maker.price,
                    Quantity::zero(),
                    DoneReason::Filled,
                ));
            }
        }

        if taker.order_type == OrderType::Limit && !taker.size.is_zero() {
            own.add(taker.clone())?;
            logs.push(executor.open(&taker));
        } else {
            let leftover = match (taker.order_type, taker.side) {
                (OrderType::Market, Side::Buy) => taker.funds > rust_decimal::Decimal::ZERO,
                (OrderType::Market, Side::Sell) => !taker.size.is_zero(),
                (OrderType::Limit, _) => false,
            };
            let reason = if leftover {
                DoneReason::Cancelled
            } else {
                DoneReason::Filled
            };
            let price = match taker.order_type {
                OrderType::Market => Price::zero(),
                OrderType::Limit => taker.price,
            };
            logs.push(executor.done(taker.order_id, taker.side, price, taker.size, reason));
        }

        Ok(logs)
    }

    /// Remove a resting order. Unknown orders produce no logs.
    ///
    /// The id is marked seen first, so an order whose cancel overtook it is
    /// later dropped as a duplicate.
    pub fn cancel_order(&mut self, order: &Order) -> Result<Vec<Log>, BookError> {
        let _ = self.window.put(order.id.value());

        let depth = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let Some(resting) = depth.get(order.id).cloned() else {
            debug!(product = %self.product.id, order_id = %order.id, "cancel for order not on book");
            return Ok(Vec::new());
        };

        depth.decr_size(resting.order_id, resting.size)?;
        Ok(vec![self.executor.done(
            resting.order_id,
            resting.side,
            resting.price,
            resting.size,
            DoneReason::Cancelled,
        )])
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            product_id: self.product.id.clone(),
            orders: self.asks.orders().chain(self.bids.orders()).cloned().collect(),
            trade_seq: self.executor.trade_seq(),
            log_seq: self.executor.log_seq(),
            order_id_window: self.window.clone(),
        }
    }

    /// Replace all book state with `snapshot`.
    pub fn restore(&mut self, snapshot: BookSnapshot) -> Result<(), BookError> {
        if snapshot.product_id != self.product.id {
            return Err(BookError::InvariantViolation(format!(
                "snapshot for {} restored into {}",
                snapshot.product_id, self.product.id
            )));
        }

        let mut bids = Depth::new(Side::Buy);
        let mut asks = Depth::new(Side::Sell);
        for order in snapshot.orders {
            match order.side {
                Side::Buy => bids.add(order)?,
                Side::Sell => asks.add(order)?,
            }
        }

        self.bids = bids;
        self.asks = asks;
        self.executor = MatchExecutor::new(self.product.id.clone(), snapshot.trade_seq, snapshot.log_seq);
        self.window = if snapshot.order_id_window.is_initialized() {
            snapshot.order_id_window
        } else {
            Window::with_capacity(self.window_capacity)
        };
        Ok(())
    }

    /// Top `limit` aggregated levels per side.
    pub fn depth(&self, limit: usize) -> BookLevels {
        BookLevels {
            bids: self.bids.levels(limit),
            asks: self.asks.levels(limit),
        }
    }

    pub fn bids(&self) -> &Depth {
        &self.bids
    }

    pub fn asks(&self) -> &Depth {
        &self.asks
    }
}
