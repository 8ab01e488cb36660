//! Order book infrastructure module
//!
//! Contains price levels, the per-side depth and the product order book.

pub mod depth;
pub mod order_book;
pub mod price_level;

pub use depth::Depth;
pub use order_book::{BookLevels, OrderBook};
pub use price_level::PriceLevel;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::OrderId;
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderType, Side};

/// An order as held by the book: the taker while matching, a maker while
/// resting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookOrder {
    pub order_id: OrderId,
    /// Remaining base size.
    pub size: Quantity,
    /// Remaining quote funds (market buys only).
    pub funds: Decimal,
    pub price: Price,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
}

impl From<&Order> for BookOrder {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            size: order.size,
            funds: order.funds,
            price: order.price,
            side: order.side,
            order_type: order.order_type,
        }
    }
}
