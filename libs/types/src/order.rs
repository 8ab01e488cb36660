//! Order command types
//!
//! An [`Order`] is the unit read from a product's order stream. The engine
//! only looks at `status` to tell a cancel request from a new order.

use crate::ids::{OrderId, ProductId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Rests at `price` once it stops crossing.
    Limit,
    /// Takes liquidity at any price; never rests.
    Market,
}

/// Lifecycle status as carried on the order stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Open,
    /// Cancel requested; turns the command into a cancel.
    Cancelling,
    Cancelled,
    Filled,
}

/// Why an order left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneReason {
    Filled,
    Cancelled,
}

/// Order command consumed by a product's engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub product_id: ProductId,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Base size; ignored for market buys.
    #[serde(default)]
    pub size: Quantity,
    /// Quote funds to spend; only used by market buys.
    #[serde(default)]
    pub funds: Decimal,
    /// Limit price; zero for market orders.
    #[serde(default)]
    pub price: Price,
    pub status: OrderStatus,
}

impl Order {
    pub fn limit(id: u64, product_id: ProductId, side: Side, price: Price, size: Quantity) -> Self {
        Self {
            id: OrderId::new(id),
            product_id,
            side,
            order_type: OrderType::Limit,
            size,
            funds: Decimal::ZERO,
            price,
            status: OrderStatus::New,
        }
    }

    pub fn market_sell(id: u64, product_id: ProductId, size: Quantity) -> Self {
        Self {
            id: OrderId::new(id),
            product_id,
            side: Side::Sell,
            order_type: OrderType::Market,
            size,
            funds: Decimal::ZERO,
            price: Price::zero(),
            status: OrderStatus::New,
        }
    }

    pub fn market_buy(id: u64, product_id: ProductId, funds: Decimal) -> Self {
        Self {
            id: OrderId::new(id),
            product_id,
            side: Side::Buy,
            order_type: OrderType::Market,
            size: Quantity::zero(),
            funds,
            price: Price::zero(),
            status: OrderStatus::New,
        }
    }

    /// Turn this order into a cancel request for itself.
    pub fn into_cancel(mut self) -> Self {
        self.status = OrderStatus::Cancelling;
        self
    }

    pub fn is_cancel(&self) -> bool {
        self.status == OrderStatus::Cancelling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_request() {
        let order = Order::limit(
            1,
            ProductId::new("BTC-USDT"),
            Side::Buy,
            Price::from_u64(100),
            Quantity::from_u64(1),
        );
        assert!(!order.is_cancel());
        assert!(order.into_cancel().is_cancel());
    }

    #[test]
    fn test_order_wire_format() {
        let json = r#"{
            "id": 9,
            "product_id": "BTC-USDT",
            "side": "buy",
            "type": "market",
            "funds": "250.5",
            "status": "new"
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.id, OrderId::new(9));
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.funds, Decimal::new(2505, 1));
        assert!(order.size.is_zero());
        assert!(order.price.is_zero());
    }

    #[test]
    fn test_negative_size_is_rejected_on_the_wire() {
        let json = r#"{
            "id": 2,
            "product_id": "BTC-USDT",
            "side": "buy",
            "type": "limit",
            "size": "-1",
            "price": "100",
            "status": "new"
        }"#;
        let err = serde_json::from_str::<Order>(json).unwrap_err();
        assert!(err.to_string().contains("Negative"), "{}", err);
    }

    #[test]
    fn test_order_serialization() {
        let order = Order::limit(
            3,
            ProductId::new("ETH-USDC"),
            Side::Sell,
            Price::from_str("3000.50").unwrap(),
            Quantity::from_str("2.5").unwrap(),
        );
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"type\":\"limit\""));
        let deserialized: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, deserialized);
    }
}
