//! One side of a product's order book
//!
//! Price levels live in a `BTreeMap` for deterministic iteration. Asks are
//! consumed from the lowest price, bids from the highest; within a level by
//! ascending order id. An id index gives O(1) lookup for cancels.

use std::collections::{BTreeMap, HashMap};
use types::errors::BookError;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};
use types::order::Side;

use super::price_level::PriceLevel;
use super::BookOrder;

/// Resting orders on one side of the book.
#[derive(Debug, Clone)]
pub struct Depth {
    side: Side,
    levels: BTreeMap<Price, PriceLevel>,
    orders: HashMap<OrderId, BookOrder>,
}

impl Depth {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            orders: HashMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Rest an order on this side.
    pub fn add(&mut self, order: BookOrder) -> Result<(), BookError> {
        if order.side != self.side {
            return Err(BookError::InvariantViolation(format!(
                "order {} is {:?} but depth is {:?}",
                order.order_id, order.side, self.side
            )));
        }
        if self.orders.contains_key(&order.order_id) {
            return Err(BookError::InvariantViolation(format!(
                "order {} already resting",
                order.order_id
            )));
        }

        self.levels
            .entry(order.price)
            .or_default()
            .insert(order.order_id, order.size);
        self.orders.insert(order.order_id, order);
        Ok(())
    }

    /// Take `size` off a resting order, removing it once nothing is left.
    ///
    /// Returns the order's remaining size.
    pub fn decr_size(&mut self, order_id: OrderId, size: Quantity) -> Result<Quantity, BookError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(BookError::NotFound { order_id: order_id.value() })?;

        let remaining = order.size.checked_sub(size).ok_or_else(|| {
            BookError::InvariantViolation(format!(
                "order {} has {} left, cannot take {}",
                order_id, order.size, size
            ))
        })?;
        order.size = remaining;
        let price = order.price;

        let level = self.levels.get_mut(&price).ok_or_else(|| {
            BookError::InvariantViolation(format!("no level at {} for order {}", price, order_id))
        })?;

        if remaining.is_zero() {
            self.orders.remove(&order_id);
            level.remove(order_id, size);
            if level.is_empty() {
                self.levels.remove(&price);
            }
        } else {
            level.reduce(size);
        }
        Ok(remaining)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&BookOrder> {
        self.orders.get(&order_id)
    }

    /// Head of the queue: the order with price-time priority.
    pub fn best(&self) -> Option<&BookOrder> {
        self.levels_by_priority()
            .next()
            .and_then(|(_, level)| level.front())
            .and_then(|id| self.orders.get(&id))
    }

    pub fn best_price(&self) -> Option<Price> {
        self.levels_by_priority().next().map(|(price, _)| *price)
    }

    /// Aggregated `(price, total size)` of the best `limit` levels.
    pub fn levels(&self, limit: usize) -> Vec<(Price, Quantity)> {
        self.levels_by_priority()
            .take(limit)
            .map(|(price, level)| (*price, level.total_size()))
            .collect()
    }

    /// Every resting order, in matching order.
    pub fn orders(&self) -> impl Iterator<Item = &BookOrder> + '_ {
        self.levels_by_priority()
            .flat_map(|(_, level)| level.iter())
            .filter_map(|id| self.orders.get(id))
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn levels_by_priority(&self) -> Box<dyn Iterator<Item = (&Price, &PriceLevel)> + '_> {
        match self.side {
            Side::Sell => Box::new(self.levels.iter()),
            Side::Buy => Box::new(self.levels.iter().rev()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::order::OrderType;

    fn resting(id: u64, side: Side, price: u64, size: &str) -> BookOrder {
        BookOrder {
            order_id: OrderId::new(id),
            size: Quantity::from_str(size).unwrap(),
            funds: Decimal::ZERO,
            price: Price::from_u64(price),
            side,
            order_type: OrderType::Limit,
        }
    }

    #[test]
    fn test_ask_depth_best_is_lowest() {
        let mut asks = Depth::new(Side::Sell);
        asks.add(resting(1, Side::Sell, 50000, "1.0")).unwrap();
        asks.add(resting(2, Side::Sell, 51000, "2.0")).unwrap();
        asks.add(resting(3, Side::Sell, 49000, "1.5")).unwrap();

        assert_eq!(asks.best_price(), Some(Price::from_u64(49000)));
        assert_eq!(asks.best().unwrap().order_id, OrderId::new(3));
    }

    #[test]
    fn test_bid_depth_best_is_highest() {
        let mut bids = Depth::new(Side::Buy);
        bids.add(resting(1, Side::Buy, 50000, "1.0")).unwrap();
        bids.add(resting(2, Side::Buy, 51000, "2.0")).unwrap();
        bids.add(resting(3, Side::Buy, 51000, "1.0")).unwrap();

        assert_eq!(bids.best().unwrap().order_id, OrderId::new(2));
        assert_eq!(
            bids.levels(5),
            vec![
                (Price::from_u64(51000), Quantity::from_str("3.0").unwrap()),
                (Price::from_u64(50000), Quantity::from_str("1.0").unwrap()),
            ]
        );
    }

    #[test]
    fn test_decr_size_partial_then_full() {
        let mut asks = Depth::new(Side::Sell);
        asks.add(resting(1, Side::Sell, 100, "5")).unwrap();

        let left = asks.decr_size(OrderId::new(1), Quantity::from_u64(2)).unwrap();
        assert_eq!(left, Quantity::from_u64(3));
        assert_eq!(asks.levels(1)[0].1, Quantity::from_u64(3));

        let left = asks.decr_size(OrderId::new(1), Quantity::from_u64(3)).unwrap();
        assert!(left.is_zero());
        assert!(asks.is_empty());
        assert!(asks.levels(usize::MAX).is_empty());
    }

    #[test]
    fn test_decr_size_below_zero_is_invariant_violation() {
        let mut asks = Depth::new(Side::Sell);
        asks.add(resting(1, Side::Sell, 100, "1")).unwrap();
        let err = asks.decr_size(OrderId::new(1), Quantity::from_u64(2)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(asks.get(OrderId::new(1)).unwrap().size, Quantity::from_u64(1));
    }

    #[test]
    fn test_decr_size_unknown_order() {
        let mut bids = Depth::new(Side::Buy);
        assert_eq!(
            bids.decr_size(OrderId::new(9), Quantity::from_u64(1)),
            Err(BookError::NotFound { order_id: 9 })
        );
    }

    #[test]
    fn test_rejects_wrong_side_and_duplicates() {
        let mut bids = Depth::new(Side::Buy);
        assert!(bids.add(resting(1, Side::Sell, 100, "1")).is_err());
        bids.add(resting(2, Side::Buy, 100, "1")).unwrap();
        assert!(bids.add(resting(2, Side::Buy, 101, "1")).is_err());
    }

    #[test]
    fn test_orders_iterate_in_priority() {
        let mut bids = Depth::new(Side::Buy);
        bids.add(resting(4, Side::Buy, 99, "1")).unwrap();
        bids.add(resting(2, Side::Buy, 100, "1")).unwrap();
        bids.add(resting(3, Side::Buy, 100, "1")).unwrap();
        bids.add(resting(1, Side::Buy, 98, "1")).unwrap();

        let ids: Vec<u64> = bids.orders().map(|o| o.order_id.value()).collect();
        assert_eq!(ids, vec![2, 3, 4, 1]);
    }
}
