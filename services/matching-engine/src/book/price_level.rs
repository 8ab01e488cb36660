//! Price level: the queue of resting orders at one price
//!
//! Orders are kept in ascending order-id order. Ids are issued in arrival
//! order, so this is the time priority within the level.

use std::collections::VecDeque;
use types::ids::OrderId;
use types::numeric::Quantity;

/// All resting orders at a single price, best (oldest) first.
#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    orders: VecDeque<OrderId>,
    total_size: Quantity,
}

impl PriceLevel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an order behind every order with a smaller id.
    ///
    /// Live orders always arrive with the largest id, so this is a push to
    /// the back except when rebuilding from an unordered source.
    pub fn insert(&mut self, order_id: OrderId, size: Quantity) {
        match self.orders.back() {
            Some(last) if *last > order_id => {
                let at = self.orders.partition_point(|id| *id < order_id);
                self.orders.insert(at, order_id);
            }
            _ => self.orders.push_back(order_id),
        }
        self.total_size = self.total_size + size;
    }

    /// Remove an order with the given remaining size. Returns false if absent.
    pub fn remove(&mut self, order_id: OrderId, size: Quantity) -> bool {
        match self.orders.iter().position(|id| *id == order_id) {
            Some(at) => {
                self.orders.remove(at);
                self.total_size = self.total_size - size;
                true
            }
            None => false,
        }
    }

    /// Account for `size` leaving an order that stays queued.
    pub fn reduce(&mut self, size: Quantity) {
        self.total_size = self.total_size - size;
    }

    pub fn front(&self) -> Option<OrderId> {
        self.orders.front().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderId> {
        self.orders.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_size(&self) -> Quantity {
        self.total_size
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(s: &str) -> Quantity {
        Quantity::from_str(s).unwrap()
    }

    #[test]
    fn test_price_level_fifo_order() {
        let mut level = PriceLevel::new();
        level.insert(OrderId::new(1), qty("1.0"));
        level.insert(OrderId::new(2), qty("2.0"));
        level.insert(OrderId::new(3), qty("3.0"));

        assert_eq!(level.front(), Some(OrderId::new(1)));
        assert_eq!(level.total_size(), qty("6.0"));
    }

    #[test]
    fn test_out_of_order_insert_keeps_id_order() {
        let mut level = PriceLevel::new();
        level.insert(OrderId::new(5), qty("1"));
        level.insert(OrderId::new(2), qty("1"));
        level.insert(OrderId::new(9), qty("1"));
        level.insert(OrderId::new(4), qty("1"));

        let ids: Vec<u64> = level.iter().map(|id| id.value()).collect();
        assert_eq!(ids, vec![2, 4, 5, 9]);
    }

    #[test]
    fn test_price_level_remove() {
        let mut level = PriceLevel::new();
        level.insert(OrderId::new(1), qty("1.0"));
        level.insert(OrderId::new(2), qty("2.0"));

        assert!(level.remove(OrderId::new(1), qty("1.0")));
        assert!(!level.remove(OrderId::new(1), qty("1.0")));
        assert_eq!(level.order_count(), 1);
        assert_eq!(level.total_size(), qty("2.0"));
    }

    #[test]
    fn test_reduce_keeps_order_queued() {
        let mut level = PriceLevel::new();
        level.insert(OrderId::new(1), qty("5.0"));
        level.reduce(qty("3.0"));
        assert_eq!(level.total_size(), qty("2.0"));
        assert_eq!(level.order_count(), 1);
    }
}
