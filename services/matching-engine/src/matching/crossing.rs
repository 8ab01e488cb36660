//! Crossing detection logic
//!
//! Determines whether a taker may trade against a maker's price

use types::numeric::Price;
use types::order::{OrderType, Side};

use crate::book::BookOrder;

/// Check if a bid and ask can match at given prices
pub fn can_match(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Whether `taker` crosses a resting order priced at `maker_price`.
///
/// Market takers accept any price.
pub fn taker_crosses(taker: &BookOrder, maker_price: Price) -> bool {
    match (taker.order_type, taker.side) {
        (OrderType::Market, _) => true,
        (OrderType::Limit, Side::Buy) => can_match(taker.price, maker_price),
        (OrderType::Limit, Side::Sell) => can_match(maker_price, taker.price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::ids::OrderId;
    use types::numeric::Quantity;

    fn taker(order_type: OrderType, side: Side, price: u64) -> BookOrder {
        BookOrder {
            order_id: OrderId::new(1),
            size: Quantity::from_u64(1),
            funds: Decimal::ZERO,
            price: Price::from_u64(price),
            side,
            order_type,
        }
    }

    #[test]
    fn test_can_match_exact() {
        let price = Price::from_u64(50000);
        assert!(can_match(price, price), "Equal prices should match");
        assert!(!can_match(Price::from_u64(49000), Price::from_u64(50000)));
    }

    #[test]
    fn test_limit_buy_crosses_lower_ask() {
        let buy = taker(OrderType::Limit, Side::Buy, 50000);
        assert!(taker_crosses(&buy, Price::from_u64(49000)));
        assert!(taker_crosses(&buy, Price::from_u64(50000)));
        assert!(!taker_crosses(&buy, Price::from_u64(50001)));
    }

    #[test]
    fn test_limit_sell_crosses_higher_bid() {
        let sell = taker(OrderType::Limit, Side::Sell, 49000);
        assert!(taker_crosses(&sell, Price::from_u64(50000)));
        assert!(!taker_crosses(&sell, Price::from_u64(48999)));
    }

    #[test]
    fn test_market_crosses_any_price() {
        let buy = taker(OrderType::Market, Side::Buy, 0);
        let sell = taker(OrderType::Market, Side::Sell, 0);
        assert!(taker_crosses(&buy, Price::from_u64(1_000_000)));
        assert!(taker_crosses(&sell, Price::from_u64(1)));
    }
}
