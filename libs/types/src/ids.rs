//! Identifier types for exchange entities
//!
//! Order ids are issued upstream in strictly increasing order, so they double
//! as the arrival-order tiebreaker inside a price level. Trade ids are the
//! per-product trade sequence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an order, monotonically issued upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(u64);

impl OrderId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-product trade sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(u64);

impl TradeId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product identifier (trading pair)
///
/// Format: "BASE-QUOTE" (e.g., "BTC-USDT"). Also used verbatim in
/// per-product topic and directory names, so it must be non-empty and
/// free of path separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Create a new ProductId.
    ///
    /// # Panics
    /// Panics if the id is empty or contains a path separator.
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(Self::is_valid(&s), "ProductId must be non-empty and contain no path separators");
        Self(s)
    }

    /// Try to create a ProductId, returning None if invalid
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        Self::is_valid(&s).then_some(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into base and quote currency codes, if dash-separated.
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once('-')
    }

    fn is_valid(s: &str) -> bool {
        !s.is_empty() && !s.contains(['/', '\\']) && s != "." && s != ".."
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_ordering() {
        assert!(OrderId::new(1) < OrderId::new(2));
        assert_eq!(OrderId::from(7).value(), 7);
    }

    #[test]
    fn test_order_id_serialization() {
        let id = OrderId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let deserialized: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_product_id_split() {
        let product = ProductId::new("BTC-USDT");
        assert_eq!(product.split(), Some(("BTC", "USDT")));
        assert_eq!(ProductId::new("SPOT").split(), None);
    }

    #[test]
    fn test_product_id_try_new() {
        assert!(ProductId::try_new("BTC-USDT").is_some());
        assert!(ProductId::try_new("").is_none());
        assert!(ProductId::try_new("../etc").is_none());
    }

    #[test]
    #[should_panic(expected = "ProductId must be non-empty")]
    fn test_product_id_invalid() {
        ProductId::new("");
    }

    #[test]
    fn test_product_id_serialization() {
        let product = ProductId::new("ETH-USDC");
        let json = serde_json::to_string(&product).unwrap();
        assert_eq!(json, "\"ETH-USDC\"");
    }
}
