//! Trading pair configuration

use crate::ids::ProductId;
use crate::numeric::Quantity;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable trading-pair definition, read once at engine construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub base_currency: String,
    pub quote_currency: String,
    #[serde(default)]
    pub base_min_size: Quantity,
    #[serde(default)]
    pub base_max_size: Quantity,
    #[serde(default)]
    pub quote_min_size: Decimal,
    #[serde(default)]
    pub quote_max_size: Decimal,
    /// Decimal places of base-currency sizes; market-buy sizes truncate here.
    pub base_scale: u32,
    pub quote_scale: u32,
}

impl Product {
    /// Build a product named `BASE-QUOTE` with unbounded size limits.
    pub fn new(base: &str, quote: &str, base_scale: u32, quote_scale: u32) -> Self {
        Self {
            id: ProductId::new(format!("{}-{}", base, quote)),
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            base_min_size: Quantity::zero(),
            base_max_size: Quantity::zero(),
            quote_min_size: Decimal::ZERO,
            quote_max_size: Decimal::ZERO,
            base_scale,
            quote_scale,
        }
    }
}
