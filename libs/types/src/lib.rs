//! Types library for the order matching core
//!
//! Core type definitions shared by the matching engine, its persistence
//! adapters and the service binary.
//!
//! # Modules
//! - `ids`: Identifiers (OrderId, TradeId, ProductId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Order commands and their enums
//! - `product`: Trading pair configuration
//! - `errors`: Error taxonomy

pub mod errors;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod product;
