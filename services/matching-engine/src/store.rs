//! Ports between a product engine and its transports

use async_trait::async_trait;
use types::order::Order;

use crate::error::StoreError;
use crate::events::Log;
use crate::snapshot::Snapshot;

/// Ordered, replayable stream of a product's orders.
#[async_trait]
pub trait OrderReader: Send {
    /// Position the reader so the next fetch returns the order at `offset`.
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError>;

    /// Wait for the next order and return it with its offset.
    async fn fetch_order(&mut self) -> Result<(u64, Order), StoreError>;
}

/// Durable sink for a product's logs.
///
/// A batch is written entirely and in order, or not at all. Logs whose
/// sequence is already stored are skipped.
#[async_trait]
pub trait LogStore: Send {
    async fn store(&mut self, logs: &[Log]) -> Result<(), StoreError>;
}

/// Durable home of a product's latest snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn store(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    async fn get_latest(&self) -> Result<Option<Snapshot>, StoreError>;
}
