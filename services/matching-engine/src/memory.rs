//! In-process implementations of the engine ports
//!
//! Used by tests and by single-process deployments that do not need
//! durability. Handles are cheap clones sharing the same state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use types::order::Order;

use crate::error::StoreError;
use crate::events::Log;
use crate::snapshot::Snapshot;
use crate::store::{LogStore, OrderReader, SnapshotStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Consumes one injected failure, if any are left.
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

#[derive(Default)]
struct OrderLogInner {
    orders: Mutex<Vec<Order>>,
    closed: AtomicBool,
    appended: Notify,
    fetch_failures: AtomicU32,
}

/// Append-only order topic; offsets are positions in the log.
#[derive(Clone, Default)]
pub struct MemoryOrderLog {
    inner: Arc<OrderLogInner>,
}

impl MemoryOrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an order and return its offset.
    pub fn push(&self, order: Order) -> u64 {
        let offset = {
            let mut orders = lock(&self.inner.orders);
            orders.push(order);
            orders.len() as u64 - 1
        };
        self.inner.appended.notify_waiters();
        offset
    }

    /// Readers return [`StoreError::Closed`] once past the last order.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }

    /// Fail the next `count` fetches with a retryable error; `u32::MAX`
    /// fails forever.
    pub fn fail_next_fetches(&self, count: u32) {
        self.inner.fetch_failures.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.orders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reader(&self) -> MemoryOrderReader {
        MemoryOrderReader {
            log: self.clone(),
            next: 0,
        }
    }
}

pub struct MemoryOrderReader {
    log: MemoryOrderLog,
    next: u64,
}

#[async_trait]
impl OrderReader for MemoryOrderReader {
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError> {
        self.next = offset;
        Ok(())
    }

    async fn fetch_order(&mut self) -> Result<(u64, Order), StoreError> {
        if take_failure(&self.log.inner.fetch_failures) {
            return Err(StoreError::Unavailable("injected order fetch failure".into()));
        }
        loop {
            let appended = self.log.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let next = lock(&self.log.inner.orders).get(self.next as usize).cloned();
            if let Some(order) = next {
                let offset = self.next;
                self.next += 1;
                return Ok((offset, order));
            }
            if self.log.inner.closed.load(Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }
            appended.await;
        }
    }
}

#[derive(Default)]
struct LogStoreInner {
    logs: Mutex<Vec<Log>>,
    failures: AtomicU32,
    calls: AtomicU32,
}

/// Log store that keeps committed logs in memory.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<LogStoreInner>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` store calls; `u32::MAX` fails forever.
    pub fn fail_next(&self, count: u32) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    pub fn logs(&self) -> Vec<Log> {
        lock(&self.inner.logs).clone()
    }

    pub fn last_sequence(&self) -> u64 {
        lock(&self.inner.logs).last().map(Log::sequence).unwrap_or(0)
    }

    /// Number of `store` calls, failed ones included.
    pub fn store_calls(&self) -> u32 {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn store(&mut self, logs: &[Log]) -> Result<(), StoreError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.failures) {
            return Err(StoreError::Unavailable("injected log store failure".into()));
        }

        let mut stored = lock(&self.inner.logs);
        let mut last = stored.last().map(Log::sequence).unwrap_or(0);
        let mut fresh = Vec::with_capacity(logs.len());
        for log in logs {
            if log.sequence() <= last {
                continue;
            }
            if last > 0 && log.sequence() != last + 1 {
                return Err(StoreError::SequenceGap {
                    expected: last + 1,
                    got: log.sequence(),
                });
            }
            last = log.sequence();
            fresh.push(log.clone());
        }
        stored.extend(fresh);
        Ok(())
    }
}

#[derive(Default)]
struct SnapshotStoreInner {
    snapshots: Mutex<Vec<Snapshot>>,
    store_failures: AtomicU32,
    load_failures: AtomicU32,
}

/// Snapshot store keeping every stored snapshot, newest last.
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<SnapshotStoreInner>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_stores(&self, count: u32) {
        self.inner.store_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_loads(&self, count: u32) {
        self.inner.load_failures.store(count, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        lock(&self.inner.snapshots).clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn store(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if take_failure(&self.inner.store_failures) {
            return Err(StoreError::Unavailable("injected snapshot store failure".into()));
        }
        lock(&self.inner.snapshots).push(snapshot.clone());
        Ok(())
    }

    async fn get_latest(&self) -> Result<Option<Snapshot>, StoreError> {
        if take_failure(&self.inner.load_failures) {
            return Err(StoreError::Unavailable("injected snapshot load failure".into()));
        }
        Ok(lock(&self.inner.snapshots).last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use types::ids::{OrderId, ProductId};
    use types::numeric::{Price, Quantity};
    use types::order::{DoneReason, Side};

    use crate::events::DoneLog;

    fn order(id: u64) -> Order {
        Order::limit(id, ProductId::new("BTC-USDT"), Side::Buy, Price::from_u64(10), Quantity::from_u64(1))
    }

    fn log(sequence: u64) -> Log {
        Log::Done(DoneLog {
            sequence,
            product_id: ProductId::new("BTC-USDT"),
            time: Utc::now(),
            order_id: OrderId::new(sequence),
            price: Price::from_u64(10),
            remaining_size: Quantity::zero(),
            reason: DoneReason::Filled,
            side: Side::Buy,
        })
    }

    #[tokio::test]
    async fn test_reader_waits_for_orders() {
        let topic = MemoryOrderLog::new();
        let mut reader = topic.reader();

        let producer = topic.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.push(order(1));
        });

        let (offset, fetched) = reader.fetch_order().await.unwrap();
        assert_eq!(offset, 0);
        assert_eq!(fetched.id, OrderId::new(1));
    }

    #[tokio::test]
    async fn test_reader_set_offset_and_close() {
        let topic = MemoryOrderLog::new();
        for id in 1..=3 {
            topic.push(order(id));
        }
        topic.close();

        let mut reader = topic.reader();
        reader.set_offset(2).await.unwrap();
        assert_eq!(reader.fetch_order().await.unwrap().0, 2);
        assert!(matches!(reader.fetch_order().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_log_store_skips_already_stored() {
        let mut store = MemoryLogStore::new();
        store.store(&[log(1), log(2)]).await.unwrap();
        store.store(&[log(2), log(3)]).await.unwrap();

        let seqs: Vec<u64> = store.logs().iter().map(Log::sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(matches!(
            store.store(&[log(5)]).await,
            Err(StoreError::SequenceGap { expected: 4, got: 5 })
        ));
    }

    #[tokio::test]
    async fn test_gap_in_batch_stores_nothing() {
        let mut store = MemoryLogStore::new();
        store.store(&[log(1)]).await.unwrap();
        assert!(matches!(
            store.store(&[log(2), log(3), log(5)]).await,
            Err(StoreError::SequenceGap { expected: 4, got: 5 })
        ));
        assert_eq!(store.last_sequence(), 1);
    }

    #[tokio::test]
    async fn test_injected_fetch_failures_do_not_skip_orders() {
        let topic = MemoryOrderLog::new();
        topic.push(order(1));
        topic.fail_next_fetches(1);

        let mut reader = topic.reader();
        assert!(matches!(reader.fetch_order().await, Err(StoreError::Unavailable(_))));
        assert_eq!(reader.fetch_order().await.unwrap().0, 0);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let mut store = MemoryLogStore::new();
        store.fail_next(2);
        assert!(store.store(&[log(1)]).await.is_err());
        assert!(store.store(&[log(1)]).await.is_err());
        assert!(store.store(&[log(1)]).await.is_ok());
        assert_eq!(store.store_calls(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_store_latest() {
        let store = MemorySnapshotStore::new();
        assert!(store.get_latest().await.unwrap().is_none());
        store.fail_next_loads(1);
        assert!(store.get_latest().await.is_err());
    }
}
