//! Snapshot stage: periodic requests and storage of approved snapshots

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::applier::SnapshotRequest;
use crate::error::EngineError;
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

pub(crate) struct Snapshotter<S> {
    pub(crate) store: S,
    pub(crate) requests: mpsc::Sender<SnapshotRequest>,
    pub(crate) approved: mpsc::Receiver<Snapshot>,
    /// Offset of the last stored snapshot.
    pub(crate) baseline: Option<u64>,
    pub(crate) interval: Duration,
}

impl<S: SnapshotStore> Snapshotter<S> {
    pub(crate) async fn run(mut self) -> Result<(), EngineError> {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.request(),
                next = self.approved.recv() => match next {
                    Some(snapshot) => self.persist(snapshot).await,
                    None => {
                        debug!(baseline = ?self.baseline, "commit stage gone, snapshot stage exiting");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn request(&self) {
        match self.requests.try_send(SnapshotRequest {
            baseline: self.baseline,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("snapshot request queue full, skipping tick"),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    async fn persist(&mut self, snapshot: Snapshot) {
        match self.store.store(&snapshot).await {
            Ok(()) => {
                self.baseline = Some(snapshot.order_offset);
                info!(
                    offset = snapshot.order_offset,
                    log_seq = snapshot.log_seq(),
                    orders = snapshot.order_book.orders.len(),
                    "snapshot stored"
                );
            }
            Err(err) => {
                warn!(
                    offset = snapshot.order_offset,
                    error = %err,
                    "snapshot store failed, keeping previous baseline"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderBook;
    use crate::memory::MemorySnapshotStore;
    use types::product::Product;

    fn snapshot(order_offset: u64) -> Snapshot {
        Snapshot {
            order_book: OrderBook::new(Product::new("BTC", "USDT", 8, 2), 100).snapshot(),
            order_offset,
        }
    }

    fn snapshotter(store: MemorySnapshotStore) -> (Snapshotter<MemorySnapshotStore>, mpsc::Receiver<SnapshotRequest>) {
        let (requests, request_rx) = mpsc::channel(1);
        let (_, approved) = mpsc::channel(1);
        (
            Snapshotter {
                store,
                requests,
                approved,
                baseline: Some(3),
                interval: Duration::from_secs(30),
            },
            request_rx,
        )
    }

    #[tokio::test]
    async fn test_stored_snapshot_moves_baseline() {
        let store = MemorySnapshotStore::new();
        let (mut stage, _) = snapshotter(store.clone());
        stage.persist(snapshot(9)).await;
        assert_eq!(stage.baseline, Some(9));
        assert_eq!(store.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_store_keeps_baseline() {
        let store = MemorySnapshotStore::new();
        store.fail_next_stores(1);
        let (mut stage, _) = snapshotter(store.clone());
        stage.persist(snapshot(9)).await;
        assert_eq!(stage.baseline, Some(3));
        assert!(store.snapshots().is_empty());
    }

    #[tokio::test]
    async fn test_request_carries_baseline_and_never_blocks() {
        let (stage, mut request_rx) = snapshotter(MemorySnapshotStore::new());
        stage.request();
        stage.request();
        assert_eq!(request_rx.try_recv().unwrap(), SnapshotRequest { baseline: Some(3) });
        assert!(request_rx.try_recv().is_err());
    }
}
