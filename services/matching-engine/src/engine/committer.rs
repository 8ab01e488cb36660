//! Commit stage: batches logs into the log store and releases snapshots
//! once everything they cover is durable.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::events::Log;
use crate::snapshot::Snapshot;
use crate::store::LogStore;

pub(crate) struct Committer<L> {
    pub(crate) store: L,
    pub(crate) logs: mpsc::Receiver<Log>,
    pub(crate) approvals: mpsc::Receiver<Snapshot>,
    pub(crate) approved: mpsc::Sender<Snapshot>,
    /// Highest durable log sequence.
    pub(crate) committed: u64,
    /// Snapshot waiting for its logs to be committed.
    pub(crate) pending: Option<Snapshot>,
    pub(crate) batch_size: usize,
    pub(crate) retries: u32,
    pub(crate) backoff: Duration,
}

impl<L: LogStore> Committer<L> {
    pub(crate) async fn run(mut self) -> Result<(), EngineError> {
        let mut logs_open = true;
        let mut approvals_open = true;

        loop {
            tokio::select! {
                next = self.logs.recv(), if logs_open => match next {
                    Some(first) => {
                        let batch = self.collect_batch(first);
                        self.commit(batch).await?;
                    }
                    None => logs_open = false,
                },
                next = self.approvals.recv(), if approvals_open => match next {
                    Some(snapshot) => self.on_approval_request(snapshot),
                    None => approvals_open = false,
                },
                else => {
                    if let Some(snapshot) = self.pending.take() {
                        debug!(log_seq = snapshot.log_seq(), "dropping snapshot never covered by commits");
                    }
                    info!(committed = self.committed, "commit stage exiting");
                    return Ok(());
                }
            }
        }
    }

    /// `first` plus whatever is already queued, up to the batch size, minus
    /// logs at or below the committed sequence.
    pub(crate) fn collect_batch(&mut self, first: Log) -> Vec<Log> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut next = Some(first);
        while let Some(log) = next {
            let floor = batch.last().map(Log::sequence).unwrap_or(self.committed);
            if log.sequence() <= floor {
                debug!(seq = log.sequence(), floor, "discarding already committed log");
            } else {
                batch.push(log);
            }
            if batch.len() >= self.batch_size {
                break;
            }
            next = self.logs.try_recv().ok();
        }
        batch
    }

    async fn commit(&mut self, batch: Vec<Log>) -> Result<(), EngineError> {
        let Some(last) = batch.last().map(Log::sequence) else {
            return Ok(());
        };
        self.store_with_retry(&batch).await?;
        self.committed = last;

        if let Some(snapshot) = self.release_pending() {
            self.approve(snapshot);
        }
        Ok(())
    }

    async fn store_with_retry(&mut self, batch: &[Log]) -> Result<(), EngineError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.store.store(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempts <= self.retries => {
                    warn!(attempts, batch = batch.len(), error = %err, "log store failed, retrying");
                    tokio::time::sleep(self.backoff * attempts).await;
                }
                Err(err) => {
                    error!(attempts, error = %err, "log store failed permanently, stopping pipeline");
                    return Err(EngineError::FatalIo {
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }

    /// Approve now if already covered, otherwise park it, replacing any
    /// older parked snapshot.
    pub(crate) fn on_approval_request(&mut self, snapshot: Snapshot) {
        if snapshot.log_seq() <= self.committed {
            self.approve(snapshot);
            return;
        }
        if let Some(superseded) = self.pending.replace(snapshot) {
            info!(
                offset = superseded.order_offset,
                log_seq = superseded.log_seq(),
                "pending snapshot superseded by a newer one"
            );
        }
    }

    pub(crate) fn release_pending(&mut self) -> Option<Snapshot> {
        match &self.pending {
            Some(snapshot) if snapshot.log_seq() <= self.committed => self.pending.take(),
            _ => None,
        }
    }

    fn approve(&self, snapshot: Snapshot) {
        match self.approved.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(snapshot)) => {
                warn!(offset = snapshot.order_offset, "snapshot stage busy, dropping approved snapshot");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("snapshot stage gone, approved snapshot dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderBook;
    use crate::memory::MemoryLogStore;
    use chrono::Utc;
    use types::ids::{OrderId, ProductId};
    use types::numeric::{Price, Quantity};
    use types::order::{DoneReason, Side};
    use types::product::Product;

    use crate::events::DoneLog;

    fn log(sequence: u64) -> Log {
        Log::Done(DoneLog {
            sequence,
            product_id: ProductId::new("BTC-USDT"),
            time: Utc::now(),
            order_id: OrderId::new(sequence),
            price: Price::from_u64(1),
            remaining_size: Quantity::zero(),
            reason: DoneReason::Cancelled,
            side: Side::Buy,
        })
    }

    fn snapshot(log_seq: u64, order_offset: u64) -> Snapshot {
        let mut order_book = OrderBook::new(Product::new("BTC", "USDT", 8, 2), 100).snapshot();
        order_book.log_seq = log_seq;
        Snapshot {
            order_book,
            order_offset,
        }
    }

    struct Harness {
        committer: Committer<MemoryLogStore>,
        store: MemoryLogStore,
        log_tx: mpsc::Sender<Log>,
        approved_rx: mpsc::Receiver<Snapshot>,
    }

    fn harness(committed: u64, batch_size: usize) -> Harness {
        let store = MemoryLogStore::new();
        let (log_tx, logs) = mpsc::channel(64);
        let (_approval_tx, approvals) = mpsc::channel(4);
        let (approved, approved_rx) = mpsc::channel(4);
        Harness {
            committer: Committer {
                store: store.clone(),
                logs,
                approvals,
                approved,
                committed,
                pending: None,
                batch_size,
                retries: 2,
                backoff: Duration::from_millis(1),
            },
            store,
            log_tx,
            approved_rx,
        }
    }

    #[tokio::test]
    async fn test_batch_discards_committed_and_duplicates() {
        let mut h = harness(2, 100);
        for seq in [3, 3, 4, 5] {
            h.log_tx.send(log(seq)).await.unwrap();
        }

        let batch = h.committer.collect_batch(log(1));
        let seqs: Vec<u64> = batch.iter().map(Log::sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_batch_respects_size_limit() {
        let mut h = harness(0, 2);
        for seq in 2..=5 {
            h.log_tx.send(log(seq)).await.unwrap();
        }
        let batch = h.committer.collect_batch(log(1));
        assert_eq!(batch.len(), 2);
        let first = h.committer.logs.try_recv().unwrap();
        let rest = h.committer.collect_batch(first);
        assert_eq!(rest.iter().map(Log::sequence).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_snapshot_approved_only_after_commit() {
        let mut h = harness(0, 100);
        h.committer.on_approval_request(snapshot(3, 10));
        assert!(h.approved_rx.try_recv().is_err());

        h.committer.commit(vec![log(1), log(2)]).await.unwrap();
        assert!(h.approved_rx.try_recv().is_err());

        h.committer.commit(vec![log(3)]).await.unwrap();
        let approved = h.approved_rx.try_recv().unwrap();
        assert_eq!(approved.order_offset, 10);
        assert_eq!(h.store.last_sequence(), 3);
    }

    #[tokio::test]
    async fn test_covered_snapshot_approved_immediately() {
        let mut h = harness(5, 100);
        h.committer.on_approval_request(snapshot(5, 7));
        assert_eq!(h.approved_rx.try_recv().unwrap().order_offset, 7);
        assert!(h.committer.pending.is_none());
    }

    #[tokio::test]
    async fn test_latest_pending_snapshot_wins() {
        let mut h = harness(0, 100);
        h.committer.on_approval_request(snapshot(2, 20));
        h.committer.on_approval_request(snapshot(4, 40));

        h.committer
            .commit((1..=4).map(log).collect())
            .await
            .unwrap();

        assert_eq!(h.approved_rx.try_recv().unwrap().order_offset, 40);
        assert!(h.approved_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut h = harness(0, 100);
        h.store.fail_next(2);
        h.committer.commit(vec![log(1)]).await.unwrap();
        assert_eq!(h.store.store_calls(), 3);
        assert_eq!(h.committer.committed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_fatal() {
        let mut h = harness(0, 100);
        h.store.fail_next(u32::MAX);
        let err = h.committer.commit(vec![log(1)]).await.unwrap_err();
        assert!(matches!(err, EngineError::FatalIo { attempts: 3, .. }));
        assert_eq!(h.committer.committed, 0);
    }
}
