//! Apply stage: the only writer of the order book

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use types::order::Order;

use crate::book::OrderBook;
use crate::error::EngineError;
use crate::events::Log;
use crate::snapshot::Snapshot;

/// Asks the apply stage for a snapshot if enough happened since `baseline`,
/// the offset of the last stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SnapshotRequest {
    pub(crate) baseline: Option<u64>,
}

pub(crate) struct Applier {
    pub(crate) book: OrderBook,
    pub(crate) orders: mpsc::Receiver<(u64, Order)>,
    pub(crate) logs: mpsc::Sender<Log>,
    pub(crate) requests: mpsc::Receiver<SnapshotRequest>,
    pub(crate) approvals: mpsc::Sender<Snapshot>,
    pub(crate) applied_offset: Option<u64>,
    pub(crate) threshold: u64,
}

impl Applier {
    pub(crate) async fn run(mut self) -> Result<(), EngineError> {
        loop {
            tokio::select! {
                biased;
                _ = self.logs.closed() => {
                    return Err(EngineError::ChannelClosed("log"));
                }
                Some(request) = self.requests.recv() => {
                    if let Some(snapshot) = self.snapshot_for(request) {
                        self.approvals
                            .send(snapshot)
                            .await
                            .map_err(|_| EngineError::ChannelClosed("snapshot approval"))?;
                    }
                }
                next = self.orders.recv() => match next {
                    Some((offset, order)) => self.apply(offset, order).await?,
                    None => {
                        info!(offset = ?self.applied_offset, "order stream ended, apply stage exiting");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn apply(&mut self, offset: u64, order: Order) -> Result<(), EngineError> {
        let result = if order.is_cancel() {
            self.book.cancel_order(&order)
        } else {
            self.book.apply_order(&order)
        };
        let logs = result.map_err(|err| {
            error!(offset, order_id = %order.id, error = %err, "order book failure, stopping pipeline");
            EngineError::Book(err)
        })?;

        for log in logs {
            self.logs
                .send(log)
                .await
                .map_err(|_| EngineError::ChannelClosed("log"))?;
        }
        self.applied_offset = Some(offset);
        Ok(())
    }

    /// Snapshot of the book tagged with the applied offset, unless fewer
    /// than `threshold` orders were applied since the baseline.
    pub(crate) fn snapshot_for(&self, request: SnapshotRequest) -> Option<Snapshot> {
        let applied = self.applied_offset?;
        let delta = match request.baseline {
            Some(baseline) => applied.saturating_sub(baseline),
            None => applied + 1,
        };
        if delta <= self.threshold {
            debug!(applied, delta, threshold = self.threshold, "snapshot not due");
            return None;
        }

        let snapshot = Snapshot {
            order_book: self.book.snapshot(),
            order_offset: applied,
        };
        info!(
            offset = applied,
            log_seq = snapshot.log_seq(),
            "snapshot taken, awaiting commit"
        );
        Some(snapshot)
    }
}
