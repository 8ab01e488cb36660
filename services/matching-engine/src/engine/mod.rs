//! Per-product matching pipeline
//!
//! Four tasks connected by bounded channels:
//!
//! ```text
//! fetch ──orders──▶ apply ──logs──────▶ commit
//!                    ▲  └──snapshots──▶   │
//!                    │                    │ approved
//!                requests ◀──── snapshot ◀┘
//! ```
//!
//! Only the apply task touches the [`OrderBook`]. A snapshot reaches the
//! snapshot store only after every log it covers is committed.

mod applier;
mod committer;
mod fetcher;
mod snapshotter;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use types::ids::ProductId;
use types::product::Product;

use crate::book::OrderBook;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::{LogStore, OrderReader, SnapshotStore};

use applier::Applier;
use committer::Committer;
use fetcher::Fetcher;
use snapshotter::Snapshotter;

/// Matching engine for a single product.
pub struct Engine<R, L, S> {
    product: Product,
    config: EngineConfig,
    order_reader: R,
    log_store: L,
    snapshot_store: S,
}

impl<R, L, S> Engine<R, L, S>
where
    R: OrderReader + 'static,
    L: LogStore + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(
        product: Product,
        config: EngineConfig,
        order_reader: R,
        log_store: L,
        snapshot_store: S,
    ) -> Self {
        Self {
            product,
            config,
            order_reader,
            log_store,
            snapshot_store,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product.id
    }

    /// Restore from the latest snapshot, position the order source after
    /// it and spawn the pipeline tasks.
    pub async fn start(self) -> Result<EngineHandle, EngineError> {
        let Engine {
            product,
            config,
            mut order_reader,
            log_store,
            snapshot_store,
        } = self;
        config.validate().map_err(EngineError::Config)?;
        let product_id = product.id.clone();

        let mut book = OrderBook::new(product, config.window_capacity);
        let latest = snapshot_store
            .get_latest()
            .await
            .map_err(EngineError::Startup)?;

        let (resume_offset, baseline) = match latest {
            Some(snapshot) => {
                let offset = snapshot.order_offset;
                info!(
                    product = %product_id,
                    offset,
                    log_seq = snapshot.log_seq(),
                    trade_seq = snapshot.order_book.trade_seq,
                    orders = snapshot.order_book.orders.len(),
                    "restoring from snapshot"
                );
                book.restore(snapshot.order_book)
                    .map_err(EngineError::Restore)?;
                (offset + 1, Some(offset))
            }
            None => {
                info!(product = %product_id, "no snapshot found, starting with an empty book");
                (0, None)
            }
        };

        order_reader
            .set_offset(resume_offset)
            .await
            .map_err(EngineError::Seek)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (order_tx, order_rx) = mpsc::channel(config.order_channel_capacity);
        let (log_tx, log_rx) = mpsc::channel(config.log_channel_capacity);
        let (request_tx, request_rx) = mpsc::channel(config.snapshot_channel_capacity);
        let (approval_tx, approval_rx) = mpsc::channel(config.snapshot_channel_capacity);
        let (approved_tx, approved_rx) = mpsc::channel(config.snapshot_channel_capacity);

        let committed = book.log_seq();

        let fetcher = Fetcher {
            reader: order_reader,
            orders: order_tx,
            shutdown: shutdown_rx,
            backoff: config.fetch_retry_backoff(),
        };
        let applier = Applier {
            book,
            orders: order_rx,
            logs: log_tx,
            requests: request_rx,
            approvals: approval_tx,
            applied_offset: baseline,
            threshold: config.snapshot_threshold,
        };
        let committer = Committer {
            store: log_store,
            logs: log_rx,
            approvals: approval_rx,
            approved: approved_tx,
            committed,
            pending: None,
            batch_size: config.commit_batch_size,
            retries: config.commit_retries,
            backoff: config.commit_retry_backoff(),
        };
        let snapshotter = Snapshotter {
            store: snapshot_store,
            requests: request_tx,
            approved: approved_rx,
            baseline,
            interval: config.snapshot_interval(),
        };

        let tasks = vec![
            spawn_stage("fetch", &product_id, fetcher.run()),
            spawn_stage("apply", &product_id, applier.run()),
            spawn_stage("commit", &product_id, committer.run()),
            spawn_stage("snapshot", &product_id, snapshotter.run()),
        ];
        info!(product = %product_id, offset = resume_offset, "engine started");

        Ok(EngineHandle {
            product_id,
            shutdown,
            tasks,
        })
    }

    /// Start the engine and wait for it to stop.
    pub async fn run(self) -> Result<(), EngineError> {
        self.start().await?.join().await
    }
}

fn spawn_stage<F>(
    stage: &'static str,
    product_id: &ProductId,
    stage_future: F,
) -> (&'static str, JoinHandle<Result<(), EngineError>>)
where
    F: std::future::Future<Output = Result<(), EngineError>> + Send + 'static,
{
    let span = info_span!("stage", stage, product = %product_id);
    (stage, tokio::spawn(stage_future.instrument(span)))
}

/// Control over a running engine. Dropping it requests shutdown.
pub struct EngineHandle {
    product_id: ProductId,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<Result<(), EngineError>>)>,
}

impl EngineHandle {
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Stop fetching. Orders already fetched are applied, their logs
    /// committed, and the tasks then exit.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop every task immediately.
    pub fn abort(&self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    /// Wait for every task. Returns the error that stopped the pipeline,
    /// preferring the first stage failure over the channel closures it
    /// caused downstream.
    pub async fn join(mut self) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        for (stage, task) in std::mem::take(&mut self.tasks) {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(product = %self.product_id, stage, error = %err, "stage failed");
                    errors.push(err);
                }
                Err(join_err) if join_err.is_cancelled() => {
                    warn!(product = %self.product_id, stage, "stage aborted");
                }
                Err(join_err) => errors.push(EngineError::Task {
                    task: stage,
                    reason: join_err.to_string(),
                }),
            }
        }

        match errors.iter().position(|err| !err.is_knock_on()) {
            Some(root) => Err(errors.swap_remove(root)),
            None => match errors.into_iter().next() {
                Some(err) => Err(err),
                None => {
                    info!(product = %self.product_id, "engine stopped");
                    Ok(())
                }
            },
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
