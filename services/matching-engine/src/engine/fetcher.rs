//! Fetch stage: order source → apply stage

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use types::order::Order;

use crate::error::{EngineError, StoreError};
use crate::store::OrderReader;

pub(crate) struct Fetcher<R> {
    pub(crate) reader: R,
    pub(crate) orders: mpsc::Sender<(u64, Order)>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) backoff: Duration,
}

impl<R: OrderReader> Fetcher<R> {
    /// Forward orders until shutdown, source exhaustion or the apply stage
    /// going away. Fetch errors are retried forever.
    pub(crate) async fn run(mut self) -> Result<(), EngineError> {
        loop {
            let fetched = tokio::select! {
                _ = self.orders.closed() => {
                    debug!("apply stage stopped, fetch stage exiting");
                    return Ok(());
                }
                _ = self.shutdown.changed() => {
                    info!("shutdown requested, no more orders will be fetched");
                    return Ok(());
                }
                fetched = self.reader.fetch_order() => fetched,
            };

            match fetched {
                Ok((offset, order)) => {
                    if self.orders.send((offset, order)).await.is_err() {
                        return Ok(());
                    }
                }
                Err(StoreError::Closed) => {
                    info!("order source closed");
                    return Ok(());
                }
                Err(err) => {
                    error!(error = %err, "fetch order failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryOrderLog, MemoryOrderReader};
    use types::ids::ProductId;
    use types::numeric::{Price, Quantity};
    use types::order::Side;

    fn order(id: u64) -> Order {
        Order::limit(id, ProductId::new("BTC-USDT"), Side::Sell, Price::from_u64(10), Quantity::from_u64(1))
    }

    fn fetcher(
        topic: &MemoryOrderLog,
    ) -> (
        Fetcher<MemoryOrderReader>,
        mpsc::Receiver<(u64, Order)>,
        watch::Sender<bool>,
    ) {
        let (orders, orders_rx) = mpsc::channel(16);
        let (stop, shutdown) = watch::channel(false);
        let fetcher = Fetcher {
            reader: topic.reader(),
            orders,
            shutdown,
            backoff: Duration::from_millis(1),
        };
        (fetcher, orders_rx, stop)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_without_skipping() {
        let topic = MemoryOrderLog::new();
        for id in 1..=3 {
            topic.push(order(id));
        }
        topic.fail_next_fetches(3);
        topic.close();

        let (fetcher, mut orders_rx, _stop) = fetcher(&topic);
        fetcher.run().await.unwrap();

        let mut offsets = Vec::new();
        while let Ok((offset, order)) = orders_rx.try_recv() {
            assert_eq!(order.id.value(), offset + 1);
            offsets.push(offset);
        }
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_keeps_retrying_until_source_recovers() {
        let topic = MemoryOrderLog::new();
        topic.push(order(1));
        topic.fail_next_fetches(u32::MAX);

        let (fetcher, mut orders_rx, _stop) = fetcher(&topic);
        let task = tokio::spawn(fetcher.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(orders_rx.try_recv().is_err());
        assert!(!task.is_finished());

        topic.fail_next_fetches(0);
        let (offset, _) = tokio::time::timeout(Duration::from_secs(5), orders_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offset, 0);

        topic.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_source_ends_stage() {
        let topic = MemoryOrderLog::new();
        topic.close();
        let (fetcher, _orders_rx, _stop) = fetcher(&topic);
        assert!(fetcher.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_fetch() {
        let topic = MemoryOrderLog::new();
        let (fetcher, _orders_rx, stop) = fetcher(&topic);
        let task = tokio::spawn(fetcher.run());

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_exits_when_apply_stage_is_gone() {
        let topic = MemoryOrderLog::new();
        topic.push(order(1));
        let (fetcher, orders_rx, _stop) = fetcher(&topic);
        drop(orders_rx);
        assert!(fetcher.run().await.is_ok());
    }
}
