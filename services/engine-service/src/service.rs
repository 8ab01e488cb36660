//! Engine lifecycle for every configured product

use anyhow::{Context, Result};
use matching_engine::{Engine, EngineHandle};
use persistence::{FileSnapshotStore, JournalLogStore, JournalOrderReader};
use tracing::{error, info, warn};
use types::product::Product;

use crate::config::ServiceConfig;

pub type JournalEngine = Engine<JournalOrderReader, JournalLogStore, FileSnapshotStore>;

/// Build one engine over the product's order journal, log journal and
/// snapshot directory under `data_dir`.
pub fn build_engine(config: &ServiceConfig, product: &Product) -> Result<JournalEngine> {
    let orders_dir = config.orders_dir(&product.id);
    std::fs::create_dir_all(&orders_dir)
        .with_context(|| format!("Failed to create {}", orders_dir.display()))?;
    let orders = JournalOrderReader::open(&orders_dir)
        .with_context(|| format!("Failed to open order journal for {}", product.id))?
        .with_poll_interval(config.poll_interval());

    let logs = JournalLogStore::open(config.journal_config(config.logs_dir(&product.id)))
        .with_context(|| format!("Failed to open log journal for {}", product.id))?;

    let snapshots = FileSnapshotStore::open(config.snapshot_config(), product.id.clone())
        .with_context(|| format!("Failed to open snapshot store for {}", product.id))?;

    Ok(Engine::new(product.clone(), config.engine.clone(), orders, logs, snapshots))
}

/// Running engines, one per product.
pub struct ServiceState {
    handles: Vec<EngineHandle>,
}

impl ServiceState {
    /// Start every product's engine. Engines already started are shut down
    /// if a later one fails.
    pub async fn start(config: &ServiceConfig) -> Result<Self> {
        let mut handles = Vec::with_capacity(config.products.len());
        for product in &config.products {
            let started = match build_engine(config, product) {
                Ok(engine) => engine
                    .start()
                    .await
                    .with_context(|| format!("Failed to start engine for {}", product.id)),
                Err(e) => Err(e),
            };
            match started {
                Ok(handle) => {
                    info!(product = %product.id, "engine started");
                    handles.push(handle);
                }
                Err(e) => {
                    Self { handles }.shutdown().await;
                    return Err(e);
                }
            }
        }
        Ok(Self { handles })
    }

    pub fn products(&self) -> impl Iterator<Item = &types::ids::ProductId> {
        self.handles.iter().map(EngineHandle::product_id)
    }

    /// Resolves once any engine has stopped on its own.
    pub async fn any_stopped(&self) {
        loop {
            if self.handles.iter().any(EngineHandle::is_finished) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Signal every engine and wait for each to drain. Returns the number of
    /// engines that stopped with an error.
    pub async fn shutdown(self) -> usize {
        for handle in &self.handles {
            handle.shutdown();
        }

        let mut failed = 0;
        for handle in self.handles {
            let product = handle.product_id().clone();
            match handle.join().await {
                Ok(()) => info!(product = %product, "engine stopped"),
                Err(e) => {
                    error!(product = %product, error = %e, "engine stopped with error");
                    failed += 1;
                }
            }
        }
        failed
    }

    /// [`shutdown`](Self::shutdown) bounded by `timeout`; engines still
    /// running when it expires are aborted.
    pub async fn shutdown_within(self, timeout: std::time::Duration) -> usize {
        let count = self.handles.len();
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(failed) => failed,
            Err(_) => {
                warn!(?timeout, "engines did not drain in time");
                count
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use persistence::{JournalConfig, JournalReader, OrderJournal};
    use std::time::Duration;
    use tempfile::TempDir;
    use types::numeric::{Price, Quantity};
    use types::order::{Order, Side};

    fn config(data_dir: &std::path::Path) -> ServiceConfig {
        let mut config = parse_config(
            r#"
            [[products]]
            id = "BTC-USDT"
            base_currency = "BTC"
            quote_currency = "USDT"
            base_scale = 8
            quote_scale = 2

            [journal]
            poll_interval_ms = 2
            "#,
        )
        .unwrap();
        config.service.data_dir = data_dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_service_matches_journaled_orders() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let product = config.products[0].id.clone();

        let mut orders = OrderJournal::open(JournalConfig::new(config.orders_dir(&product))).unwrap();
        for (id, side) in [(1, Side::Sell), (2, Side::Buy)] {
            let order = Order::limit(id, product.clone(), side, Price::from_u64(100), Quantity::from_u64(1));
            orders.append(&order).unwrap();
        }

        let state = ServiceState::start(&config).await.unwrap();
        assert_eq!(state.products().count(), 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let mut reader = JournalReader::open(&config.logs_dir(&product)).unwrap();
            let kinds: Vec<String> = reader.read_all().unwrap().into_iter().map(|e| e.kind).collect();
            if kinds.len() >= 4 {
                assert_eq!(kinds, vec!["open", "match", "done", "done"]);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "logs never committed: {:?}", kinds);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(state.shutdown_within(Duration::from_secs(5)).await, 0);
    }
}
