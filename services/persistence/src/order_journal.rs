//! A product's order topic as a journal
//!
//! The entry sequence is the order offset, starting at 0.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use matching_engine::error::StoreError;
use matching_engine::store::OrderReader;
use tracing::debug;
use types::order::Order;

use crate::journal::{JournalConfig, JournalEntry, JournalError, JournalWriter};
use crate::reader::{JournalReader, ReaderError};

const ORDER_KIND: &str = "order";

/// Producer side: appends orders and hands out their offsets.
pub struct OrderJournal {
    writer: JournalWriter,
}

impl OrderJournal {
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        Ok(Self {
            writer: JournalWriter::open(config)?,
        })
    }

    /// Offset the next appended order will get.
    pub fn next_offset(&self) -> u64 {
        self.writer.last_sequence().map_or(0, |last| last + 1)
    }

    pub fn append(&mut self, order: &Order) -> Result<u64, JournalError> {
        let offset = self.next_offset();
        let payload = bincode::serialize(order).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.writer
            .append(&JournalEntry::new(offset, timestamp, ORDER_KIND, payload))?;
        Ok(offset)
    }
}

/// [`OrderReader`] following an order journal, polling when caught up.
///
/// File reads run on the blocking pool. A fetch abandoned mid-read drops
/// the underlying reader; the next call reopens it at the next offset.
pub struct JournalOrderReader {
    dir: PathBuf,
    reader: Option<JournalReader>,
    next_offset: u64,
    poll_interval: Duration,
}

impl JournalOrderReader {
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        Ok(Self {
            dir: dir.to_path_buf(),
            reader: Some(JournalReader::open(dir)?),
            next_offset: 0,
            poll_interval: Duration::from_millis(10),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn position(dir: PathBuf, offset: u64) -> Result<JournalReader, StoreError> {
        tokio::task::spawn_blocking(move || {
            let mut reader = JournalReader::open(&dir)?;
            let skipped = reader.seek_to_sequence(offset)?;
            debug!(offset, skipped, "order journal positioned");
            Ok(reader)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("order journal seek task failed: {}", e)))?
    }
}

/// Next order at or after `next_offset`, or `None` when caught up.
fn read_next(reader: &mut JournalReader, next_offset: u64) -> Result<Option<(u64, Order)>, StoreError> {
    while let Some(entry) = reader.next_entry()? {
        if entry.sequence < next_offset {
            continue;
        }
        let order: Order = bincode::deserialize(&entry.payload)
            .map_err(|e| StoreError::Codec(format!("order at offset {}: {}", entry.sequence, e)))?;
        return Ok(Some((entry.sequence, order)));
    }
    Ok(None)
}

#[async_trait]
impl OrderReader for JournalOrderReader {
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError> {
        self.reader = None;
        self.reader = Some(Self::position(self.dir.clone(), offset).await?);
        self.next_offset = offset;
        Ok(())
    }

    async fn fetch_order(&mut self) -> Result<(u64, Order), StoreError> {
        loop {
            let mut reader = match self.reader.take() {
                Some(reader) => reader,
                None => Self::position(self.dir.clone(), self.next_offset).await?,
            };
            let next_offset = self.next_offset;
            let (reader, fetched) = tokio::task::spawn_blocking(move || {
                let fetched = read_next(&mut reader, next_offset);
                (reader, fetched)
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("order journal read task failed: {}", e)))?;
            self.reader = Some(reader);

            match fetched? {
                Some((offset, order)) => {
                    self.next_offset = offset + 1;
                    return Ok((offset, order));
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tempfile::TempDir;
    use types::ids::ProductId;
    use types::numeric::{Price, Quantity};
    use types::order::Side;

    fn limit(id: u64) -> Order {
        Order::limit(
            id,
            ProductId::new("BTC-USDT"),
            Side::Sell,
            Price::from_str("100.25").unwrap(),
            Quantity::from_u64(2),
        )
    }

    #[tokio::test]
    async fn test_orders_roundtrip_with_offsets() {
        let tmp = TempDir::new().unwrap();
        let mut journal = OrderJournal::open(JournalConfig::new(tmp.path())).unwrap();
        assert_eq!(journal.append(&limit(1)).unwrap(), 0);
        let market = Order::market_buy(2, ProductId::new("BTC-USDT"), Decimal::new(12345, 2));
        assert_eq!(journal.append(&market).unwrap(), 1);
        assert_eq!(journal.append(&limit(3).into_cancel()).unwrap(), 2);

        let mut reader = JournalOrderReader::open(tmp.path()).unwrap();
        assert_eq!(reader.fetch_order().await.unwrap(), (0, limit(1)));
        assert_eq!(reader.fetch_order().await.unwrap(), (1, market));
        let (offset, cancel) = reader.fetch_order().await.unwrap();
        assert_eq!(offset, 2);
        assert!(cancel.is_cancel());
    }

    #[tokio::test]
    async fn test_offsets_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut journal = OrderJournal::open(JournalConfig::new(tmp.path())).unwrap();
            journal.append(&limit(1)).unwrap();
        }
        let journal = OrderJournal::open(JournalConfig::new(tmp.path())).unwrap();
        assert_eq!(journal.next_offset(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_does_not_lose_orders() {
        let tmp = TempDir::new().unwrap();
        let mut journal = OrderJournal::open(JournalConfig::new(tmp.path())).unwrap();
        let mut reader = JournalOrderReader::open(tmp.path())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1));

        // Caught up: the fetch is still waiting when it gets dropped.
        let waited = tokio::time::timeout(Duration::from_millis(20), reader.fetch_order()).await;
        assert!(waited.is_err());

        journal.append(&limit(1)).unwrap();
        journal.append(&limit(2)).unwrap();
        assert_eq!(reader.fetch_order().await.unwrap(), (0, limit(1)));
        assert_eq!(reader.fetch_order().await.unwrap(), (1, limit(2)));
    }

    #[tokio::test]
    async fn test_set_offset_then_follow() {
        let tmp = TempDir::new().unwrap();
        let mut journal = OrderJournal::open(JournalConfig::new(tmp.path())).unwrap();
        for id in 1..=3 {
            journal.append(&limit(id)).unwrap();
        }

        let mut reader = JournalOrderReader::open(tmp.path())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1));
        reader.set_offset(2).await.unwrap();
        assert_eq!(reader.fetch_order().await.unwrap().0, 2);

        let pending = tokio::spawn(async move { reader.fetch_order().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        journal.append(&limit(4)).unwrap();
        assert_eq!(pending.await.unwrap(), (3, limit(4)));
    }
}
