//! Matching logs on a journal
//!
//! One journal entry per log: entry sequence is the log sequence, entry kind
//! is the log kind and the payload is the bincode-encoded [`Log`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use matching_engine::error::StoreError;
use matching_engine::events::{Log, LogObserver};
use matching_engine::store::LogStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::ids::ProductId;

use crate::journal::{JournalConfig, JournalEntry, JournalError, JournalWriter};
use crate::reader::{JournalReader, ReaderError};

fn lock(writer: &Mutex<JournalWriter>) -> MutexGuard<'_, JournalWriter> {
    writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn encode_log(log: &Log) -> Result<JournalEntry, StoreError> {
    let payload = bincode::serialize(log).map_err(|e| StoreError::Codec(e.to_string()))?;
    let timestamp = log.time().timestamp_nanos_opt().unwrap_or_default();
    Ok(JournalEntry::new(log.sequence(), timestamp, log.kind(), payload))
}

pub(crate) fn decode_log(entry: &JournalEntry) -> Result<Log, StoreError> {
    bincode::deserialize(&entry.payload).map_err(|e| {
        StoreError::Codec(format!("log entry {}: {}", entry.sequence, e))
    })
}

/// [`LogStore`] writing to a journal directory.
///
/// Logs at or below the last journaled sequence are skipped, so replaying
/// orders after a restart does not duplicate them.
#[derive(Clone)]
pub struct JournalLogStore {
    writer: Arc<Mutex<JournalWriter>>,
}

impl JournalLogStore {
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        let writer = JournalWriter::open(config)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    pub fn last_sequence(&self) -> Option<u64> {
        lock(&self.writer).last_sequence()
    }
}

#[async_trait]
impl LogStore for JournalLogStore {
    async fn store(&mut self, logs: &[Log]) -> Result<(), StoreError> {
        let entries = logs.iter().map(encode_log).collect::<Result<Vec<_>, _>>()?;
        let writer = Arc::clone(&self.writer);

        tokio::task::spawn_blocking(move || {
            let mut writer = lock(&writer);
            let last = writer.last_sequence().unwrap_or(0);
            let fresh: Vec<JournalEntry> = entries.into_iter().filter(|e| e.sequence > last).collect();
            if fresh.is_empty() {
                return Ok(());
            }
            writer.append_batch(&fresh).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("journal write task failed: {}", e)))?
    }
}

/// Tails one product's log journal and feeds every registered
/// [`LogObserver`], in registration order.
pub struct JournalLogReader {
    product_id: ProductId,
    reader: JournalReader,
    last_seq: u64,
    poll_interval: Duration,
    observers: Vec<Box<dyn LogObserver>>,
}

impl JournalLogReader {
    /// Reader positioned after `after_seq`, the last log the observers have
    /// already seen (0 for none).
    pub fn open(dir: &Path, product_id: ProductId, after_seq: u64) -> Result<Self, ReaderError> {
        let mut reader = JournalReader::open(dir)?;
        reader.seek_to_sequence(after_seq + 1)?;
        Ok(Self {
            product_id,
            reader,
            last_seq: after_seq,
            poll_interval: Duration::from_millis(100),
            observers: Vec::new(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn register_observer(&mut self, observer: Box<dyn LogObserver>) {
        self.observers.push(observer);
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_seq
    }

    /// Next unseen log, or `None` when caught up.
    pub fn next_log(&mut self) -> Result<Option<Log>, StoreError> {
        while let Some(entry) = self.reader.next_entry()? {
            if entry.sequence <= self.last_seq {
                debug!(seq = entry.sequence, last = self.last_seq, "discarding already seen log");
                continue;
            }
            if self.last_seq > 0 && entry.sequence != self.last_seq + 1 {
                return Err(StoreError::SequenceGap {
                    expected: self.last_seq + 1,
                    got: entry.sequence,
                });
            }
            let log = decode_log(&entry)?;
            if log.product_id() != &self.product_id {
                return Err(StoreError::Corrupt(format!(
                    "log {} belongs to {}, not {}",
                    entry.sequence,
                    log.product_id(),
                    self.product_id
                )));
            }
            self.last_seq = entry.sequence;
            return Ok(Some(log));
        }
        Ok(None)
    }

    /// Dispatch every log to each observer, then keep following the journal
    /// until `shutdown` flips or its sender goes away.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        if self.observers.is_empty() {
            warn!(product = %self.product_id, "log reader running without observers");
        }
        loop {
            while let Some(log) = self.next_log()? {
                let offset = log.sequence();
                for observer in self.observers.iter_mut() {
                    log.dispatch(observer.as_mut(), offset).await;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if shutdown.has_changed().is_err() {
                break;
            }
        }
        info!(product = %self.product_id, last_seq = self.last_seq, "log reader stopped");
        Ok(())
    }
}
