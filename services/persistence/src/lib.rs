//! Durable adapters for the matching engine
//!
//! - `journal` / `reader`: append-only CRC32C framed journal files
//! - `order_journal`: order topic on a journal, implementing `OrderReader`
//! - `log_journal`: matching logs on a journal, implementing `LogStore`, and
//!   a tailing reader that feeds registered `LogObserver`s
//! - `snapshot`: per-product snapshot files implementing `SnapshotStore`

pub mod journal;
pub mod log_journal;
pub mod order_journal;
pub mod reader;
pub mod snapshot;

pub use journal::{JournalConfig, JournalEntry, JournalError, JournalWriter};
pub use log_journal::{JournalLogReader, JournalLogStore};
pub use order_journal::{JournalOrderReader, OrderJournal};
pub use reader::{JournalReader, ReaderError};
pub use snapshot::{FileSnapshotStore, SnapshotConfig, SnapshotError};
