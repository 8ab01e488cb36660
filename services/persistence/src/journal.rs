//! Append-only journal with CRC32C framed entries
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]   // unix nanoseconds
//! [kind_len:  u16][kind: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum:  u32]   // CRC32C over sequence+timestamp+kind+payload
//! ```
//!
//! Entries are appended in batches. A batch is written with a single write
//! and fsynced once; if any part fails the file is cut back to where the
//! batch started. A batch never spans files: rotation happens between
//! batches once a file reaches `max_file_size`. Files are named
//! `journal-NNNNNN.bin`.

use crc32c::crc32c;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use matching_engine::error::StoreError;

use crate::reader::{JournalReader, ReaderError};

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal size limit exceeded: {current} >= {limit}")]
    SizeLimitExceeded { current: u64, limit: u64 },

    #[error("Journal unreadable: {0}")]
    Reader(#[from] ReaderError),

    #[error("Journal writer unusable after a failed rollback; reopen it")]
    Poisoned,
}

impl From<JournalError> for StoreError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::Io(err) => StoreError::Io(err),
            JournalError::Serialization(detail) => StoreError::Codec(detail),
            JournalError::SequenceError { expected, got } => StoreError::SequenceGap { expected, got },
            JournalError::SizeLimitExceeded { .. } => StoreError::Unavailable(err.to_string()),
            JournalError::Reader(err) => err.into(),
            JournalError::Poisoned => StoreError::Corrupt(err.to_string()),
        }
    }
}

impl From<ReaderError> for StoreError {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::Io(err) => StoreError::Io(err),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

/// Fixed part of an entry body: seq + ts + kind_len + payload_len + crc.
const MIN_BODY_LEN: usize = 8 + 8 + 2 + 4 + 4;
/// Anything larger is treated as a corrupt length prefix.
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// One persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub sequence: u64,
    pub timestamp: i64,
    /// Record type, e.g. `order` or a log kind.
    pub kind: String,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(sequence: u64, timestamp: i64, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let checksum = Self::compute_checksum(sequence, timestamp, &kind, &payload);
        Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.sequence, self.timestamp, &self.kind, &self.payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind.as_bytes();
        let body_len = MIN_BODY_LEN + kind.len() + self.payload.len();

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(kind.len() as u16).to_le_bytes());
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decode one entry from the front of `data`, returning it with the
    /// number of bytes consumed. `Ok(None)` means `data` holds only part of
    /// an entry.
    pub fn from_bytes(data: &[u8]) -> Result<Option<(Self, usize)>, JournalError> {
        let mut cursor = Cursor { data, pos: 0 };
        let Some(body_len) = cursor.u32() else {
            return Ok(None);
        };
        let body_len = body_len as usize;
        if !(MIN_BODY_LEN..=MAX_BODY_LEN).contains(&body_len) {
            return Err(JournalError::Serialization(format!(
                "implausible body length {}",
                body_len
            )));
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Ok(None);
        }

        let mut body = Cursor {
            data: &data[4..total],
            pos: 0,
        };
        let malformed = || JournalError::Serialization("entry fields overrun body".into());

        let sequence = body.u64().ok_or_else(malformed)?;
        let timestamp = body.u64().ok_or_else(malformed)? as i64;
        let kind_len = body.u16().ok_or_else(malformed)? as usize;
        let kind = body.bytes(kind_len).ok_or_else(malformed)?;
        let kind = String::from_utf8(kind.to_vec())
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        let payload_len = body.u32().ok_or_else(malformed)? as usize;
        let payload = body.bytes(payload_len).ok_or_else(malformed)?.to_vec();
        let checksum = body.u32().ok_or_else(malformed)?;

        Ok(Some((
            Self {
                sequence,
                timestamp,
                kind,
                payload,
                checksum,
            },
            total,
        )))
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.bytes(N)?.try_into().ok()
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.array().map(u64::from_le_bytes)
    }
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Rotate once the current file reaches this size (default 64 MiB).
    pub max_file_size: u64,
    /// Refuse appends beyond this total size; 0 is unlimited.
    pub max_total_size: u64,
    /// Fsync after every batch.
    pub fsync: bool,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            fsync: true,
        }
    }
}

/// Append-only writer. Sequences must increase by exactly one per entry.
pub struct JournalWriter {
    config: JournalConfig,
    file: File,
    current_file: PathBuf,
    current_file_size: u64,
    file_index: u64,
    total_size: u64,
    last_sequence: Option<u64>,
    poisoned: bool,
    /// Write only this many bytes of the next batch, then fail.
    #[cfg(test)]
    fail_after_bytes: Option<usize>,
}

impl JournalWriter {
    /// Open the journal in `config.dir`, recovering the last sequence and
    /// cutting off a partially written tail entry.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let mut reader = JournalReader::open(&config.dir)?;
        while reader.next_entry()?.is_some() {}
        let last_sequence = reader.last_sequence();
        if let Some((path, valid_len)) = reader.torn_tail() {
            warn!(path = %path.display(), valid_len, "truncating partial journal entry");
            OpenOptions::new().write(true).open(&path)?.set_len(valid_len)?;
        }

        let file_index = latest_index(&config.dir);
        let current_file = journal_path(&config.dir, file_index);
        let file = OpenOptions::new().create(true).append(true).open(&current_file)?;
        let current_file_size = file.metadata()?.len();
        let total_size = total_size(&config.dir)?;

        info!(
            dir = %config.dir.display(),
            last_sequence = ?last_sequence,
            files = file_index + 1,
            "journal opened"
        );

        Ok(Self {
            config,
            file,
            current_file,
            current_file_size,
            file_index,
            total_size,
            last_sequence,
            poisoned: false,
            #[cfg(test)]
            fail_after_bytes: None,
        })
    }

    /// Sequence of the last durable entry, `None` for an empty journal.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        self.append_batch(std::slice::from_ref(entry))
    }

    /// Write `entries` in order and fsync once. Either every entry is
    /// appended or the journal is left as it was.
    pub fn append_batch(&mut self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        let Some(last) = entries.last() else {
            return Ok(());
        };

        let mut expected = self.last_sequence.map(|seq| seq + 1);
        for entry in entries {
            if let Some(expected) = expected {
                if entry.sequence != expected {
                    return Err(JournalError::SequenceError {
                        expected,
                        got: entry.sequence,
                    });
                }
            }
            expected = Some(entry.sequence + 1);
        }
        if self.config.max_total_size > 0 && self.total_size >= self.config.max_total_size {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let mut frames = Vec::new();
        for entry in entries {
            frames.extend_from_slice(&entry.to_bytes());
        }

        let start = self.current_file_size;
        if let Err(err) = self.write_frames(&frames) {
            self.rollback(start);
            return Err(err.into());
        }

        self.current_file_size += frames.len() as u64;
        self.total_size += frames.len() as u64;
        self.last_sequence = Some(last.sequence);
        Ok(())
    }

    fn write_frames(&mut self, frames: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.fail_after_bytes.take() {
            self.file.write_all(&frames[..limit.min(frames.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }

        self.file.write_all(frames)?;
        if self.config.fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the current file back to `len` after a failed batch write.
    fn rollback(&mut self, len: u64) {
        let truncated = self.file.set_len(len).and_then(|_| {
            if self.config.fsync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        match truncated {
            Ok(()) => warn!(file = %self.current_file.display(), len, "rolled back failed journal batch"),
            Err(err) => {
                error!(
                    file = %self.current_file.display(),
                    len,
                    error = %err,
                    "journal rollback failed, refusing further appends"
                );
                self.poisoned = true;
            }
        }
    }

    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;
        let next = journal_path(&self.config.dir, self.file_index + 1);
        let file = OpenOptions::new().create(true).append(true).open(&next)?;
        self.file = file;
        self.file_index += 1;
        self.current_file = next;
        self.current_file_size = 0;
        debug!(file = %self.current_file.display(), "journal rotated");
        Ok(())
    }
}

pub(crate) fn journal_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("journal-{:06}.bin", index))
}

pub(crate) fn parse_index(name: &str) -> Option<u64> {
    name.strip_prefix("journal-")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

fn latest_index(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| parse_index(&e.file_name().to_string_lossy()))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

fn total_size(dir: &Path) -> Result<u64, JournalError> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
