//! Sequential journal reader with checksum validation
//!
//! Reads every `journal-NNNNNN.bin` file in index order. The reader can
//! follow a journal that is still being written: once caught up,
//! [`JournalReader::next_entry`] returns `None` and a later call picks up
//! whatever was appended or rotated in since.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::journal::{parse_index, JournalEntry};

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch in {file} at byte {offset}: entry seq={sequence}")]
    ChecksumMismatch {
        file: String,
        offset: u64,
        sequence: u64,
    },

    #[error("Corruption in {file} at byte {offset}: {detail}")]
    Corruption {
        file: String,
        offset: u64,
        detail: String,
    },
}

/// Where and why the reader gave up on a region of the journal.
#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    pub file: PathBuf,
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    MalformedEntry,
    /// Unparseable bytes left at the end of a file that was rotated away.
    TruncatedEntry,
}

pub struct JournalReader {
    dir: PathBuf,
    files: Vec<PathBuf>,
    current: usize,
    /// Buffered bytes of the current file, starting at file offset `base`.
    data: Vec<u8>,
    base: u64,
    pos: usize,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

/// Consumed prefix kept in memory before it is dropped.
const COMPACT_THRESHOLD: usize = 1 << 20;

impl JournalReader {
    /// A missing directory reads as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let mut reader = Self {
            dir: dir.to_path_buf(),
            files: discover_files(dir)?,
            current: 0,
            data: Vec::new(),
            base: 0,
            pos: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.fill()?;
        Ok(reader)
    }

    /// Next valid entry, or `None` when caught up with the writer.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        self.compact();
        loop {
            let offset = self.base + self.pos as u64;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok(Some((entry, consumed))) => {
                    if !entry.verify_checksum() {
                        self.record(offset, CorruptionKind::ChecksumMismatch, format!(
                            "CRC32C mismatch for seq={}, stored={:#010x}",
                            entry.sequence, entry.checksum
                        ));
                        return Err(ReaderError::ChecksumMismatch {
                            file: self.current_name(),
                            offset,
                            sequence: entry.sequence,
                        });
                    }
                    self.pos += consumed;
                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Ok(None) => {
                    if self.fill()? {
                        continue;
                    }
                    if !self.advance_file()? {
                        return Ok(None);
                    }
                }
                Err(err) => {
                    self.record(offset, CorruptionKind::MalformedEntry, err.to_string());
                    return Err(ReaderError::Corruption {
                        file: self.current_name(),
                        offset,
                        detail: err.to_string(),
                    });
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Skip entries below `target`; the next entry read is the first one
    /// with `sequence >= target`. Returns how many were skipped.
    pub fn seek_to_sequence(&mut self, target: u64) -> Result<u64, ReaderError> {
        let mut skipped = 0;
        loop {
            let previous = self.last_sequence;
            match self.next_entry()? {
                Some(entry) if entry.sequence < target => skipped += 1,
                Some(entry) => {
                    // Entries never span files and compaction only runs
                    // before a read, so the entry's bytes are still buffered.
                    self.pos -= entry.to_bytes().len();
                    self.last_sequence = previous;
                    return Ok(skipped);
                }
                None => return Ok(skipped),
            }
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    /// The last file and the length of its valid prefix, if it ends in a
    /// partially written entry. Meaningful once `next_entry` returned `None`.
    pub fn torn_tail(&self) -> Option<(PathBuf, u64)> {
        let path = self.files.get(self.current)?;
        (self.current + 1 == self.files.len() && self.pos < self.data.len())
            .then(|| (path.clone(), self.base + self.pos as u64))
    }

    /// Read bytes appended to the current file since the last fill.
    fn fill(&mut self) -> Result<bool, ReaderError> {
        let Some(path) = self.files.get(self.current) else {
            return Ok(false);
        };
        let mut file = File::open(path)?;
        let known = self.base + self.data.len() as u64;
        if file.metadata()?.len() <= known {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(known))?;
        let read = file.read_to_end(&mut self.data)?;
        Ok(read > 0)
    }

    /// Move on to the next file, discovering rotated-in files if needed.
    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        if self.current + 1 >= self.files.len() {
            let files = discover_files(&self.dir)?;
            if files.len() <= self.files.len() {
                return Ok(false);
            }
            let first_file = self.files.is_empty();
            self.files = files;
            if first_file {
                return self.fill();
            }
        }

        if self.pos < self.data.len() {
            let offset = self.base + self.pos as u64;
            let remaining = self.data.len() - self.pos;
            self.record(
                offset,
                CorruptionKind::TruncatedEntry,
                format!("{} unparseable bytes before rotation", remaining),
            );
            warn!(file = %self.current_name(), offset, remaining, "skipping truncated journal tail");
        }

        self.current += 1;
        self.data.clear();
        self.base = 0;
        self.pos = 0;
        self.fill()?;
        Ok(true)
    }

    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD {
            self.data.drain(..self.pos);
            self.base += self.pos as u64;
            self.pos = 0;
        }
    }

    fn record(&mut self, byte_offset: u64, kind: CorruptionKind, detail: String) {
        self.corruption_log.push(CorruptionRecord {
            file: self.files.get(self.current).cloned().unwrap_or_default(),
            byte_offset,
            kind,
            detail,
        });
    }

    fn current_name(&self) -> String {
        self.files
            .get(self.current)
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, ReaderError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| parse_index(&e.file_name().to_string_lossy()).map(|i| (i, e.path())))
        .collect();
    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalConfig, JournalWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn entry(seq: u64) -> JournalEntry {
        JournalEntry::new(seq, seq as i64 * 1_000, "order", vec![seq as u8; 8])
    }

    fn write_entries(dir: &Path, seqs: impl IntoIterator<Item = u64>) -> JournalWriter {
        let mut writer = JournalWriter::open(JournalConfig::new(dir)).unwrap();
        let batch: Vec<_> = seqs.into_iter().map(entry).collect();
        writer.append_batch(&batch).unwrap();
        writer
    }

    fn seqs(entries: &[JournalEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.sequence).collect()
    }

    #[test]
    fn test_sequential_read() {
        let tmp = TempDir::new().unwrap();
        write_entries(tmp.path(), 1..=5);
        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(seqs(&reader.read_all().unwrap()), vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.last_sequence(), Some(5));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let mut reader = JournalReader::open(&tmp.path().join("nope")).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_follows_appends() {
        let tmp = TempDir::new().unwrap();
        let mut writer = write_entries(tmp.path(), 1..=2);
        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 2);

        writer.append(&entry(3)).unwrap();
        assert_eq!(reader.next_entry().unwrap().map(|e| e.sequence), Some(3));
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_follows_first_file_created_later() {
        let tmp = TempDir::new().unwrap();
        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert!(reader.next_entry().unwrap().is_none());

        write_entries(tmp.path(), 1..=2);
        assert_eq!(seqs(&reader.read_all().unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_follows_rotation() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 64,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        let mut reader = JournalReader::open(tmp.path()).unwrap();

        for seq in 1..=6 {
            writer.append(&entry(seq)).unwrap();
        }
        assert_eq!(seqs(&reader.read_all().unwrap()), vec![1, 2, 3, 4, 5, 6]);
        assert!(reader.corruption_log().is_empty());
    }

    #[test]
    fn test_seek_to_sequence() {
        let tmp = TempDir::new().unwrap();
        write_entries(tmp.path(), 1..=10);
        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.seek_to_sequence(7).unwrap(), 6);
        assert_eq!(reader.last_sequence(), Some(6));
        assert_eq!(seqs(&reader.read_all().unwrap()), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = write_entries(tmp.path(), 1..=3).current_file_path().to_path_buf();

        let mut bytes = fs::read(&path).unwrap();
        let first_len = entry(1).to_bytes().len();
        // Flip a payload byte of the second entry.
        bytes[first_len + 33] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.next_entry().unwrap().map(|e| e.sequence), Some(1));
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(err, ReaderError::ChecksumMismatch { sequence: 2, .. }));
        assert_eq!(reader.corruption_log()[0].kind, CorruptionKind::ChecksumMismatch);
        assert_eq!(reader.corruption_log()[0].byte_offset, first_len as u64);
    }

    #[test]
    fn test_torn_tail_is_waited_on_not_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = write_entries(tmp.path(), 1..=2).current_file_path().to_path_buf();
        let third = entry(3).to_bytes();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&third[..7]).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 2);
        let (torn, valid_len) = reader.torn_tail().unwrap();
        assert_eq!(torn, path);
        assert_eq!(valid_len, 2 * third.len() as u64);

        file.write_all(&third[7..]).unwrap();
        assert_eq!(reader.next_entry().unwrap().map(|e| e.sequence), Some(3));
        assert!(reader.torn_tail().is_none());
    }
}
