//! File-backed snapshot store
//!
//! Layout: `<dir>/<product>/snapshot-<offset>.snap[.zst]`. Each file holds a
//! bincode envelope whose body is the bincode-encoded engine snapshot plus
//! its SHA-256 digest. Files are written to a temporary name, fsynced and
//! renamed into place. Only the newest `keep` files are retained.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use matching_engine::error::StoreError;
use matching_engine::snapshot::Snapshot;
use matching_engine::store::SnapshotStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::ids::ProductId;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Snapshot belongs to {found}, expected {expected}")]
    WrongProduct { expected: String, found: String },
}

impl From<SnapshotError> for StoreError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(err) => StoreError::Io(err),
            SnapshotError::Serialization(detail) | SnapshotError::Compression(detail) => {
                StoreError::Codec(detail)
            }
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    product_id: String,
    order_offset: u64,
    log_seq: u64,
    /// Unix nanoseconds.
    created_at: i64,
    /// Hex SHA-256 of `body`.
    checksum: String,
    body: Vec<u8>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    pub compress: bool,
    /// Snapshot files kept per product, newest first; at least 1.
    pub keep: usize,
    /// Snapshots older than this are ignored by `get_latest`.
    pub max_age: Option<Duration>,
}

impl SnapshotConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compress: true,
            keep: 3,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    product_id: ProductId,
    dir: PathBuf,
    config: SnapshotConfig,
}

impl FileSnapshotStore {
    pub fn open(config: SnapshotConfig, product_id: ProductId) -> Result<Self, SnapshotError> {
        let dir = config.dir.join(product_id.as_str());
        fs::create_dir_all(&dir)?;
        Ok(Self {
            product_id,
            dir,
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        if snapshot.product_id() != &self.product_id {
            return Err(SnapshotError::WrongProduct {
                expected: self.product_id.to_string(),
                found: snapshot.product_id().to_string(),
            });
        }

        let body = bincode::serialize(snapshot).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let envelope = Envelope {
            version: SNAPSHOT_VERSION,
            product_id: self.product_id.to_string(),
            order_offset: snapshot.order_offset,
            log_seq: snapshot.log_seq(),
            created_at: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            checksum: sha256_hex(&body),
            body,
        };
        let data = bincode::serialize(&envelope).map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (data, ext) = if self.config.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:020}.{}", snapshot.order_offset, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        self.prune()?;
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let envelope = self.load_envelope(path)?;
        let actual = sha256_hex(&envelope.body);
        if actual != envelope.checksum {
            return Err(SnapshotError::IntegrityFailure {
                expected: envelope.checksum,
                actual,
            });
        }
        let snapshot: Snapshot =
            bincode::deserialize(&envelope.body).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        if snapshot.product_id() != &self.product_id {
            return Err(SnapshotError::WrongProduct {
                expected: self.product_id.to_string(),
                found: snapshot.product_id().to_string(),
            });
        }
        Ok(snapshot)
    }

    /// Newest loadable snapshot within `max_age`. Unreadable files are
    /// skipped in favour of older ones.
    pub fn load_latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        for (offset, path) in self.list_snapshots()?.into_iter().rev() {
            match self.load_fresh(&path) {
                Ok(Some(snapshot)) => return Ok(Some(snapshot)),
                Ok(None) => {
                    info!(product = %self.product_id, offset, "latest snapshot expired");
                    return Ok(None);
                }
                Err(SnapshotError::Io(err)) => return Err(SnapshotError::Io(err)),
                Err(err) => {
                    warn!(product = %self.product_id, offset, error = %err, "skipping unreadable snapshot");
                }
            }
        }
        Ok(None)
    }

    /// Snapshot files as `(order_offset, path)`, oldest first.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(offset) = parse_offset(&name) {
                snapshots.push((offset, entry.path()));
            }
        }
        snapshots.sort_by_key(|(offset, _)| *offset);
        Ok(snapshots)
    }

    fn load_fresh(&self, path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
        if let Some(max_age) = self.config.max_age {
            let envelope = self.load_envelope(path)?;
            let age_nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() - envelope.created_at;
            if age_nanos > max_age.as_nanos() as i64 {
                return Ok(None);
            }
        }
        self.load(path).map(Some)
    }

    fn load_envelope(&self, path: &Path) -> Result<Envelope, SnapshotError> {
        let data = fs::read(path)?;
        let data = if path.extension().is_some_and(|ext| ext == "zst") {
            zstd::decode_all(data.as_slice()).map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };
        let envelope: Envelope =
            bincode::deserialize(&data).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        if envelope.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    fn prune(&self) -> Result<(), SnapshotError> {
        let snapshots = self.list_snapshots()?;
        let excess = snapshots.len().saturating_sub(self.config.keep.max(1));
        for (offset, path) in snapshots.into_iter().take(excess) {
            fs::remove_file(&path)?;
            debug!(product = %self.product_id, offset, "old snapshot removed");
        }
        Ok(())
    }
}

fn parse_offset(name: &str) -> Option<u64> {
    let stem = name.strip_prefix("snapshot-")?;
    let digits = stem
        .strip_suffix(".snap.zst")
        .or_else(|| stem.strip_suffix(".snap"))?;
    digits.parse().ok()
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn store(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let store = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || store.write(&snapshot).map(|_| ()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("snapshot write task failed: {}", e)))?
            .map_err(StoreError::from)
    }

    async fn get_latest(&self) -> Result<Option<Snapshot>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_latest())
            .await
            .map_err(|e| StoreError::Unavailable(format!("snapshot load task failed: {}", e)))?
            .map_err(StoreError::from)
    }
}
