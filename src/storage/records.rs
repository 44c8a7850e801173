//! Named durable records
//!
//! A record is a single string value stored under a key. The archive keeps its
//! whole state in one record and rewrites it wholesale on every change.

use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Durable storage failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("could not determine a data directory")]
    NoDataDir,
}

/// Key/value store for whole records
pub trait RecordStore: Send + Sync {
    /// Read a record, `None` if it was never written
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace a record
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Stores each record as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl RecordStore for FileRecordStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.record_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;

        // Write beside the target and rename so readers never see a torn record
        let mut staged = tempfile::NamedTempFile::new_in(&self.dir)?;
        staged.write_all(value.as_bytes())?;
        staged.flush()?;
        let path = self.record_path(key);
        staged.persist(&path).map_err(|e| e.error)?;

        debug!("Wrote record {:?} ({} bytes)", path, value.len());
        Ok(())
    }
}
