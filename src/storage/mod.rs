//! Storage Layer
//!
//! Handles local persistence of the scan archive as a single named JSON record.

pub mod archive;
pub mod records;

pub use archive::{Archive, ArchiveEntry, CommitOutcome, CommitRejected, PersistStatus};
pub use records::{FileRecordStore, RecordStore, StorageError};

use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs, StorageError> {
    directories::ProjectDirs::from("com", "rxscan", "RxScan").ok_or(StorageError::NoDataDir)
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf, StorageError> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
