//! Bounded archive of committed scans
//!
//! Entries are kept newest first and capped at a fixed capacity; committing
//! past the cap drops the oldest entries. The whole sequence is rewritten to
//! its durable record after every change. A failed write never rolls back the
//! in-memory state, it is reported through [`PersistStatus`] and retried by
//! [`Archive::flush`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::records::{RecordStore, StorageError};

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

/// File name recorded when the scan has no source name
const FALLBACK_FILE_NAME: &str = "scan";

/// A committed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    /// Unique identifier generated at commit time
    pub id: String,
    /// Commit time, stored as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Source file name at commit time
    pub file_name: String,
    /// Committed (possibly corrected) text
    pub text: String,
}

/// Whether the latest change reached durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistStatus {
    Persisted,
    /// The write failed; the in-memory archive still holds the change
    Failed(String),
}

/// Why a commit was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitRejected {
    /// Nothing but whitespace to commit
    EmptyText,
    /// A recognition run is still filling the buffer
    RecognitionInFlight,
}

/// Result of a commit attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        entry: ArchiveEntry,
        persisted: PersistStatus,
    },
    Rejected(CommitRejected),
}

#[derive(Serialize)]
struct ArchiveDocumentRef<'a> {
    version: u32,
    entries: &'a [ArchiveEntry],
}

#[derive(Deserialize)]
struct ArchiveDocument {
    version: u32,
    entries: Vec<ArchiveEntry>,
}

/// Accepted on-disk layouts
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredArchive {
    Versioned(ArchiveDocument),
    /// Unversioned bare array
    Legacy(Vec<ArchiveEntry>),
}

/// The archive, mirrored in memory and backed by one durable record
pub struct Archive {
    store: Box<dyn RecordStore>,
    record_key: String,
    capacity: usize,
    entries: Vec<ArchiveEntry>,
    dirty: bool,
}

impl Archive {
    /// Load the archive from its record.
    ///
    /// A missing, unreadable or corrupt record yields an empty archive.
    pub fn load(store: Box<dyn RecordStore>, record_key: impl Into<String>, capacity: usize) -> Self {
        let record_key = record_key.into();
        let capacity = capacity.max(1);

        let mut entries = match store.read(&record_key) {
            Ok(Some(raw)) => match parse_entries(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Archive record '{}' is corrupt, starting empty: {}", record_key, e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not read archive record '{}': {}", record_key, e);
                Vec::new()
            }
        };
        entries.truncate(capacity);

        info!("Loaded {} archived scans", entries.len());

        Self {
            store,
            record_key,
            capacity,
            entries,
            dirty: false,
        }
    }

    /// Entries, newest first
    pub fn list(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when the last write did not land
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Commit text as a new entry at the front of the archive
    pub fn commit(&mut self, file_name: &str, text: &str) -> CommitOutcome {
        if text.trim().is_empty() {
            debug!("Refusing to archive empty text");
            return CommitOutcome::Rejected(CommitRejected::EmptyText);
        }

        let file_name = if file_name.is_empty() {
            FALLBACK_FILE_NAME
        } else {
            file_name
        };

        let entry = ArchiveEntry {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().trunc_subsecs(3),
            file_name: file_name.to_string(),
            text: text.to_string(),
        };

        self.entries.insert(0, entry.clone());
        if self.entries.len() > self.capacity {
            let evicted = self.entries.len() - self.capacity;
            self.entries.truncate(self.capacity);
            debug!("Evicted {} oldest archived scans", evicted);
        }

        info!("Archived scan {} ({})", entry.id, entry.file_name);
        let persisted = self.persist();
        CommitOutcome::Committed { entry, persisted }
    }

    /// Remove an entry. Returns `None` when no entry has this id.
    pub fn remove(&mut self, id: &str) -> Option<PersistStatus> {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() == before {
            debug!("No archived scan with id {}", id);
            return None;
        }

        info!("Removed archived scan {}", id);
        Some(self.persist())
    }

    /// Retry a write that previously failed
    pub fn flush(&mut self) -> PersistStatus {
        if !self.dirty {
            return PersistStatus::Persisted;
        }
        self.persist()
    }

    fn persist(&mut self) -> PersistStatus {
        match self.write_record() {
            Ok(()) => {
                self.dirty = false;
                PersistStatus::Persisted
            }
            Err(e) => {
                warn!("Archive not saved, changes are held in memory only: {}", e);
                self.dirty = true;
                PersistStatus::Failed(e.to_string())
            }
        }
    }

    fn write_record(&self) -> Result<(), StorageError> {
        let document = ArchiveDocumentRef {
            version: SCHEMA_VERSION,
            entries: &self.entries,
        };
        let raw = serde_json::to_string(&document)?;
        self.store.write(&self.record_key, &raw)
    }
}

fn parse_entries(raw: &str) -> Result<Vec<ArchiveEntry>, serde_json::Error> {
    match serde_json::from_str(raw)? {
        StoredArchive::Versioned(doc) => {
            if doc.version > SCHEMA_VERSION {
                warn!(
                    "Archive schema version {} is newer than supported version {}",
                    doc.version, SCHEMA_VERSION
                );
            }
            Ok(doc.entries)
        }
        StoredArchive::Legacy(entries) => Ok(entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::testing::MemoryRecordStore;
    use crate::storage::records::FileRecordStore;
    use tempfile::TempDir;

    const KEY: &str = "prescriptions";

    fn archive_with(store: &MemoryRecordStore) -> Archive {
        Archive::load(Box::new(store.clone()), KEY, 50)
    }

    fn committed(outcome: CommitOutcome) -> ArchiveEntry {
        match outcome {
            CommitOutcome::Committed { entry, .. } => entry,
            CommitOutcome::Rejected(reason) => panic!("commit rejected: {:?}", reason),
        }
    }

    #[test]
    fn test_empty_when_record_missing() {
        let archive = archive_with(&MemoryRecordStore::new());
        assert!(archive.is_empty());
        assert!(!archive.is_dirty());
    }

    #[test]
    fn test_empty_when_record_corrupt() {
        let store = MemoryRecordStore::with_record(KEY, "{not json");
        let archive = archive_with(&store);
        assert!(archive.is_empty());
    }

    #[test]
    fn test_commit_prepends_newest_first() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);

        let first = committed(archive.commit("a.png", "first"));
        let second = committed(archive.commit("b.png", "second"));

        let ids: Vec<&str> = archive.list().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_commit_rejects_empty_and_whitespace() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        committed(archive.commit("a.png", "kept"));
        let before = archive.list().to_vec();

        assert_eq!(
            archive.commit("rx.png", ""),
            CommitOutcome::Rejected(CommitRejected::EmptyText)
        );
        assert_eq!(
            archive.commit("rx.png", "   "),
            CommitOutcome::Rejected(CommitRejected::EmptyText)
        );
        assert_eq!(archive.list(), before.as_slice());
    }

    #[test]
    fn test_commit_without_file_name_uses_fallback() {
        let mut archive = archive_with(&MemoryRecordStore::new());
        let entry = committed(archive.commit("", "text"));
        assert_eq!(entry.file_name, "scan");
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let mut archive = archive_with(&MemoryRecordStore::new());

        let mut ids = Vec::new();
        for i in 0..60 {
            ids.push(committed(archive.commit(&format!("rx{i}.png"), &format!("text {i}"))).id);
        }

        assert_eq!(archive.len(), 50);
        let expected: Vec<String> = ids.iter().rev().take(50).cloned().collect();
        let listed: Vec<String> = archive.list().iter().map(|e| e.id.clone()).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_fifty_first_commit_evicts_first() {
        let mut archive = archive_with(&MemoryRecordStore::new());

        let first = committed(archive.commit("rx0.png", "text 0"));
        for i in 1..51 {
            committed(archive.commit(&format!("rx{i}.png"), &format!("text {i}")));
        }

        assert_eq!(archive.len(), 50);
        assert!(archive.get(&first.id).is_none());
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        let keep = committed(archive.commit("a.png", "keep"));
        let gone = committed(archive.commit("b.png", "gone"));

        assert_eq!(archive.remove(&gone.id), Some(PersistStatus::Persisted));
        let after_first = archive.list().to_vec();
        let record_after_first = store.get(KEY);

        assert_eq!(archive.remove(&gone.id), None);
        assert_eq!(archive.list(), after_first.as_slice());
        assert_eq!(store.get(KEY), record_after_first);
        assert_eq!(archive.list()[0].id, keep.id);
    }

    #[test]
    fn test_reload_round_trip() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        committed(archive.commit("rx1.png", "Paracetamol 500mg\nTwice daily"));
        committed(archive.commit("rx2.png", "Amoxicillin 250mg"));

        let reloaded = archive_with(&store);
        assert_eq!(reloaded.list(), archive.list());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::load(Box::new(FileRecordStore::new(dir.path())), KEY, 50);
        committed(archive.commit("rx1.png", "Ibuprofen"));

        let reloaded = Archive::load(Box::new(FileRecordStore::new(dir.path())), KEY, 50);
        assert_eq!(reloaded.list(), archive.list());
    }

    #[test]
    fn test_record_is_versioned() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        committed(archive.commit("rx1.png", "text"));

        let raw: serde_json::Value = serde_json::from_str(&store.get(KEY).unwrap()).unwrap();
        assert_eq!(raw["version"], SCHEMA_VERSION);
        assert_eq!(raw["entries"][0]["fileName"], "rx1.png");
        assert!(raw["entries"][0]["createdAt"].is_i64());
    }

    #[test]
    fn test_loads_legacy_array() {
        let legacy = r#"[{"id":"abc","createdAt":1700000000000,"fileName":"old.jpg","text":"Aspirin"}]"#;
        let store = MemoryRecordStore::with_record(KEY, legacy);
        let archive = archive_with(&store);

        assert_eq!(archive.len(), 1);
        let entry = &archive.list()[0];
        assert_eq!(entry.id, "abc");
        assert_eq!(entry.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(entry.text, "Aspirin");
    }

    #[test]
    fn test_load_truncates_to_capacity() {
        let store = MemoryRecordStore::new();
        let mut archive = Archive::load(Box::new(store.clone()), KEY, 10);
        for i in 0..10 {
            committed(archive.commit("rx.png", &format!("text {i}")));
        }

        let smaller = Archive::load(Box::new(store.clone()), KEY, 3);
        assert_eq!(smaller.len(), 3);
        assert_eq!(smaller.list(), &archive.list()[..3]);
    }

    #[test]
    fn test_failed_write_keeps_memory_state() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        store.set_fail_writes(true);

        let outcome = archive.commit("rx1.png", "text");
        match outcome {
            CommitOutcome::Committed { persisted, .. } => {
                assert!(matches!(persisted, PersistStatus::Failed(_)))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(archive.len(), 1);
        assert!(archive.is_dirty());
        assert!(store.get(KEY).is_none());
    }

    #[test]
    fn test_flush_retries_failed_write() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        store.set_fail_writes(true);
        committed(archive.commit("rx1.png", "text"));

        store.set_fail_writes(false);
        assert_eq!(archive.flush(), PersistStatus::Persisted);
        assert!(!archive.is_dirty());

        let reloaded = archive_with(&store);
        assert_eq!(reloaded.list(), archive.list());
    }

    #[test]
    fn test_flush_when_clean_is_noop() {
        let store = MemoryRecordStore::new();
        let mut archive = archive_with(&store);
        assert_eq!(archive.flush(), PersistStatus::Persisted);
        assert!(store.get(KEY).is_none());
    }
}
