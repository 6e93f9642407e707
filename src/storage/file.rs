//! Flat-file result store: an in-memory store persisted as a JSON snapshot.

use crate::check::{AuxData, CheckKey, ResultRecord};
use crate::storage::memory::MemoryStore;
use crate::storage::{ResultStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    results: Vec<StoredResult>,
    aux: Vec<StoredAux>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResult {
    key: CheckKey,
    record: ResultRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredAux {
    key: CheckKey,
    data: AuxData,
}

pub struct FileStore {
    memory: MemoryStore,
    path: PathBuf,
    dirty: AtomicBool,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store, loading the snapshot at `path` if it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let memory = MemoryStore::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;
            for stored in snapshot.results {
                memory.update_check_result(&stored.key, &stored.record)?;
            }
            for stored in snapshot.aux {
                memory.insert_aux(stored.key, stored.data);
            }
            tracing::info!(path = %path.display(), results = memory.len(), "Loaded result store");
        }

        Ok(Self {
            memory,
            path,
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Snapshot {
            results: self
                .memory
                .load_results()?
                .into_iter()
                .map(|(key, record)| StoredResult { key, record })
                .collect(),
            aux: self
                .memory
                .aux_entries()
                .into_iter()
                .map(|(key, data)| StoredAux { key, data })
                .collect(),
        };

        let tmp = self.tmp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), results = snapshot.results.len(), "Saved result store");
        Ok(())
    }
}

impl ResultStore for FileStore {
    fn update_check_result(&self, key: &CheckKey, record: &ResultRecord) -> Result<(), StoreError> {
        self.memory.update_check_result(key, record)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn update_aux_info(&self, key: &CheckKey, aux: &AuxData) -> Result<(), StoreError> {
        self.memory.update_aux_info(key, aux)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, key: &CheckKey) -> Result<(), StoreError> {
        self.memory.remove(key)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn load_results(&self) -> Result<Vec<(CheckKey, ResultRecord)>, StoreError> {
        self.memory.load_results()
    }

    /// Write the snapshot if anything changed since the last flush.
    fn flush(&self) -> Result<(), StoreError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.write_snapshot() {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckTarget, CheckType, Health, Reason, Response};

    fn record() -> ResultRecord {
        ResultRecord {
            health: Health::Down,
            reason: Reason::ConnectTimeout,
            response: Response::Failed,
            status_code: None,
            rtt_ms: 10_000,
            smoothed_rtt_ms: 0,
            slow: false,
            checked_at_ms: 1_700_000_000_000,
            groups: vec!["web".into()],
            hosts: vec!["a.example.com".into()],
        }
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let key = CheckKey::new("10.0.0.1".parse().unwrap(), &CheckTarget::new(CheckType::Http, 80, Some("/x".into())));

        let store = FileStore::open(&path).unwrap();
        store.update_check_result(&key, &record()).unwrap();
        store.update_aux_info(&key, &AuxData("cpu=4".into())).unwrap();
        store.flush().unwrap();
        assert!(path.exists());
        assert!(!store.tmp_path().exists());

        let reopened = FileStore::open(&path).unwrap();
        let loaded = reopened.load_results().unwrap();
        assert_eq!(loaded, vec![(key.clone(), record())]);
        assert_eq!(reopened.memory().aux_info(&key), Some(AuxData("cpu=4".into())));
    }

    #[test]
    fn test_flush_skips_clean_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let store = FileStore::open(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Serde(_))));
    }
}
