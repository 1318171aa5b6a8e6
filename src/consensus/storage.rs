//! Stable store (current term + vote) and snapshot store (spec.md §4.2,
//! §6 on-disk layout: `<data_dir>/raft/stable`, `<data_dir>/raft/log/`).

use crate::game::SnapshotBlob;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StableRecord {
    pub current_term: u64,
    pub voted_for: Option<String>,
}

/// `<data_dir>/raft/stable`. Rewritten wholesale on every change; it is two
/// fields, not worth a WAL.
pub struct StableStore {
    path: PathBuf,
    record: StableRecord,
}

impl StableStore {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let record = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw).unwrap_or_default()
        } else {
            StableRecord::default()
        };
        Ok(StableStore { path, record })
    }

    pub fn current_term(&self) -> u64 {
        self.record.current_term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.record.voted_for.as_deref()
    }

    pub fn persist(&mut self, term: u64, voted_for: Option<String>) -> io::Result<()> {
        self.record.current_term = term;
        self.record.voted_for = voted_for;
        let raw = serde_json::to_vec(&self.record).expect("StableRecord is always serializable");
        fs::write(&self.path, raw)
    }
}

/// Snapshot metadata alongside the blob, so a restart knows how much of the
/// log the snapshot already accounts for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_included_index: u64,
    pub last_included_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    meta: SnapshotMeta,
    blob: SnapshotBlob,
}

/// `<data_dir>/raft/log/` with retention 1: every `persist` call replaces
/// the previous snapshot rather than accumulating a series.
pub struct SnapshotStore {
    dir: PathBuf,
}

const SNAPSHOT_FILE_NAME: &str = "snapshot.bin";

impl SnapshotStore {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStore { dir })
    }

    fn file_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Writes the whole blob and closes the sink in one call, matching
    /// spec.md §4.2 "`Persist` must either write the whole blob and close
    /// the sink, or cancel it on any I/O failure". There is no partial
    /// write left behind: we build the file in a temp path and rename.
    pub fn persist(&self, meta: SnapshotMeta, blob: SnapshotBlob) -> io::Result<()> {
        let tmp_path = self.dir.join(format!("{SNAPSHOT_FILE_NAME}.tmp"));
        let file = SnapshotFile { meta, blob };
        let raw = serde_json::to_vec(&file).expect("SnapshotFile is always serializable");
        fs::write(&tmp_path, raw)?;
        fs::rename(&tmp_path, self.file_path())
    }

    pub fn load(&self) -> io::Result<Option<(SnapshotMeta, SnapshotBlob)>> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        let file: SnapshotFile =
            serde_json::from_slice(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some((file.meta, file.blob)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like_dir::temp_dir;

    mod tempfile_like_dir {
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub fn temp_dir(tag: &str) -> PathBuf {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!("hangman_cluster_test_{tag}_{n}"));
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }
    }

    #[test]
    fn stable_store_round_trips() {
        let dir = temp_dir("stable");
        let path = dir.join("stable");
        {
            let mut store = StableStore::open(&path).unwrap();
            store.persist(5, Some("node-a".to_string())).unwrap();
        }
        let store = StableStore::open(&path).unwrap();
        assert_eq!(store.current_term(), 5);
        assert_eq!(store.voted_for(), Some("node-a"));
    }

    #[test]
    fn snapshot_store_retains_only_the_latest() {
        let dir = temp_dir("snap");
        let store = SnapshotStore::open(&dir).unwrap();
        store
            .persist(
                SnapshotMeta {
                    last_included_index: 1,
                    last_included_term: 1,
                },
                SnapshotBlob(vec![1, 2, 3]),
            )
            .unwrap();
        store
            .persist(
                SnapshotMeta {
                    last_included_index: 2,
                    last_included_term: 1,
                },
                SnapshotBlob(vec![4, 5]),
            )
            .unwrap();
        let (meta, blob) = store.load().unwrap().unwrap();
        assert_eq!(meta.last_included_index, 2);
        assert_eq!(blob.0, vec![4, 5]);
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1, "retention must be 1");
    }
}
