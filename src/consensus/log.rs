//! The durable, appendable, truncatable log store (spec.md §4.2 "Log and
//! storage"). Generalizes the teacher's `Log`/`MemoryLog`/`Entry` trio
//! (`src/server/log.rs`, referenced but not retrieved with the pack) to a
//! payload that can carry either a game command or a membership change.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigChange {
    AddVoter { node_id: String, rpc_addr: SocketAddr },
    RemoveServer { node_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogPayload {
    Command(Vec<u8>),
    Config(ConfigChange),
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub payload: LogPayload,
}

pub trait Log: Send {
    fn last_index(&self) -> u64;
    fn last_term(&self) -> u64;
    fn term_at(&self, index: u64) -> Option<u64>;
    fn get(&self, index: u64) -> Option<Entry>;
    fn entries_from(&self, index: u64) -> Vec<Entry>;
    /// Appends `entries`, truncating any existing conflicting suffix first.
    fn append(&mut self, entries: Vec<Entry>);
    /// Drops every entry with index < `index`; used after a snapshot.
    fn truncate_before(&mut self, index: u64);
}

/// In-memory log; used by tests and by the bootstrap path before a data
/// directory is configured.
#[derive(Default)]
pub struct MemoryLog {
    entries: Vec<Entry>,
    base_index: u64,
    base_term: u64,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog {
            entries: Vec::new(),
            base_index: 0,
            base_term: 0,
        }
    }

    fn position(&self, index: u64) -> Option<usize> {
        if index <= self.base_index {
            return None;
        }
        let pos = (index - self.base_index - 1) as usize;
        if pos < self.entries.len() {
            Some(pos)
        } else {
            None
        }
    }
}

impl Log for MemoryLog {
    fn last_index(&self) -> u64 {
        self.base_index + self.entries.len() as u64
    }

    fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(self.base_term)
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.base_index {
            return Some(self.base_term);
        }
        self.position(index).map(|p| self.entries[p].term)
    }

    fn get(&self, index: u64) -> Option<Entry> {
        self.position(index).map(|p| self.entries[p].clone())
    }

    fn entries_from(&self, index: u64) -> Vec<Entry> {
        match self.position(index) {
            Some(p) => self.entries[p..].to_vec(),
            None => {
                if index <= self.base_index {
                    self.entries.clone()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn append(&mut self, new_entries: Vec<Entry>) {
        for entry in new_entries {
            if let Some(pos) = self.position(entry.index) {
                if self.entries[pos].term != entry.term {
                    self.entries.truncate(pos);
                    self.entries.push(entry);
                }
                // identical entry already present: idempotent no-op
            } else if entry.index == self.last_index() + 1 {
                self.entries.push(entry);
            }
        }
    }

    fn truncate_before(&mut self, index: u64) {
        if index == 0 || index <= self.base_index + 1 {
            return;
        }
        let new_base_index = index - 1;
        let drop_count = (new_base_index - self.base_index).min(self.entries.len() as u64) as usize;
        if drop_count > 0 {
            self.base_term = self.entries[drop_count - 1].term;
            self.entries.drain(0..drop_count);
        }
        self.base_index = new_base_index;
    }
}

#[derive(Serialize, Deserialize)]
struct FileLogHeader {
    base_index: u64,
    base_term: u64,
}

/// File-backed log: a length-framed bincode header record (the compaction
/// boundary) followed by one length-framed bincode record per entry,
/// matching `Command::encode`'s own framing style. The whole file is read
/// into memory at startup (spec.md §4.2: "if a durable state is already
/// present, the node rejoins as a follower").
pub struct FileLog {
    path: std::path::PathBuf,
    memory: MemoryLog,
}

impl FileLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut memory = MemoryLog::new();
        if path.exists() {
            let mut file = BufReader::new(File::open(&path)?);
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let mut offset = 0;
            let mut first = true;
            while offset + 4 <= buf.len() {
                let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
                offset += 4;
                if offset + len > buf.len() {
                    break; // truncated tail write; ignore
                }
                let record = &buf[offset..offset + len];
                offset += len;
                if first {
                    first = false;
                    let header: FileLogHeader = bincode::deserialize(record)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    memory.base_index = header.base_index;
                    memory.base_term = header.base_term;
                    continue;
                }
                let entry: Entry = bincode::deserialize(record)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                memory.entries.push(entry);
            }
        }
        Ok(FileLog { path, memory })
    }

    fn rewrite(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let header = FileLogHeader {
            base_index: self.memory.base_index,
            base_term: self.memory.base_term,
        };
        Self::write_record(&mut file, &header)?;
        for entry in &self.memory.entries {
            Self::write_record(&mut file, entry)?;
        }
        file.flush()
    }

    fn write_record(file: &mut File, record: &impl Serialize) -> io::Result<()> {
        let body = bincode::serialize(record).expect("record serialization is infallible");
        file.write_all(&(body.len() as u32).to_le_bytes())?;
        file.write_all(&body)?;
        Ok(())
    }
}

impl Log for FileLog {
    fn last_index(&self) -> u64 {
        self.memory.last_index()
    }

    fn last_term(&self) -> u64 {
        self.memory.last_term()
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        self.memory.term_at(index)
    }

    fn get(&self, index: u64) -> Option<Entry> {
        self.memory.get(index)
    }

    fn entries_from(&self, index: u64) -> Vec<Entry> {
        self.memory.entries_from(index)
    }

    fn append(&mut self, entries: Vec<Entry>) {
        self.memory.append(entries);
        if let Err(e) = self.rewrite() {
            log::error!("failed to persist raft log to {:?}: {e}", self.path);
        }
    }

    fn truncate_before(&mut self, index: u64) {
        self.memory.truncate_before(index);
        if let Err(e) = self.rewrite() {
            log::error!("failed to persist raft log to {:?}: {e}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64) -> Entry {
        Entry {
            index,
            term,
            payload: LogPayload::Noop,
        }
    }

    #[test]
    fn append_is_sequential() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, 1), entry(2, 1)]);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn conflicting_suffix_is_truncated() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, 1), entry(2, 1), entry(3, 1)]);
        log.append(vec![entry(2, 2)]);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 2);
    }

    #[test]
    fn truncate_before_drops_compacted_prefix() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, 1), entry(2, 1), entry(3, 2)]);
        log.truncate_before(2);
        assert!(log.get(1).is_none());
        assert!(log.get(2).is_some());
        assert_eq!(log.entries_from(2).len(), 2);
    }
}
