//! KV-store scratchpad registry of backend addresses (spec.md §6 names this
//! as an external collaborator explicitly out of scope). Rather than stub it
//! out entirely, it's represented here as a `RegistryClient` trait with a
//! flat-JSON-file-backed implementation, grounded on
//! `internal/state.go`'s embedded store in `original_source/` for shape only
//! (register/lookup/deregister), not its actual storage engine. This is what
//! lets `--backend-addr` stay optional on the frontend: it can discover
//! backend servers by reading the registry instead of being told one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait RegistryClient: Send + Sync {
    fn register(&self, node_id: &str, rpc_addr: SocketAddr) -> io::Result<()>;
    fn deregister(&self, node_id: &str) -> io::Result<()>;
    fn lookup(&self) -> io::Result<Vec<SocketAddr>>;
}

#[derive(Default, Serialize, Deserialize)]
struct RegistryFile {
    servers: HashMap<String, SocketAddr>,
}

/// A flat JSON file under the OS temp dir, guarded by an in-process mutex.
/// Not safe for true multi-process concurrent writers (no file locking) —
/// adequate for the single-machine demo/dev use this stub targets.
pub struct FileRegistryClient {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistryClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileRegistryClient { path: path.into(), lock: Mutex::new(()) }
    }

    /// Default location: `<temp_dir>/hangman-registry.json`, matching the
    /// "flat JSON file under the OS temp dir" description in SPEC_FULL.md.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("hangman-registry.json")
    }

    fn read(&self) -> io::Result<RegistryFile> {
        match File::open(&self.path) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)?;
                if contents.trim().is_empty() {
                    return Ok(RegistryFile::default());
                }
                serde_json::from_str(&contents)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e),
        }
    }

    fn write(&self, registry: &RegistryFile) -> io::Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(registry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&self.path)?;
        file.write_all(body.as_bytes())
    }
}

impl RegistryClient for FileRegistryClient {
    fn register(&self, node_id: &str, rpc_addr: SocketAddr) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut registry = self.read()?;
        registry.servers.insert(node_id.to_string(), rpc_addr);
        self.write(&registry)
    }

    fn deregister(&self, node_id: &str) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut registry = self.read()?;
        registry.servers.remove(node_id);
        self.write(&registry)
    }

    fn lookup(&self) -> io::Result<Vec<SocketAddr>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read()?.servers.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hangman-registry-test-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let path = temp_path("roundtrip");
        let client = FileRegistryClient::new(&path);
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        client.register("node-a", addr).unwrap();
        assert_eq!(client.lookup().unwrap(), vec![addr]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn deregister_removes_entry() {
        let path = temp_path("deregister");
        let client = FileRegistryClient::new(&path);
        let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        client.register("node-b", addr).unwrap();
        client.deregister("node-b").unwrap();
        assert!(client.lookup().unwrap().is_empty());
        std::fs::remove_file(&path).ok();
    }
}
