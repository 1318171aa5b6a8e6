pub mod log;
pub mod peer;
pub mod raft;
pub mod storage;

pub use raft::{Raft, RaftConfig, ServerEntry};
