//! Crate-wide error taxonomy (spec.md-equivalent: Transient, NotLeader, Timeout,
//! InvalidInput, Fatal).

use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the consensus engine's client-facing contract
/// (`Submit`, `WaitForLeader`, `Join`, `Leave`).
#[derive(Error, Debug, Clone)]
pub enum RaftError {
    #[error("timed out waiting for commit/leader")]
    Timeout,

    #[error("not the leader{}", .hint.map(|a| format!(", try {a}")).unwrap_or_default())]
    NotLeader { hint: Option<SocketAddr> },

    #[error("consensus engine is shutting down")]
    Shutdown,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal storage/consensus error: {0}")]
    Fatal(String),
}

impl RaftError {
    pub fn not_leader(hint: Option<SocketAddr>) -> Self {
        RaftError::NotLeader { hint }
    }
}

/// Errors surfaced at the RPC edge (wire framing, dispatch).
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("request timed out")]
    Timeout,

    #[error("malformed frame: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Raft(#[from] RaftError),
}

pub type Result<T, E = RaftError> = std::result::Result<T, E>;
