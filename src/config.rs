//! CLI flag parsing (spec.md §6), via `clap` derive — adopted because every
//! example repo with a CLI surface reaches for a flag-parsing crate rather
//! than hand-rolling `std::env::args()`, and the teacher itself carries no
//! CLI dependency of its own to prefer instead.

use clap::Parser;
use std::net::SocketAddr;

fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "node".to_string())
}

/// Flags for the backend (consensus + RPC) process.
#[derive(Debug, Parser)]
#[command(name = "hangman-backend", about = "Clustered, replicated hangman backend node")]
pub struct BackendArgs {
    /// Unique id for this node (default: local hostname).
    #[arg(long, default_value_t = default_node_name())]
    pub node_name: String,

    /// Gossip bind address (spec.md §4.4).
    #[arg(long, default_value = "127.0.0.1:4001")]
    pub bind_addr: SocketAddr,

    /// Port the shared RPC/consensus multiplexer listens on.
    #[arg(long, default_value_t = 4002)]
    pub rpc_port: u16,

    /// Directory for durable raft state (log, stable store, snapshots).
    /// Omit to run fully in-memory.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Comma-separated seed addresses to join on startup.
    #[arg(long, value_delimiter = ',')]
    pub start_join_addrs: Vec<SocketAddr>,

    /// Form a single-node cluster with this node as the sole voter if no
    /// durable state is already present.
    #[arg(long)]
    pub bootstrap: bool,

    /// Shared secret peers must present on the consensus stream layer.
    #[arg(long, default_value = "")]
    pub secret: String,
}

impl BackendArgs {
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr.ip(), self.rpc_port)
    }
}

/// Flags for the frontend (WebSocket fan-out) process.
#[derive(Debug, Parser)]
#[command(name = "hangman-frontend", about = "WebSocket frontend for the hangman backend")]
pub struct FrontendArgs {
    /// Port the WebSocket server listens on.
    #[arg(long, default_value_t = 4000)]
    pub port: u16,

    /// Comma-separated backend RPC addresses. If omitted, the frontend
    /// discovers servers via the registry instead.
    #[arg(long, value_delimiter = ',')]
    pub backend_addr: Vec<SocketAddr>,
}
