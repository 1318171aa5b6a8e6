//! Per-peer replication thread. Generalizes the teacher's `Peer`/`PeerHandle`
//! (`src/server/peer.rs`): one background thread per voter, talking to it
//! over the consensus stream layer, forwarding replies back to the main
//! loop over a channel rather than ever touching shared state directly.

use crate::consensus::log::Entry;
use crate::rpc::wire;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const OPCODE_APPEND_ENTRIES: u16 = 0;
pub const OPCODE_REQUEST_VOTE: u16 = 1;

const RPC_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// Index of the last log entry the follower now holds that matches the
    /// leader's log; lets the leader advance `match_index` in one round
    /// trip instead of one entry at a time.
    pub match_index: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug)]
pub enum PeerThreadMessage {
    AppendEntries(AppendEntriesRequest),
    RequestVote(RequestVoteRequest),
    Shutdown,
}

#[derive(Debug)]
pub enum PeerReply {
    AppendEntries {
        peer_id: String,
        reply: AppendEntriesReply,
    },
    RequestVote {
        peer_id: String,
        reply: RequestVoteReply,
    },
}

/// Main-thread-side view of a peer: where to reach it, and the replication
/// bookkeeping the leader keeps about it (spec.md-equivalent to hashicorp
/// raft's `nextIndex`/`matchIndex`).
pub struct PeerHandle {
    pub node_id: String,
    pub rpc_addr: SocketAddr,
    pub to_peer: Sender<PeerThreadMessage>,
    pub next_index: u64,
    pub match_index: u64,
    thread: Option<JoinHandle<()>>,
}

impl PeerHandle {
    pub fn spawn(node_id: String, rpc_addr: SocketAddr, to_main: Sender<PeerReply>, candidate_id: String) -> Self {
        let (to_peer, from_main) = std::sync::mpsc::channel();
        let peer_id = node_id.clone();
        let thread = thread::spawn(move || peer_main(peer_id, rpc_addr, candidate_id, from_main, to_main));
        PeerHandle {
            node_id,
            rpc_addr,
            to_peer,
            next_index: 1,
            match_index: 0,
            thread: Some(thread),
        }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        let _ = self.to_peer.send(PeerThreadMessage::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn peer_main(
    peer_id: String,
    addr: SocketAddr,
    my_id: String,
    from_main: Receiver<PeerThreadMessage>,
    to_main: Sender<PeerReply>,
) {
    loop {
        match from_main.recv() {
            Ok(PeerThreadMessage::AppendEntries(req)) => {
                if let Some(reply) = send_append_entries(addr, &req) {
                    let _ = to_main.send(PeerReply::AppendEntries {
                        peer_id: peer_id.clone(),
                        reply,
                    });
                }
            }
            Ok(PeerThreadMessage::RequestVote(req)) => {
                let req = VoteEnvelope {
                    candidate_id: my_id.clone(),
                    inner: req,
                };
                if let Some(reply) = send_request_vote(addr, &req) {
                    let _ = to_main.send(PeerReply::RequestVote {
                        peer_id: peer_id.clone(),
                        reply,
                    });
                }
            }
            Ok(PeerThreadMessage::Shutdown) | Err(_) => return,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEnvelope {
    pub candidate_id: String,
    pub inner: RequestVoteRequest,
}

fn send_append_entries(addr: SocketAddr, req: &AppendEntriesRequest) -> Option<AppendEntriesReply> {
    let payload = bincode::serialize(req).ok()?;
    dial_and_call(addr, OPCODE_APPEND_ENTRIES, payload)
}

fn send_request_vote(addr: SocketAddr, req: &VoteEnvelope) -> Option<RequestVoteReply> {
    let payload = bincode::serialize(req).ok()?;
    dial_and_call(addr, OPCODE_REQUEST_VOTE, payload)
}

fn dial_and_call<T: for<'de> Deserialize<'de>>(addr: SocketAddr, opcode: u16, payload: Vec<u8>) -> Option<T> {
    // `tagged = true` prepends the marker byte the receiving node's port
    // multiplexer looks for (spec.md §4.3/§6).
    let bytes = wire::call(addr, true, opcode, payload, RPC_TIMEOUT).ok()?;
    bincode::deserialize(&bytes).ok()
}
