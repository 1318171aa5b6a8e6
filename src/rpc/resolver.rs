//! Leader-aware client-side load balancer (spec.md §4.5): a frontend or CLI
//! client doesn't know which node is the leader ahead of time, so it tries
//! its cached guess first, follows `NotLeader` hints when it gets them, and
//! falls back to round-robining the last known server list otherwise.
//!
//! Generalizes the teacher's `rpc::client::Rpc` (a single fixed-address
//! connection) into something that can recover from talking to a follower
//! or a server that's gone away.

use crate::rpc::service::{
    GameView, GetServersReply, ResetReply, SendReply, SendRequest, OPCODE_GET_SERVERS,
    OPCODE_RECEIVE, OPCODE_RESET, OPCODE_SEND,
};
use crate::rpc::wire;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

const CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Every known server was unreachable, or the one leader hint we were
    /// given also bounced us without ever committing the call.
    NoLeaderFound,
}

impl std::fmt::Display for ResolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolverError::NoLeaderFound => write!(f, "no reachable leader among known servers"),
        }
    }
}

impl std::error::Error for ResolverError {}

struct ResolverState {
    /// Every address the resolver has ever heard about, leader guess first.
    known: Vec<SocketAddr>,
}

pub struct Resolver {
    state: Mutex<ResolverState>,
}

impl Resolver {
    pub fn new(seeds: Vec<SocketAddr>) -> Self {
        Resolver {
            state: Mutex::new(ResolverState { known: seeds }),
        }
    }

    pub fn send_letter(&self, letter: &str) -> Result<GameView, ResolverError> {
        let payload = bincode::serialize(&SendRequest { letter: letter.to_string() })
            .expect("SendRequest serialization is infallible");
        let reply = self.call_any(OPCODE_SEND, payload.clone(), |bytes| {
            bincode::deserialize::<SendReply>(bytes).ok()
        })?;
        self.follow_hint_if_needed(reply, |hint| {
            wire::call(hint, false, OPCODE_SEND, payload, CALL_TIMEOUT)
                .ok()
                .and_then(|bytes| bincode::deserialize::<SendReply>(&bytes).ok())
        })
    }

    pub fn reset(&self) -> Result<GameView, ResolverError> {
        let reply = self
            .call_any(OPCODE_RESET, Vec::new(), |bytes| {
                bincode::deserialize::<ResetReply>(bytes).ok().map(|r| r.0)
            })?;
        self.follow_hint_if_needed(reply, |hint| {
            wire::call(hint, false, OPCODE_RESET, Vec::new(), CALL_TIMEOUT)
                .ok()
                .and_then(|bytes| bincode::deserialize::<ResetReply>(&bytes).ok())
                .map(|r| r.0)
        })
    }

    pub fn receive(&self) -> Result<GameView, ResolverError> {
        self.call_any(OPCODE_RECEIVE, Vec::new(), |bytes| {
            bincode::deserialize::<GameView>(bytes).ok()
        })
    }

    pub fn get_servers(&self) -> Result<Vec<crate::consensus::raft::ServerEntry>, ResolverError> {
        let reply = self.call_any(OPCODE_GET_SERVERS, Vec::new(), |bytes| {
            bincode::deserialize::<GetServersReply>(bytes).ok()
        })?;
        self.learn(reply.servers.iter().map(|s| s.rpc_addr).collect());
        // spec.md §4.5: prefer the server list's own leader flag over waiting
        // to get bounced by a NotLeader reply.
        if let Some(leader) = reply.servers.iter().find(|s| s.is_leader) {
            self.promote(leader.rpc_addr);
        }
        Ok(reply.servers)
    }

    /// If the reply we got back was `NotLeader` and carried a hint, makes
    /// one direct call to that hint before giving up; this is the entire
    /// point of tracking a leader hint at all (spec.md §4.5).
    fn follow_hint_if_needed(
        &self,
        reply: SendReply,
        retry: impl FnOnce(SocketAddr) -> Option<SendReply>,
    ) -> Result<GameView, ResolverError> {
        match reply {
            SendReply::Ok(view) => Ok(view),
            SendReply::NotLeader { hint: Some(hint) } => match retry(hint) {
                Some(SendReply::Ok(view)) => {
                    self.promote(hint);
                    Ok(view)
                }
                _ => Err(ResolverError::NoLeaderFound),
            },
            SendReply::NotLeader { hint: None } | SendReply::Timeout => {
                Err(ResolverError::NoLeaderFound)
            }
        }
    }

    /// Tries every known address, leader guess first, returning the first
    /// one that answers with a well-formed reply. A `NotLeader` reply still
    /// counts as "answered" here — following it is the caller's job.
    fn call_any<T>(
        &self,
        opcode: u16,
        payload: Vec<u8>,
        decode: impl Fn(&[u8]) -> Option<T>,
    ) -> Result<T, ResolverError> {
        let candidates = self.state.lock().unwrap().known.clone();
        for addr in candidates {
            if let Ok(bytes) = wire::call(addr, false, opcode, payload.clone(), CALL_TIMEOUT) {
                if let Some(decoded) = decode(&bytes) {
                    self.promote(addr);
                    return Ok(decoded);
                }
            }
        }
        Err(ResolverError::NoLeaderFound)
    }

    fn promote(&self, addr: SocketAddr) {
        let mut state = self.state.lock().unwrap();
        state.known.retain(|a| *a != addr);
        state.known.insert(0, addr);
    }

    fn learn(&self, addrs: Vec<SocketAddr>) {
        let mut state = self.state.lock().unwrap();
        for addr in addrs {
            if !state.known.contains(&addr) {
                state.known.push(addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_moves_address_to_front() {
        let a: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let resolver = Resolver::new(vec![a, b]);
        resolver.promote(b);
        assert_eq!(resolver.state.lock().unwrap().known, vec![b, a]);
    }

    #[test]
    fn learn_appends_unseen_addresses_only() {
        let a: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let resolver = Resolver::new(vec![a]);
        resolver.learn(vec![a, b]);
        assert_eq!(resolver.state.lock().unwrap().known, vec![a, b]);
    }
}
