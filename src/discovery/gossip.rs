//! Wire messages and the local membership table for the gossip layer.
//! Loosely modeled on SWIM-style ping/ack gossip (see the `GossipMessage`
//! shape in `examples/other_examples/.../gossip.rs`), simplified to the
//! thread + `UdpSocket` style the rest of this crate uses instead of tokio.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A node this process currently believes is part of the cluster.
/// `gossip_addr` is the UDP address the gossip listener binds (spec.md
/// §4.4's `bind_addr`) — pings/acks go here. `rpc_addr` is the TCP mux
/// address (the §4.4 `tags.rpc_addr`), carried only so `Handler::join` can
/// register the node as a voter; it is never dialed by the gossip layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub node_id: String,
    pub gossip_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Sent to a seed or a peer we haven't pinged in a while; carries our
    /// own membership view so both sides converge.
    Ping { sender: Member, known: Vec<Member> },
    Ack { sender: Member, known: Vec<Member> },
}

struct Record {
    member: Member,
    last_seen: Instant,
}

/// How long without an `Ack` before a member is declared dead (spec.md's
/// discovery module: failure detection must be bounded, not indefinite).
pub const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Local view of the cluster, keyed by node id. Not shared across threads
/// directly — callers wrap it in a `Mutex` (see `discovery::Discovery`).
#[derive(Default)]
pub struct MemberTable {
    records: HashMap<String, Record>,
}

impl MemberTable {
    pub fn new() -> Self {
        MemberTable { records: HashMap::new() }
    }

    /// Returns `true` if this is a node we hadn't seen before.
    pub fn observe(&mut self, member: Member) -> bool {
        let is_new = !self.records.contains_key(&member.node_id);
        self.records.insert(
            member.node_id.clone(),
            Record { member, last_seen: Instant::now() },
        );
        is_new
    }

    pub fn touch(&mut self, node_id: &str) {
        if let Some(record) = self.records.get_mut(node_id) {
            record.last_seen = Instant::now();
        }
    }

    /// Drains and returns every member that hasn't been heard from within
    /// `SUSPECT_TIMEOUT`, removing them from the table.
    pub fn reap_dead(&mut self) -> Vec<Member> {
        let dead: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| r.last_seen.elapsed() > SUSPECT_TIMEOUT)
            .map(|(id, _)| id.clone())
            .collect();
        dead.into_iter()
            .filter_map(|id| self.records.remove(&id).map(|r| r.member))
            .collect()
    }

    pub fn members(&self) -> Vec<Member> {
        self.records.values().map(|r| r.member.clone()).collect()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.records.contains_key(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Member {
        Member {
            node_id: id.to_string(),
            gossip_addr: "127.0.0.1:8000".parse().unwrap(),
            rpc_addr: "127.0.0.1:9000".parse().unwrap(),
        }
    }

    #[test]
    fn observe_reports_novelty_once() {
        let mut table = MemberTable::new();
        assert!(table.observe(member("a")));
        assert!(!table.observe(member("a")));
    }

    #[test]
    fn members_lists_everything_observed() {
        let mut table = MemberTable::new();
        table.observe(member("a"));
        table.observe(member("b"));
        let mut ids: Vec<String> = table.members().into_iter().map(|m| m.node_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
