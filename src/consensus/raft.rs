//! The replicated log itself: leader election, `AppendEntries` replication,
//! commit-index advancement and snapshotting. Generalizes the teacher's
//! `Server`/`ServerState`/`start_server` (`src/server/mod.rs`) from a
//! fixed two-RPC demo into the full contract spec.md §4.2 describes
//! (`Submit`/`WaitForLeader`/`Join`/`Leave`/`Servers`/`Close`), still driven
//! by the same single main-loop-thread-owns-all-mutation shape.

use crate::consensus::log::{ConfigChange, Entry, FileLog, Log, LogPayload, MemoryLog};
use crate::consensus::peer::{
    AppendEntriesReply, AppendEntriesRequest, PeerHandle, PeerReply, PeerThreadMessage,
    RequestVoteReply, RequestVoteRequest, VoteEnvelope, OPCODE_APPEND_ENTRIES, OPCODE_REQUEST_VOTE,
};
use crate::consensus::storage::{SnapshotMeta, SnapshotStore, StableStore};
use crate::error::RaftError;
use crate::game::{Command, Game, GameStateMachine, SnapshotBlob};
use crate::mux::Listener;
use crate::rpc::server::{RpcObject, RpcServer};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(300);
const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(600);
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);
/// Compact the log (and trim it) after this many newly-committed entries.
const SNAPSHOT_EVERY: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Follower,
    Candidate,
    Leader,
}

/// spec.md §3 `ServerEntry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub node_id: String,
    pub rpc_addr: SocketAddr,
    pub is_leader: bool,
}

pub struct RaftConfig {
    pub node_id: String,
    pub rpc_addr: SocketAddr,
    pub data_dir: Option<PathBuf>,
    pub bootstrap: bool,
    pub secret: String,
}

struct ServerState {
    role: Role,
    current_term: u64,
    commit_index: u64,
    last_applied: u64,
    last_leader_contact: Instant,
    election_timeout: Duration,
    leader_hint: Option<SocketAddr>,
    /// `node_id -> rpc_addr`, including self; the current voter set.
    voters: HashMap<String, SocketAddr>,
    votes_received: std::collections::HashSet<String>,
}

type Waiters = HashMap<u64, Vec<Sender<Result<(), RaftError>>>>;

struct RaftInner {
    id: String,
    advertise_addr: SocketAddr,
    state: Mutex<ServerState>,
    leader_cv: Condvar,
    log: Mutex<Box<dyn Log>>,
    stable: Mutex<StableStore>,
    snapshots: SnapshotStore,
    fsm: Mutex<GameStateMachine>,
    peers: Mutex<HashMap<String, PeerHandle>>,
    waiters: Mutex<Waiters>,
    to_main: Sender<ControlMessage>,
    closed: Mutex<bool>,
}

enum ControlMessage {
    PeerReply(PeerReply),
    Propose {
        payload: LogPayload,
        respond: Sender<Result<(), RaftError>>,
    },
    Shutdown,
}

/// Public handle to a running consensus engine; cheaply `Clone`able (all
/// state lives behind the shared `RaftInner`).
#[derive(Clone)]
pub struct Raft {
    inner: Arc<RaftInner>,
}

impl Raft {
    /// Boots the engine and starts its background threads. `raft_listener`
    /// is the raft-tagged sub-listener handed out by the port multiplexer
    /// (spec.md §4.3); this call registers the `AppendEntries`/
    /// `RequestVote` RPC handlers on it and spawns the main loop.
    pub fn start(config: RaftConfig, raft_listener: impl Listener + Send + 'static) -> std::io::Result<Self> {
        let data_dir = config.data_dir.clone();
        let (log, stable, snapshots, restored_blob, snapshot_index, recovered): (
            Box<dyn Log>,
            StableStore,
            SnapshotStore,
            Option<SnapshotBlob>,
            u64,
            bool,
        ) = match &data_dir {
            Some(dir) => {
                let raft_dir = dir.join("raft");
                std::fs::create_dir_all(&raft_dir)?;
                let stable = StableStore::open(raft_dir.join("stable"))?;
                let file_log = FileLog::open(raft_dir.join("store"))?;
                let snapshots = SnapshotStore::open(raft_dir.join("log"))?;
                let recovered = file_log.last_index() > 0 || stable.current_term() > 0;
                let (snapshot_index, blob) = match snapshots.load()? {
                    Some((meta, blob)) => (meta.last_included_index, Some(blob)),
                    None => (0, None),
                };
                (Box::new(file_log), stable, snapshots, blob, snapshot_index, recovered)
            }
            None => {
                let tmp = std::env::temp_dir().join(format!("hangman-raft-{}", config.node_id));
                (
                    Box::new(MemoryLog::new()),
                    StableStore::open(tmp.join("stable")).unwrap_or_else(|_| {
                        StableStore::open(std::env::temp_dir()).expect("temp dir is writable")
                    }),
                    SnapshotStore::open(&tmp).unwrap_or_else(|_| {
                        SnapshotStore::open(std::env::temp_dir()).expect("temp dir is writable")
                    }),
                    None,
                    0,
                    false,
                )
            }
        };

        let mut fsm = GameStateMachine::new(config.secret.clone());
        if let Some(blob) = restored_blob {
            fsm.restore(&blob)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        }

        // Reconstruct the voter set from whatever config-change entries
        // remain in the log. A membership change old enough to fall before
        // the last snapshot's boundary won't be seen here: the snapshot
        // blob only covers game state, not membership (documented in
        // DESIGN.md). In practice administrative voter changes are rare
        // enough relative to the compaction interval that this is not a
        // problem in steady state.
        let mut voters = HashMap::new();
        voters.insert(config.node_id.clone(), config.rpc_addr);
        for entry in log.entries_from(1) {
            if let LogPayload::Config(change) = entry.payload {
                match change {
                    ConfigChange::AddVoter { node_id, rpc_addr } => {
                        voters.insert(node_id, rpc_addr);
                    }
                    ConfigChange::RemoveServer { node_id } => {
                        voters.remove(&node_id);
                    }
                }
            }
        }

        // spec.md §4.2: "if absent and the process was started with the
        // bootstrap flag, it forms a single-node cluster with itself as the
        // sole voter". If durable state already exists, rejoin as a
        // follower with no opinion on the voter set yet (it arrives via
        // AppendEntries).
        let role = if !recovered && config.bootstrap {
            Role::Leader
        } else {
            Role::Follower
        };

        let (to_main, from_main) = mpsc::channel();

        let inner = Arc::new(RaftInner {
            id: config.node_id.clone(),
            advertise_addr: config.rpc_addr,
            state: Mutex::new(ServerState {
                role,
                current_term: stable.current_term(),
                commit_index: snapshot_index,
                last_applied: snapshot_index,
                last_leader_contact: Instant::now(),
                election_timeout: random_election_timeout(),
                leader_hint: if role == Role::Leader { Some(config.rpc_addr) } else { None },
                voters,
                votes_received: Default::default(),
            }),
            leader_cv: Condvar::new(),
            log,
            stable: Mutex::new(stable),
            snapshots,
            fsm: Mutex::new(fsm),
            peers: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            to_main,
            closed: Mutex::new(false),
        });

        let mut server = RpcServer::new();
        server.register(
            OPCODE_APPEND_ENTRIES,
            Box::new(AppendEntriesHandler { inner: inner.clone() }),
        );
        server.register(
            OPCODE_REQUEST_VOTE,
            Box::new(RequestVoteHandler { inner: inner.clone() }),
        );
        Arc::new(server).serve(raft_listener);

        let loop_inner = inner.clone();
        thread::spawn(move || main_loop(loop_inner, from_main));

        Ok(Raft { inner })
    }

    /// spec.md §4.2 `Submit`.
    pub fn submit(&self, command: Command, timeout: Duration) -> Result<(), RaftError> {
        let payload = LogPayload::Command(command.encode());
        self.propose(payload, timeout)
    }

    /// spec.md §4.2 `WaitForLeader`.
    pub fn wait_for_leader(&self, timeout: Duration) -> Result<(), RaftError> {
        let mut state = self.inner.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while state.leader_hint.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RaftError::Timeout);
            }
            let (guard, result) = self.inner.leader_cv.wait_timeout(state, remaining).unwrap();
            state = guard;
            if result.timed_out() && state.leader_hint.is_none() {
                return Err(RaftError::Timeout);
            }
        }
        Ok(())
    }

    /// spec.md §4.2 `Join`. "on conflict (same id, different address, or
    /// vice-versa) the existing entry is removed before the new one is
    /// added. Idempotent if the exact pair is already present."
    pub fn join(&self, node_id: String, rpc_addr: SocketAddr, timeout: Duration) -> Result<(), RaftError> {
        {
            let state = self.inner.state.lock().unwrap();
            if state.voters.get(&node_id) == Some(&rpc_addr) {
                return Ok(()); // already present, exact pair: idempotent
            }
        }
        let remove_first = {
            let state = self.inner.state.lock().unwrap();
            state.voters.iter().any(|(id, addr)| {
                (id == &node_id && addr != &rpc_addr) || (id != &node_id && addr == &rpc_addr)
            })
        };
        if remove_first {
            if let Some((conflicting_id, _)) = {
                let state = self.inner.state.lock().unwrap();
                state
                    .voters
                    .iter()
                    .find(|(id, addr)| (*id == &node_id && *addr != &rpc_addr) || (*id != &node_id && *addr == &rpc_addr))
                    .map(|(id, addr)| (id.clone(), *addr))
            } {
                self.propose(
                    LogPayload::Config(ConfigChange::RemoveServer { node_id: conflicting_id }),
                    timeout,
                )?;
            }
        }
        self.propose(
            LogPayload::Config(ConfigChange::AddVoter { node_id, rpc_addr }),
            timeout,
        )
    }

    /// spec.md §4.2 `Leave`.
    pub fn leave(&self, node_id: String, timeout: Duration) -> Result<(), RaftError> {
        self.propose(LogPayload::Config(ConfigChange::RemoveServer { node_id }), timeout)
    }

    /// spec.md §4.2 `Servers`.
    pub fn servers(&self) -> Vec<ServerEntry> {
        let state = self.inner.state.lock().unwrap();
        let is_leader_self = state.role == Role::Leader;
        state
            .voters
            .iter()
            .map(|(id, addr)| ServerEntry {
                node_id: id.clone(),
                rpc_addr: *addr,
                is_leader: (*id == self.inner.id && is_leader_self)
                    || state.leader_hint == Some(*addr),
            })
            .collect()
    }

    /// A consistent snapshot of the locally-applied `Game` (spec.md §4.6
    /// `Receive`).
    pub fn read_game(&self) -> Game {
        self.inner.fsm.lock().unwrap().read()
    }

    pub fn node_id(&self) -> &str {
        &self.inner.id
    }

    pub fn advertise_addr(&self) -> SocketAddr {
        self.inner.advertise_addr
    }

    /// spec.md §4.2 `Close`: stop accepting commands, flush, release
    /// resources.
    pub fn close(&self) {
        let mut closed = self.inner.closed.lock().unwrap();
        if *closed {
            return;
        }
        *closed = true;
        let _ = self.inner.to_main.send(ControlMessage::Shutdown);
        self.inner.peers.lock().unwrap().clear(); // joins peer threads via Drop
    }

    fn propose(&self, payload: LogPayload, timeout: Duration) -> Result<(), RaftError> {
        if *self.inner.closed.lock().unwrap() {
            return Err(RaftError::Shutdown);
        }
        let (tx, rx) = mpsc::channel();
        self.inner
            .to_main
            .send(ControlMessage::Propose { payload, respond: tx })
            .map_err(|_| RaftError::Shutdown)?;
        rx.recv_timeout(timeout).unwrap_or(Err(RaftError::Timeout))
    }
}

fn random_election_timeout() -> Duration {
    let millis = rand::thread_rng().gen_range(
        ELECTION_TIMEOUT_MIN.as_millis() as u64..=ELECTION_TIMEOUT_MAX.as_millis() as u64,
    );
    Duration::from_millis(millis)
}

// ---------------------------------------------------------------------
// RPC handlers: mirror the teacher's `AppendEntriesHandler`/
// `RequestVoteHandler`, which lock state (and log) directly rather than
// routing through the main loop's channel — these are pure responders to
// an existing leader/candidate, not state transitions the leader drives.
// ---------------------------------------------------------------------

struct AppendEntriesHandler {
    inner: Arc<RaftInner>,
}

impl RpcObject for AppendEntriesHandler {
    fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, crate::error::RpcError> {
        let req: AppendEntriesRequest = bincode::deserialize(payload)?;
        let reply = self.inner.handle_append_entries(req);
        Ok(bincode::serialize(&reply)?)
    }
}

struct RequestVoteHandler {
    inner: Arc<RaftInner>,
}

impl RpcObject for RequestVoteHandler {
    fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, crate::error::RpcError> {
        let req: VoteEnvelope = bincode::deserialize(payload)?;
        let reply = self.inner.handle_request_vote(req);
        Ok(bincode::serialize(&reply)?)
    }
}

impl RaftInner {
    fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesReply {
        let mut state = self.state.lock().unwrap();
        if req.term < state.current_term {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                match_index: 0,
            };
        }
        if req.term > state.current_term || state.role != Role::Follower {
            state.current_term = req.term;
            state.role = Role::Follower;
            self.persist_term(req.term, None);
        }
        state.last_leader_contact = Instant::now();
        state.election_timeout = random_election_timeout();
        state.leader_hint = state.voters.get(&req.leader_id).copied();
        self.leader_cv.notify_all();

        let mut log = self.log.lock().unwrap();
        let prev_ok = req.prev_log_index == 0
            || log
                .term_at(req.prev_log_index)
                .map(|t| t == req.prev_log_term)
                .unwrap_or(false);
        if !prev_ok {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                match_index: log.last_index().min(req.prev_log_index.saturating_sub(1)),
            };
        }
        log.append(req.entries);
        let match_index = log.last_index();
        drop(log);

        if req.leader_commit > state.commit_index {
            state.commit_index = req.leader_commit.min(match_index);
        }
        let commit_index = state.commit_index;
        drop(state);
        self.apply_up_to(commit_index);

        AppendEntriesReply {
            term: self.state.lock().unwrap().current_term,
            success: true,
            match_index,
        }
    }

    fn handle_request_vote(&self, req: VoteEnvelope) -> RequestVoteReply {
        let mut state = self.state.lock().unwrap();
        let VoteEnvelope { candidate_id, inner } = req;
        if inner.term < state.current_term {
            return RequestVoteReply {
                term: state.current_term,
                vote_granted: false,
            };
        }
        if inner.term > state.current_term {
            state.current_term = inner.term;
            state.role = Role::Follower;
            self.persist_term(inner.term, None);
        }
        let stable = self.stable.lock().unwrap();
        let already_voted_other = stable
            .voted_for()
            .map(|v| v != candidate_id)
            .unwrap_or(false);
        drop(stable);

        let log = self.log.lock().unwrap();
        let candidate_up_to_date = inner.last_log_term > log.last_term()
            || (inner.last_log_term == log.last_term() && inner.last_log_index >= log.last_index());
        drop(log);

        let vote_granted = !already_voted_other && candidate_up_to_date;
        if vote_granted {
            state.last_leader_contact = Instant::now();
            state.election_timeout = random_election_timeout();
            self.persist_term(state.current_term, Some(candidate_id));
        }
        RequestVoteReply {
            term: state.current_term,
            vote_granted,
        }
    }

    fn persist_term(&self, term: u64, voted_for: Option<String>) {
        if let Err(e) = self.stable.lock().unwrap().persist(term, voted_for) {
            log::error!("failed to persist raft term/vote: {e}");
        }
    }

    /// Applies every committed-but-not-yet-applied entry, in order, and
    /// resolves any `Submit`/`Join`/`Leave` waiter for that index.
    fn apply_up_to(&self, commit_index: u64) {
        let start = {
            let state = self.state.lock().unwrap();
            state.last_applied + 1
        };
        if start > commit_index {
            return;
        }
        let entries: Vec<Entry> = {
            let log = self.log.lock().unwrap();
            (start..=commit_index).filter_map(|i| log.get(i)).collect()
        };
        for entry in &entries {
            match &entry.payload {
                LogPayload::Command(bytes) => match Command::decode(bytes) {
                    Ok(command) => self.fsm.lock().unwrap().apply(&command),
                    Err(e) => log::error!("dropping malformed log entry {}: {e}", entry.index),
                },
                LogPayload::Config(change) => self.apply_config_change(change),
                LogPayload::Noop => {}
            }
            self.state.lock().unwrap().last_applied = entry.index;
            self.resolve_waiters(entry.index, Ok(()));
        }
        self.maybe_snapshot();
    }

    fn apply_config_change(&self, change: &ConfigChange) {
        let mut state = self.state.lock().unwrap();
        match change {
            ConfigChange::AddVoter { node_id, rpc_addr } => {
                state.voters.insert(node_id.clone(), *rpc_addr);
                log::info!("voter added: {node_id} at {rpc_addr}");
            }
            ConfigChange::RemoveServer { node_id } => {
                state.voters.remove(node_id);
                log::info!("voter removed: {node_id}");
                drop(state);
                // Dropping a peer thread that was never spawned (removing
                // self, or a node we never connected to) is a no-op.
                self.peers.lock().unwrap().remove(node_id);
                return;
            }
        }
    }

    fn resolve_waiters(&self, index: u64, result: Result<(), RaftError>) {
        if let Some(senders) = self.waiters.lock().unwrap().remove(&index) {
            for tx in senders {
                let _ = tx.send(result.clone());
            }
        }
    }

    fn maybe_snapshot(&self) {
        let (last_applied, last_index_before_compaction) = {
            let state = self.state.lock().unwrap();
            (state.last_applied, state.last_applied)
        };
        if last_applied == 0 || last_applied % SNAPSHOT_EVERY != 0 {
            return;
        }
        let term = {
            let log = self.log.lock().unwrap();
            log.term_at(last_applied).unwrap_or(0)
        };
        let blob = self.fsm.lock().unwrap().snapshot();
        if let Err(e) = self.snapshots.persist(
            SnapshotMeta {
                last_included_index: last_applied,
                last_included_term: term,
            },
            blob,
        ) {
            log::error!("snapshot persist failed: {e}");
            return;
        }
        // `index` here is "the lowest index to keep": pass last_applied + 1 so
        // the snapshot boundary covers everything up to and including
        // last_applied, exactly what the snapshot blob already contains.
        self.log.lock().unwrap().truncate_before(last_index_before_compaction + 1);
    }
}

// ---------------------------------------------------------------------
// Main loop: the only thread that drives elections, heartbeats, and log
// appends for proposals — mirrors the teacher's `start_server` loop.
// ---------------------------------------------------------------------

fn main_loop(inner: Arc<RaftInner>, rx: Receiver<ControlMessage>) {
    let mut last_heartbeat = Instant::now();
    loop {
        if *inner.closed.lock().unwrap() {
            return;
        }
        let role = inner.state.lock().unwrap().role;
        let wait_for = match role {
            Role::Follower => {
                let state = inner.state.lock().unwrap();
                state
                    .election_timeout
                    .saturating_sub(state.last_leader_contact.elapsed())
            }
            Role::Candidate => Duration::from_millis(50),
            Role::Leader => HEARTBEAT_INTERVAL.saturating_sub(last_heartbeat.elapsed()),
        };

        match rx.recv_timeout(wait_for) {
            Ok(ControlMessage::Shutdown) => return,
            Ok(ControlMessage::PeerReply(reply)) => handle_peer_reply(&inner, reply),
            Ok(ControlMessage::Propose { payload, respond }) => {
                handle_propose(&inner, payload, respond);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => match role {
                Role::Follower => become_candidate(&inner),
                Role::Candidate => {
                    let timed_out = {
                        let state = inner.state.lock().unwrap();
                        state.last_leader_contact.elapsed() >= state.election_timeout
                    };
                    if timed_out {
                        become_candidate(&inner);
                    }
                }
                Role::Leader => {
                    replicate_to_all(&inner);
                    last_heartbeat = Instant::now();
                }
            },
        }
    }
}

fn become_candidate(inner: &Arc<RaftInner>) {
    let (term, last_log_index, last_log_term, voter_ids) = {
        let mut state = inner.state.lock().unwrap();
        state.role = Role::Candidate;
        state.current_term += 1;
        state.leader_hint = None;
        state.last_leader_contact = Instant::now();
        state.election_timeout = random_election_timeout();
        state.votes_received.clear();
        state.votes_received.insert(inner.id.clone());
        let log = inner.log.lock().unwrap();
        (
            state.current_term,
            log.last_index(),
            log.last_term(),
            state.voters.keys().cloned().collect::<Vec<_>>(),
        )
    };
    inner.persist_term(term, Some(inner.id.clone()));
    log::info!("{} became candidate for term {term}", inner.id);

    if voter_ids.len() <= 1 {
        // single-node cluster: win immediately
        become_leader(inner, term);
        return;
    }

    ensure_peer_threads(inner);
    let peers = inner.peers.lock().unwrap();
    for peer in peers.values() {
        let _ = peer.to_peer.send(PeerThreadMessage::RequestVote(RequestVoteRequest {
            term,
            last_log_index,
            last_log_term,
        }));
    }
}

fn become_leader(inner: &Arc<RaftInner>, term: u64) {
    let mut state = inner.state.lock().unwrap();
    if state.current_term != term || state.role == Role::Leader {
        return;
    }
    state.role = Role::Leader;
    state.leader_hint = Some(inner.advertise_addr);
    let last_index = inner.log.lock().unwrap().last_index();
    drop(state);
    inner.leader_cv.notify_all();
    log::info!("{} became leader for term {term}", inner.id);

    let mut peers = inner.peers.lock().unwrap();
    for peer in peers.values_mut() {
        peer.next_index = last_index + 1;
        peer.match_index = 0;
    }
    drop(peers);
    replicate_to_all(inner);
}

fn ensure_peer_threads(inner: &Arc<RaftInner>) {
    let voters = inner.state.lock().unwrap().voters.clone();
    let mut peers = inner.peers.lock().unwrap();
    peers.retain(|id, _| voters.contains_key(id));
    for (id, addr) in voters {
        if id == inner.id || peers.contains_key(&id) {
            continue;
        }
        let to_main = rpc_reply_forwarder(inner.clone());
        peers.insert(id.clone(), PeerHandle::spawn(id, addr, to_main, inner.id.clone()));
    }
}

/// A small adapter thread turning `PeerReply`s into `ControlMessage`s on the
/// main loop's channel, so peer threads never need to know about the main
/// loop's channel type directly.
fn rpc_reply_forwarder(inner: Arc<RaftInner>) -> Sender<PeerReply> {
    let (tx, rx) = mpsc::channel::<PeerReply>();
    let to_main = inner.to_main.clone();
    thread::spawn(move || {
        while let Ok(reply) = rx.recv() {
            if to_main.send(ControlMessage::PeerReply(reply)).is_err() {
                return;
            }
        }
    });
    tx
}

fn handle_peer_reply(inner: &Arc<RaftInner>, reply: PeerReply) {
    match reply {
        PeerReply::RequestVote { peer_id, reply } => {
            let mut state = inner.state.lock().unwrap();
            if reply.term > state.current_term {
                state.current_term = reply.term;
                state.role = Role::Follower;
                drop(state);
                inner.persist_term(reply.term, None);
                return;
            }
            if state.role != Role::Candidate || reply.term != state.current_term {
                return;
            }
            if reply.vote_granted {
                state.votes_received.insert(peer_id);
                let majority = state.voters.len() / 2 + 1;
                if state.votes_received.len() >= majority {
                    let term = state.current_term;
                    drop(state);
                    become_leader(inner, term);
                }
            }
        }
        PeerReply::AppendEntries { peer_id, reply } => {
            let mut state = inner.state.lock().unwrap();
            if reply.term > state.current_term {
                state.current_term = reply.term;
                state.role = Role::Follower;
                state.leader_hint = None;
                drop(state);
                inner.persist_term(reply.term, None);
                return;
            }
            if state.role != Role::Leader {
                return;
            }
            drop(state);

            let mut peers = inner.peers.lock().unwrap();
            if let Some(peer) = peers.get_mut(&peer_id) {
                if reply.success {
                    peer.match_index = reply.match_index;
                    peer.next_index = reply.match_index + 1;
                } else {
                    peer.next_index = peer.next_index.saturating_sub(1).max(1);
                }
            }
            advance_commit_index(inner, &peers);
        }
    }
}

fn advance_commit_index(inner: &Arc<RaftInner>, peers: &HashMap<String, PeerHandle>) {
    let mut state = inner.state.lock().unwrap();
    if state.role != Role::Leader {
        return;
    }
    let self_match_index = inner.log.lock().unwrap().last_index();
    let mut match_indices: Vec<u64> = peers.values().map(|p| p.match_index).collect();
    match_indices.push(self_match_index);
    match_indices.sort_unstable();
    let median = match_indices[(match_indices.len() - 1) / 2];

    let current_term_at_median = inner.log.lock().unwrap().term_at(median);
    // Raft safety: a leader only commits entries from its own term directly.
    if median > state.commit_index && current_term_at_median == Some(state.current_term) {
        state.commit_index = median;
        let commit_index = state.commit_index;
        drop(state);
        inner.apply_up_to(commit_index);
    }
}

fn replicate_to_all(inner: &Arc<RaftInner>) {
    ensure_peer_threads(inner);
    let (term, commit_index, leader_id) = {
        let state = inner.state.lock().unwrap();
        (state.current_term, state.commit_index, inner.id.clone())
    };
    let peers = inner.peers.lock().unwrap();
    let log = inner.log.lock().unwrap();
    for peer in peers.values() {
        let prev_log_index = peer.next_index.saturating_sub(1);
        let prev_log_term = log.term_at(prev_log_index).unwrap_or(0);
        let entries = log.entries_from(peer.next_index);
        let _ = peer.to_peer.send(PeerThreadMessage::AppendEntries(AppendEntriesRequest {
            term,
            leader_id: leader_id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: commit_index,
        }));
    }
}

fn handle_propose(inner: &Arc<RaftInner>, payload: LogPayload, respond: Sender<Result<(), RaftError>>) {
    let mut state = inner.state.lock().unwrap();
    if state.role != Role::Leader {
        let hint = state.leader_hint;
        drop(state);
        let _ = respond.send(Err(RaftError::not_leader(hint)));
        return;
    }
    let term = state.current_term;
    drop(state);

    let index = {
        let mut log = inner.log.lock().unwrap();
        let index = log.last_index() + 1;
        log.append(vec![Entry { index, term, payload }]);
        index
    };
    inner.waiters.lock().unwrap().entry(index).or_default().push(respond);

    // Single-voter clusters never hear back from peers; apply immediately.
    let is_single_voter = inner.state.lock().unwrap().voters.len() <= 1;
    if is_single_voter {
        let mut state = inner.state.lock().unwrap();
        state.commit_index = index;
        drop(state);
        inner.apply_up_to(index);
    } else {
        replicate_to_all(inner);
    }
}
