//! Cluster membership discovery (spec.md §4.4): a gossip layer that finds
//! other nodes and detects failures, bridging `Join`/`Leave` events into the
//! consensus engine's voter set.
//!
//! Grounded on the teacher-adjacent `discovery.Discovery`/`discovery.Handler`
//! shape (`examples/original_source/internal/discovery/discovery.go`, a Serf
//! wrapper) for the module's public contract, and on
//! `examples/other_examples/.../gossip.rs`'s ping/ack message shape for the
//! wire protocol, reimplemented over `UdpSocket` + threads to match this
//! crate's concurrency model instead of tokio.

pub mod gossip;

use crate::error::RaftError;
use gossip::{GossipMessage, Member, MemberTable};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How often a node picks one known peer and pings it (spec.md §4.4's
/// discovery loop interval).
const GOSSIP_INTERVAL: Duration = Duration::from_secs(1);
const UDP_BUFFER_SIZE: usize = 4096;

/// What the gossip layer does once it decides a node joined or died.
/// Implemented by an adapter over `Raft` in the backend binary; kept as a
/// trait (rather than a direct `Raft` dependency) so the gossip loop can be
/// tested without a live consensus engine.
pub trait Handler: Send + Sync {
    fn join(&self, node_id: &str, rpc_addr: SocketAddr) -> Result<(), RaftError>;
    fn leave(&self, node_id: &str) -> Result<(), RaftError>;
}

pub struct DiscoveryConfig {
    pub node_id: String,
    pub bind_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    pub seeds: Vec<SocketAddr>,
}

pub struct Discovery {
    shutdown: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Discovery {
    /// Binds the gossip UDP socket and spawns the listener and prober
    /// threads. Mirrors the teacher-adjacent `discovery.New` + `setup`: bind,
    /// spawn the event loop, then join any configured seeds.
    pub fn start(config: DiscoveryConfig, handler: Arc<dyn Handler>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)?;
        socket.set_read_timeout(Some(GOSSIP_INTERVAL))?;
        let self_member = Member {
            node_id: config.node_id.clone(),
            gossip_addr: config.bind_addr,
            rpc_addr: config.rpc_addr,
        };
        let table = Arc::new(Mutex::new(MemberTable::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        for seed in &config.seeds {
            send_ping(&socket, &self_member, &table, *seed);
        }

        let listener_socket = socket.try_clone()?;
        let listener = {
            let table = table.clone();
            let handler = handler.clone();
            let self_member = self_member.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || listen_loop(listener_socket, self_member, table, handler, shutdown))
        };

        let prober = {
            let socket = socket.try_clone()?;
            let table = table.clone();
            let handler = handler.clone();
            let self_member = self_member.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || probe_loop(socket, self_member, table, handler, shutdown))
        };

        Ok(Discovery { shutdown, threads: vec![listener, prober] })
    }

    pub fn close(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

/// Bridges discovered `Join`/`Leave` events into a running `Raft` engine's
/// voter set (spec.md §4.4).
pub struct RaftHandler {
    raft: crate::consensus::raft::Raft,
}

impl RaftHandler {
    pub fn new(raft: crate::consensus::raft::Raft) -> Self {
        RaftHandler { raft }
    }
}

const JOIN_LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

impl Handler for RaftHandler {
    fn join(&self, node_id: &str, rpc_addr: SocketAddr) -> Result<(), RaftError> {
        self.raft.join(node_id.to_string(), rpc_addr, JOIN_LEAVE_TIMEOUT)
    }

    fn leave(&self, node_id: &str) -> Result<(), RaftError> {
        self.raft.leave(node_id.to_string(), JOIN_LEAVE_TIMEOUT)
    }
}

fn send_ping(socket: &UdpSocket, sender: &Member, table: &Arc<Mutex<MemberTable>>, to: SocketAddr) {
    let known = table.lock().unwrap().members();
    let message = GossipMessage::Ping { sender: sender.clone(), known };
    if let Ok(bytes) = bincode::serialize(&message) {
        let _ = socket.send_to(&bytes, to);
    }
}

fn send_ack(socket: &UdpSocket, sender: &Member, table: &Arc<Mutex<MemberTable>>, to: SocketAddr) {
    let known = table.lock().unwrap().members();
    let message = GossipMessage::Ack { sender: sender.clone(), known };
    if let Ok(bytes) = bincode::serialize(&message) {
        let _ = socket.send_to(&bytes, to);
    }
}

/// Folds a peer's reported membership view into our own table, joining the
/// consensus voter set for anything we hadn't seen before (spec.md §4.4:
/// "discovering a node is indistinguishable from being told about one
/// transitively").
fn merge_known(table: &Arc<Mutex<MemberTable>>, handler: &Arc<dyn Handler>, self_id: &str, known: Vec<Member>) {
    for member in known {
        if member.node_id == self_id {
            continue;
        }
        let is_new = table.lock().unwrap().observe(member.clone());
        if is_new {
            if let Err(e) = handler.join(&member.node_id, member.rpc_addr) {
                log::warn!("discovery: consensus join for {} failed: {e}", member.node_id);
            }
        }
    }
}

fn listen_loop(
    socket: UdpSocket,
    self_member: Member,
    table: Arc<Mutex<MemberTable>>,
    handler: Arc<dyn Handler>,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = [0u8; UDP_BUFFER_SIZE];
    while !shutdown.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let Ok(message) = bincode::deserialize::<GossipMessage>(&buf[..len]) else {
                    continue;
                };
                match message {
                    GossipMessage::Ping { sender, known } => {
                        let is_new = table.lock().unwrap().observe(sender.clone());
                        if is_new && sender.node_id != self_member.node_id {
                            if let Err(e) = handler.join(&sender.node_id, sender.rpc_addr) {
                                log::warn!("discovery: consensus join for {} failed: {e}", sender.node_id);
                            }
                        }
                        merge_known(&table, &handler, &self_member.node_id, known);
                        send_ack(&socket, &self_member, &table, from);
                    }
                    GossipMessage::Ack { sender, known } => {
                        table.lock().unwrap().touch(&sender.node_id);
                        merge_known(&table, &handler, &self_member.node_id, known);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue; // just the read timeout; let the shutdown check above run
            }
            Err(e) => {
                log::error!("discovery: gossip socket error: {e}");
                return;
            }
        }
    }
}

fn probe_loop(
    socket: UdpSocket,
    self_member: Member,
    table: Arc<Mutex<MemberTable>>,
    handler: Arc<dyn Handler>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(GOSSIP_INTERVAL);
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let targets = table.lock().unwrap().members();
        for member in &targets {
            send_ping(&socket, &self_member, &table, member.gossip_addr);
        }
        for dead in table.lock().unwrap().reap_dead() {
            log::info!("discovery: {} suspected dead, notifying consensus", dead.node_id);
            if let Err(e) = handler.leave(&dead.node_id) {
                log::warn!("discovery: consensus leave for {} failed: {e}", dead.node_id);
            }
        }
    }
}
