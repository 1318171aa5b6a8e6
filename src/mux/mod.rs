//! Shares one TCP listen socket between consensus stream-layer traffic and
//! RPC traffic by peeking the first byte of each accepted connection
//! (spec.md §4.3). Neither sub-listener is aware the socket is shared: both
//! see `accept()` yielding ready-to-use `TcpStream`s.

use crate::rpc::wire::RAFT_MARKER;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

/// Something that blocks until the next connection is ready. Implemented
/// both by a plain `TcpListener` and by a mux sub-listener, so `RpcServer`
/// doesn't need to know whether the port is shared.
pub trait Listener {
    fn accept(&self) -> io::Result<TcpStream>;
}

impl Listener for TcpListener {
    fn accept(&self) -> io::Result<TcpStream> {
        TcpListener::accept(self).map(|(stream, _)| stream)
    }
}

/// How long the mux waits for the first byte of a new connection before
/// giving up on it (spec.md §4.3 "a connection whose first byte cannot be
/// read within the accept timeout is closed").
const SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MuxListener {
    rx: Receiver<TcpStream>,
}

impl Listener for MuxListener {
    fn accept(&self) -> io::Result<TcpStream> {
        self.rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mux shut down"))
    }
}

/// Binds `addr` and fans accepted connections out to a raft sub-listener and
/// an rpc sub-listener based on the first byte sniffed off each connection.
pub struct PortMultiplexer;

impl PortMultiplexer {
    pub fn bind(addr: SocketAddr) -> io::Result<(SocketAddr, MuxListener, MuxListener)> {
        let listener = TcpListener::bind(addr)?;
        let bound_addr = listener.local_addr()?;
        let (raft_tx, raft_rx) = mpsc::channel();
        let (rpc_tx, rpc_rx) = mpsc::channel();

        thread::spawn(move || accept_loop(listener, raft_tx, rpc_tx));

        Ok((bound_addr, MuxListener { rx: raft_rx }, MuxListener { rx: rpc_rx }))
    }
}

fn accept_loop(listener: TcpListener, raft_tx: Sender<TcpStream>, rpc_tx: Sender<TcpStream>) {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let raft_tx = raft_tx.clone();
                let rpc_tx = rpc_tx.clone();
                // Sniffing blocks on a read, so it gets its own thread: a
                // slow/stalled dialer must not hold up the accept loop.
                thread::spawn(move || route_connection(stream, raft_tx, rpc_tx));
            }
            Err(e) => {
                log::error!("port multiplexer accept loop stopping: {e}");
                return;
            }
        }
    }
}

fn route_connection(stream: TcpStream, raft_tx: Sender<TcpStream>, rpc_tx: Sender<TcpStream>) {
    if stream.set_read_timeout(Some(SNIFF_TIMEOUT)).is_err() {
        return;
    }
    let mut marker = [0u8; 1];
    // `peek` leaves the byte in the socket's receive queue, so the chosen
    // sub-listener still sees it — the RPC path needs every byte of its
    // length prefix intact.
    match stream.peek(&mut marker) {
        Ok(1) if marker[0] == RAFT_MARKER => {
            let _ = stream.set_read_timeout(None);
            // Consensus framing never expects the marker itself, only the
            // sub-listener dial side writes it — drain it here so the raft
            // transport sees the same byte stream a direct dial would.
            let mut stream = stream;
            use std::io::Read;
            if stream.read_exact(&mut marker).is_ok() {
                let _ = raft_tx.send(stream);
            }
        }
        Ok(1) => {
            let _ = stream.set_read_timeout(None);
            let _ = rpc_tx.send(stream);
        }
        _ => {
            // First byte never arrived within the accept timeout, or the
            // peer hung up mid-sniff; drop the connection.
        }
    }
}

/// Dials `addr` as a consensus stream-layer peer: prepends the raft marker
/// byte before handing the stream off (spec.md §4.3, §6).
pub fn dial_raft(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    use std::io::Write;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.write_all(&[RAFT_MARKER])?;
    Ok(stream)
}
