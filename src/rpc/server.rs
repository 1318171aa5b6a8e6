//! Opcode-dispatched RPC server, generalizing the teacher's
//! `RpcObject`/`RpcServer` (`rpc::server`) from a capnp `AnyPointer`
//! reader/builder pair to raw `bincode` bytes.

use super::wire::{read_frame, write_frame, Envelope, EnvelopeKind};
use crate::error::RpcError;
use crate::mux::Listener;
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

/// One registered handler per opcode. `handle` takes and returns raw bytes
/// so callers own their own `bincode` request/response types.
pub trait RpcObject: Send + Sync {
    fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, RpcError>;
}

pub struct RpcServer {
    handlers: HashMap<u16, Box<dyn RpcObject>>,
}

impl RpcServer {
    pub fn new() -> Self {
        RpcServer {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, opcode: u16, handler: Box<dyn RpcObject>) {
        self.handlers.insert(opcode, handler);
    }

    /// Spawns the accept loop on a background thread (spec.md §5: "The RPC
    /// server ... handles each call on its own task"). `listener` is
    /// anything that blocks until a connection arrives, so the same server
    /// can run either over a plain `TcpListener` or over a mux sub-listener.
    pub fn serve(self: Arc<Self>, listener: impl Listener + Send + 'static) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            match listener.accept() {
                Ok(stream) => {
                    let server = Arc::clone(&self);
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(e) => {
                    log::warn!("rpc accept loop stopping: {e}");
                    return;
                }
            }
        })
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        loop {
            let envelope = match read_frame(&mut stream) {
                Ok(e) => e,
                Err(_) => return, // peer closed or timed out; not the whole server's problem
            };
            let EnvelopeKind::Request { opcode, payload } = envelope.kind else {
                log::debug!("rpc server received a response frame, dropping connection");
                return;
            };
            let result = match self.handlers.get(&opcode) {
                Some(handler) => handler.handle(&payload).map_err(|e| e.to_string()),
                None => Err(RpcError::UnknownOpcode(opcode).to_string()),
            };
            let reply = Envelope {
                id: envelope.id,
                kind: EnvelopeKind::Response { payload: result },
            };
            if write_frame(&mut stream, &reply).is_err() {
                return;
            }
        }
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}
