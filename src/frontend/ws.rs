//! WebSocket fan-out (spec.md §4.7): bridges browser clients to the
//! `GameService` RPC surface via the leader-aware `Resolver`. Every inbound
//! client message maps to one resolver call; every call's result is
//! broadcast as a JSON event to all currently-connected sockets, not just
//! the caller, so every browser tab stays in sync.

use crate::rpc::resolver::Resolver;
use crate::rpc::service::GameView;
use serde::{Deserialize, Serialize};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tungstenite::{Message, WebSocket};

/// Wire shape a browser client sends (`original_source/cmd/frontend/
/// socket.go`'s anonymous `{Letter, Restart}` struct): `restart: true` wins
/// over `letter` when both are present.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(default)]
    letter: String,
    #[serde(default)]
    restart: bool,
}

/// Wire shape pushed to every browser client (`socket.go`'s `Event{Name,
/// Content}`): `name` is `"game"` or `"notification"`.
#[derive(Debug, Serialize)]
struct ServerEvent {
    name: &'static str,
    content: ServerEventContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ServerEventContent {
    Game(GameView),
    Notification(String),
}

impl ServerEvent {
    fn game(view: GameView) -> Self {
        ServerEvent { name: "game", content: ServerEventContent::Game(view) }
    }

    fn notification(message: String) -> Self {
        ServerEvent { name: "notification", content: ServerEventContent::Notification(message) }
    }
}

type Connections = Arc<Mutex<std::collections::HashMap<u64, WebSocket<TcpStream>>>>;

pub struct FrontendServer {
    resolver: Arc<Resolver>,
    connections: Connections,
    next_id: AtomicU64,
}

impl FrontendServer {
    pub fn new(resolver: Arc<Resolver>) -> Arc<Self> {
        Arc::new(FrontendServer {
            resolver,
            connections: Arc::new(Mutex::new(std::collections::HashMap::new())),
            next_id: AtomicU64::new(1),
        })
    }

    /// Binds `addr` and serves WebSocket upgrades; spawns one thread per
    /// connection, matching the `RpcServer::serve` accept-loop shape.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let server = self.clone();
                        thread::spawn(move || server.handle_connection(stream));
                    }
                    Err(e) => {
                        log::warn!("frontend accept loop stopping: {e}");
                        return;
                    }
                }
            }
        })
    }

    fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let mut socket = match tungstenite::accept(stream) {
            Ok(socket) => socket,
            Err(e) => {
                log::debug!("websocket handshake failed: {e}");
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(view) = self.resolver.receive() {
            let _ = send_event(&mut socket, &ServerEvent::game(view));
        }
        self.connections.lock().unwrap().insert(id, socket);

        loop {
            let message = {
                let mut conns = self.connections.lock().unwrap();
                let Some(socket) = conns.get_mut(&id) else { return };
                socket.read_message()
            };
            match message {
                Ok(Message::Text(text)) => self.handle_client_message(&text),
                Ok(Message::Close(_)) | Err(tungstenite::Error::ConnectionClosed) => break,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("websocket read error: {e}");
                    break;
                }
            }
        }
        self.connections.lock().unwrap().remove(&id);
    }

    fn handle_client_message(&self, text: &str) {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
        let result = match parsed {
            Ok(ClientMessage { restart: true, .. }) => self.resolver.reset().map_err(|e| e.to_string()),
            Ok(ClientMessage { letter, .. }) => self.resolver.send_letter(&letter).map_err(|e| e.to_string()),
            Err(e) => Err(format!("malformed client message: {e}")),
        };
        match result {
            Ok(game) => self.broadcast(&ServerEvent::game(game)),
            Err(message) => self.broadcast(&ServerEvent::notification(message)),
        }
    }

    /// Sends `event` to every currently-connected client; a socket whose
    /// send fails (peer gone) is dropped rather than retried.
    fn broadcast(&self, event: &ServerEvent) {
        let mut conns = self.connections.lock().unwrap();
        conns.retain(|_, socket| send_event(socket, event).is_ok());
    }
}

fn send_event(socket: &mut WebSocket<TcpStream>, event: &ServerEvent) -> tungstenite::Result<()> {
    let body = serde_json::to_string(event).expect("ServerEvent serialization is infallible");
    socket.write_message(Message::Text(body))
}
