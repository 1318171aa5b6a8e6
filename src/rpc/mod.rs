//! The `GameService` RPC surface: wire framing (`wire`), the opcode-dispatch
//! server (`server`), the game-specific request/response types and handlers
//! (`service`), and the leader-aware client (`resolver`).

pub mod resolver;
pub mod server;
pub mod service;
pub mod wire;

pub use resolver::Resolver;
pub use service::{GameServiceHandler, SendReply, SendRequest};
