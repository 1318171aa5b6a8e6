//! The `GameService` RPC surface (spec.md §4.6): the opcodes a frontend or
//! CLI client actually calls — `Send` a letter, `Reset` the game, `Receive`
//! the current state, `GetServers` for the resolver's membership view.
//! Each handler is a thin adapter from bytes to the consensus engine's
//! `Raft` handle, the same shape as `consensus::raft`'s RPC handlers.

use crate::consensus::raft::{Raft, ServerEntry};
use crate::error::RaftError;
use crate::game::{Command, Game, Phase};
use crate::rpc::server::RpcObject;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::SocketAddr;
use std::time::Duration;

pub const OPCODE_SEND: u16 = 0;
pub const OPCODE_RESET: u16 = 1;
pub const OPCODE_RECEIVE: u16 = 2;
pub const OPCODE_GET_SERVERS: u16 = 3;

/// How long a `Send`/`Reset` call waits for its command to commit before
/// giving up (spec.md §4.6 "callers that time out must not assume the
/// command was dropped; it may still commit").
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub letter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SendReply {
    Ok(GameView),
    NotLeader { hint: Option<SocketAddr> },
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetReply(pub SendReply);

/// Wire-shaped view of `Game`, matching spec.md §6's proto field names
/// (`guessedCharacter` per position, not the raw secret; `gameState` as the
/// numeric 0..3 encoding, not `phase`'s string tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameView {
    #[serde(rename = "guessedCharacter")]
    pub guessed_characters: Vec<String>,
    #[serde(rename = "incorrectGuesses")]
    pub incorrect_guesses: Vec<String>,
    #[serde(rename = "chancesLeft")]
    pub chances_left: u32,
    #[serde(rename = "gameState", serialize_with = "serialize_phase_as_i32", deserialize_with = "deserialize_phase_from_i32")]
    pub phase: Phase,
    pub message: String,
    pub version: u32,
}

fn phase_to_i32(phase: Phase) -> i32 {
    match phase {
        Phase::Start => 0,
        Phase::Going => 1,
        Phase::Won => 2,
        Phase::Lost => 3,
    }
}

fn phase_from_i32(value: i32) -> Option<Phase> {
    match value {
        0 => Some(Phase::Start),
        1 => Some(Phase::Going),
        2 => Some(Phase::Won),
        3 => Some(Phase::Lost),
        _ => None,
    }
}

fn serialize_phase_as_i32<S: Serializer>(phase: &Phase, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i32(phase_to_i32(*phase))
}

fn deserialize_phase_from_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Phase, D::Error> {
    let value = i32::deserialize(deserializer)?;
    phase_from_i32(value).ok_or_else(|| serde::de::Error::custom(format!("invalid gameState value {value}")))
}

impl From<Game> for GameView {
    fn from(game: Game) -> Self {
        GameView {
            guessed_characters: game.guessed_characters(),
            incorrect_guesses: game.incorrect_guesses(),
            chances_left: game.chances_left(),
            phase: game.phase(),
            message: game.message().to_string(),
            version: game.version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetServersReply {
    pub servers: Vec<ServerEntry>,
}

fn submit_result_to_reply(raft: &Raft, result: Result<(), RaftError>) -> SendReply {
    match result {
        Ok(()) => SendReply::Ok(raft.read_game().into()),
        Err(RaftError::NotLeader { hint }) => SendReply::NotLeader { hint },
        Err(RaftError::Timeout) => SendReply::Timeout,
        Err(_) => SendReply::Timeout,
    }
}

pub struct GameServiceHandler {
    raft: Raft,
}

impl GameServiceHandler {
    pub fn new(raft: Raft) -> Self {
        GameServiceHandler { raft }
    }

    /// Registers all four opcodes on `server`, sharing one `Raft` handle.
    pub fn register_all(raft: Raft, server: &mut crate::rpc::server::RpcServer) {
        server.register(OPCODE_SEND, Box::new(SendHandler { raft: raft.clone() }));
        server.register(OPCODE_RESET, Box::new(ResetHandler { raft: raft.clone() }));
        server.register(OPCODE_RECEIVE, Box::new(ReceiveHandler { raft: raft.clone() }));
        server.register(OPCODE_GET_SERVERS, Box::new(GetServersHandler { raft }));
    }
}

struct SendHandler {
    raft: Raft,
}

impl RpcObject for SendHandler {
    fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, crate::error::RpcError> {
        let req: SendRequest = bincode::deserialize(payload)?;
        let result = self.raft.submit(Command::ApplyLetter(req.letter), SUBMIT_TIMEOUT);
        let reply = submit_result_to_reply(&self.raft, result);
        Ok(bincode::serialize(&reply)?)
    }
}

struct ResetHandler {
    raft: Raft,
}

impl RpcObject for ResetHandler {
    fn handle(&self, _payload: &[u8]) -> Result<Vec<u8>, crate::error::RpcError> {
        let result = self.raft.submit(Command::Reset, SUBMIT_TIMEOUT);
        let reply = ResetReply(submit_result_to_reply(&self.raft, result));
        Ok(bincode::serialize(&reply)?)
    }
}

struct ReceiveHandler {
    raft: Raft,
}

impl RpcObject for ReceiveHandler {
    fn handle(&self, _payload: &[u8]) -> Result<Vec<u8>, crate::error::RpcError> {
        let view: GameView = self.raft.read_game().into();
        Ok(bincode::serialize(&view)?)
    }
}

struct GetServersHandler {
    raft: Raft,
}

impl RpcObject for GetServersHandler {
    fn handle(&self, _payload: &[u8]) -> Result<Vec<u8>, crate::error::RpcError> {
        let reply = GetServersReply { servers: self.raft.servers() };
        Ok(bincode::serialize(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_view_carries_per_position_guesses_not_the_secret() {
        let mut game = Game::new("ab");
        game.handle_letter("a");
        let view: GameView = game.into();
        assert_eq!(view.guessed_characters, vec!["a".to_string(), "_".to_string()]);
    }
}
