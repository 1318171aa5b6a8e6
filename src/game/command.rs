//! Log entries for the replicated game.
//!
//! spec.md §9 flags the source's design bug directly: it serialized a whole
//! post-image `Game` into the log, so applying an old entry on a lagging
//! follower could stomp a more advanced state. Here the log records intent
//! (`Command`), never a post-image, and the state machine stays the sole
//! authority over `Game`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    ApplyLetter(String),
    Reset,
}

impl Command {
    /// Length-framed, self-describing binary record: a `u32` length prefix
    /// (little-endian) followed by a `bincode` payload. Self-describing
    /// because `bincode` tags the enum variant; framing lets the log store
    /// split entries without re-parsing.
    pub fn encode(&self) -> Vec<u8> {
        let body = bincode::serialize(self).expect("Command serialization is infallible");
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 4 {
            return Err(DecodeError::Truncated);
        }
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let body = bytes.get(4..4 + len).ok_or(DecodeError::Truncated)?;
        bincode::deserialize(body).map_err(DecodeError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("command record truncated")]
    Truncated,
    #[error("command record malformed: {0}")]
    Malformed(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_apply_letter() {
        let cmd = Command::ApplyLetter("k".to_string());
        let encoded = cmd.encode();
        assert_eq!(Command::decode(&encoded).unwrap(), cmd);
    }

    #[test]
    fn round_trips_reset() {
        let cmd = Command::Reset;
        let encoded = cmd.encode();
        assert_eq!(Command::decode(&encoded).unwrap(), cmd);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let cmd = Command::Reset;
        let mut encoded = cmd.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(Command::decode(&encoded), Err(DecodeError::Truncated)));
    }
}
