//! Bridges the pure `Game` transition function to the consensus engine's
//! apply path (spec.md §4.2 "Apply must be synchronous and ordered").

use super::command::Command;
use super::state::{Game, SnapshotBlob};

/// Owned by exactly one consensus state-machine instance per peer. Mutated
/// only from the apply path or from snapshot restore (spec.md §3
/// "Ownership / lifecycle").
pub struct GameStateMachine {
    game: Game,
}

impl GameStateMachine {
    pub fn new(secret: impl Into<String>) -> Self {
        GameStateMachine {
            game: Game::new(secret),
        }
    }

    /// Applies one committed command. Never fails: `Command` decode errors
    /// are caught before this point (at the log-read boundary), and `Game`'s
    /// transition function itself cannot fail.
    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::ApplyLetter(letter) => self.game.handle_letter(letter),
            Command::Reset => self.game.reset(),
        }
    }

    /// A consistent snapshot (copy) for external readers; spec.md §5
    /// "external readers take a consistent snapshot rather than
    /// referencing internals".
    pub fn read(&self) -> Game {
        self.game.clone()
    }

    pub fn snapshot(&self) -> SnapshotBlob {
        self.game.snapshot()
    }

    pub fn restore(&mut self, blob: &SnapshotBlob) -> Result<(), bincode::Error> {
        self.game.restore(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_ordered_and_deterministic() {
        let mut a = GameStateMachine::new("kanna kamui");
        let mut b = GameStateMachine::new("kanna kamui");
        let commands = vec![
            Command::ApplyLetter("k".into()),
            Command::ApplyLetter("z".into()),
            Command::ApplyLetter("a".into()),
            Command::Reset,
            Command::ApplyLetter("k".into()),
        ];
        for c in &commands {
            a.apply(c);
            b.apply(c);
        }
        assert_eq!(
            bincode::serialize(&a.read()).unwrap(),
            bincode::serialize(&b.read()).unwrap()
        );
    }
}
