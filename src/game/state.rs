//! The replicated game object and its pure transition function.
//!
//! This is the state machine the consensus engine drives: `Game` never reads
//! the clock, never looks at RNG, and never iterates a HashMap. Determinism
//! is load-bearing (spec invariant 6 of the testable-properties table).

use serde::{Deserialize, Serialize};

/// Sentinel for an unguessed position.
const BLANK: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Start,
    Going,
    Won,
    Lost,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    secret: String,
    guessed: Vec<char>,
    incorrect: Vec<char>,
    chances_left: u32,
    phase: Phase,
    message: String,
    version: u32,
}

const STARTING_CHANCES: u32 = 6;

impl Game {
    /// Builds a fresh game around `secret`. The secret is injected at
    /// construction rather than hardcoded, so tests (and, eventually,
    /// operators) can vary it.
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into().to_lowercase();
        let guessed = blank_template(&secret);
        Game {
            secret,
            guessed,
            incorrect: Vec::new(),
            chances_left: STARTING_CHANCES,
            phase: Phase::Start,
            message: String::new(),
            version: 0,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn guessed(&self) -> &[char] {
        &self.guessed
    }

    pub fn incorrect(&self) -> &[char] {
        &self.incorrect
    }

    pub fn chances_left(&self) -> u32 {
        self.chances_left
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Per-position guessed string, `"_"`/`" "`/letter for every character
    /// of the secret; spec.md §4.6's wire `guessedCharacter` field.
    pub fn guessed_characters(&self) -> Vec<String> {
        self.guessed.iter().map(|c| c.to_string()).collect()
    }

    pub fn incorrect_guesses(&self) -> Vec<String> {
        self.incorrect.iter().map(|c| c.to_string()).collect()
    }

    /// `HandleLetter` from spec.md §4.1.
    pub fn handle_letter(&mut self, raw: &str) {
        self.version += 1;
        self.phase = Phase::Going;

        let normalized = raw.trim().to_lowercase();
        let letter = match single_lowercase_letter(&normalized) {
            Some(c) => c,
            None => {
                self.message = "Please enter a valid single letter.".to_string();
                return;
            }
        };

        if self.guessed.contains(&letter) || self.incorrect.contains(&letter) {
            self.message = format!("You already picked {letter}");
            return;
        }

        if self.secret.contains(letter) {
            for (i, c) in self.secret.chars().enumerate() {
                if c == letter {
                    self.guessed[i] = letter;
                }
            }
            self.message.clear();
            if !self.guessed.contains(&BLANK) {
                self.phase = Phase::Won;
                self.message = "Congratulations! You win!".to_string();
            } else {
                self.phase = Phase::Going;
            }
        } else {
            self.incorrect.push(letter);
            self.chances_left -= 1;
            self.message.clear();
            if self.chances_left == 0 {
                self.phase = Phase::Lost;
                self.message = format!("You lose! The character was: {}", self.secret);
            } else {
                self.phase = Phase::Going;
            }
        }
    }

    /// `Reset` from spec.md §4.1.
    pub fn reset(&mut self) {
        let next_version = self.version + 1;
        *self = Game::new(self.secret.clone());
        self.version = next_version;
    }

    /// Deterministic, field-tagged snapshot blob (spec.md §4.1 `Snapshot`).
    pub fn snapshot(&self) -> SnapshotBlob {
        SnapshotBlob(bincode::serialize(self).expect("Game serialization is infallible"))
    }

    /// Replaces in-memory state atomically (spec.md §4.1 `Restore`).
    pub fn restore(&mut self, blob: &SnapshotBlob) -> Result<(), bincode::Error> {
        *self = bincode::deserialize(&blob.0)?;
        Ok(())
    }
}

/// Serialized `Game`, suitable for restoring a replica that fell behind
/// retention (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBlob(pub Vec<u8>);

fn blank_template(secret: &str) -> Vec<char> {
    secret
        .chars()
        .map(|c| if c == ' ' { ' ' } else { BLANK })
        .collect()
}

fn single_lowercase_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    if c.is_ascii_lowercase() {
        Some(c)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "kanna kamui";

    fn apply_all(game: &mut Game, letters: &[&str]) {
        for l in letters {
            game.handle_letter(l);
        }
    }

    #[test]
    fn invalid_inputs_leave_state_untouched() {
        for bad in ["", "A", "ab", "!"] {
            let mut game = Game::new(SECRET);
            game.handle_letter(bad);
            assert_eq!(game.message(), "Please enter a valid single letter.");
            assert_eq!(game.guessed(), blank_template(SECRET).as_slice());
            assert!(game.incorrect().is_empty());
            assert_eq!(game.chances_left(), STARTING_CHANCES);
        }
    }

    #[test]
    fn scenario_1_single_correct_letter() {
        let mut game = Game::new(SECRET);
        game.handle_letter("k");
        assert_eq!(game.guessed().iter().collect::<String>(), "k____ k____");
        assert!(game.incorrect().is_empty());
        assert_eq!(game.chances_left(), 6);
        assert_eq!(game.phase(), Phase::Going);
    }

    #[test]
    fn scenario_2_win() {
        let mut game = Game::new(SECRET);
        apply_all(&mut game, &["k", "a", "n", "m", "u", "i"]);
        assert_eq!(game.guessed().iter().collect::<String>(), "kanna kamui");
        assert!(game.incorrect().is_empty());
        assert_eq!(game.phase(), Phase::Won);
        assert_eq!(game.message(), "Congratulations! You win!");
    }

    #[test]
    fn scenario_3_loss() {
        let mut game = Game::new(SECRET);
        apply_all(&mut game, &["z", "x", "q", "j", "b", "p"]);
        assert_eq!(game.guessed().iter().collect::<String>(), "____ _____");
        assert_eq!(
            game.incorrect().iter().collect::<String>(),
            "zxqjbp"
        );
        assert_eq!(game.chances_left(), 0);
        assert_eq!(game.phase(), Phase::Lost);
    }

    #[test]
    fn scenario_4_repeat_guess_is_idempotent_but_message_changes() {
        let mut game = Game::new(SECRET);
        game.handle_letter("k");
        let guessed_after_first = game.guessed().to_vec();
        let incorrect_after_first = game.incorrect().to_vec();
        game.handle_letter("k");
        assert_eq!(game.guessed(), guessed_after_first.as_slice());
        assert_eq!(game.incorrect(), incorrect_after_first.as_slice());
        assert_eq!(game.message(), "You already picked k");
        assert_eq!(game.phase(), Phase::Going);
    }

    #[test]
    fn scenario_5_bad_input_message() {
        let mut game = Game::new(SECRET);
        game.handle_letter("7");
        assert_eq!(game.message(), "Please enter a valid single letter.");
        assert_eq!(game.phase(), Phase::Going);
    }

    #[test]
    fn scenario_6_reset_after_progress() {
        let mut game = Game::new(SECRET);
        game.handle_letter("k");
        let version_before = game.version();
        game.reset();
        assert_eq!(game.guessed().iter().collect::<String>(), "____ _____");
        assert!(game.incorrect().is_empty());
        assert_eq!(game.chances_left(), 6);
        assert_eq!(game.phase(), Phase::Start);
        assert_eq!(game.version(), version_before + 1);
    }

    #[test]
    fn version_strictly_increases() {
        let mut game = Game::new(SECRET);
        let mut last = game.version();
        for l in ["k", "k", "z", "reset-is-not-a-letter"] {
            game.handle_letter(l);
            assert!(game.version() > last);
            last = game.version();
        }
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut game = Game::new(SECRET);
        apply_all(&mut game, &["k", "a", "z"]);
        let blob = game.snapshot();
        let mut restored = Game::new("placeholder");
        restored.restore(&blob).unwrap();
        assert_eq!(restored.guessed(), game.guessed());
        assert_eq!(restored.incorrect(), game.incorrect());
        assert_eq!(restored.version(), game.version());
        assert_eq!(restored.chances_left(), game.chances_left());
    }

    #[test]
    fn invariant_chances_and_incorrect_bounded() {
        let mut game = Game::new(SECRET);
        for l in "bcdfghjlpqrstvwxyz".chars() {
            game.handle_letter(&l.to_string());
            assert!(game.chances_left() <= 6);
            assert!(game.chances_left() as usize + game.incorrect().len() <= 6);
            if game.phase() == Phase::Lost {
                break;
            }
        }
    }

    #[test]
    fn incorrect_never_contains_secret_letters() {
        let mut game = Game::new(SECRET);
        for l in "abcdefghijklmnopqrstuvwxyz".chars() {
            game.handle_letter(&l.to_string());
        }
        for c in game.incorrect() {
            assert!(!game.secret().contains(*c));
        }
    }
}
