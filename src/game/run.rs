//! Run Record
//!
//! One mutable record per run. Only the guess and reprieve paths mutate it,
//! and only through the methods below so the invariants hold:
//! - `current_item_id != next_item_id`
//! - `round_number == guess_log.len()`
//! - `has_used_reprieve` only goes false -> true

use std::collections::HashSet;

use serde::{Serialize, Deserialize};

use super::catalog::Item;

/// Player's call on the hidden value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guess {
    /// Next value is at least the current one.
    #[serde(alias = "cap")]
    Up,
    /// Next value is below the current one.
    #[serde(alias = "slap")]
    Down,
}

impl Guess {
    /// Evaluate against the revealed pair. Equal values count as `Up`.
    pub fn is_correct(self, current: &Item, next: &Item) -> bool {
        self == Guess::answer(current, next)
    }

    /// The right call for a pair.
    pub fn answer(current: &Item, next: &Item) -> Guess {
        if next.value >= current.value {
            Guess::Up
        } else {
            Guess::Down
        }
    }
}

/// One accepted guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessEntry {
    /// Round the guess was made in.
    pub round_number: u32,
    /// Item shown.
    pub current_item_id: String,
    /// Item hidden.
    pub next_item_id: String,
    /// The call.
    pub guess: Guess,
    /// Server time of the guess (ms).
    pub timestamp: u64,
}

/// Whether the player is still guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepting guesses.
    #[default]
    InProgress,
    /// Last guess was wrong; only a reprieve can continue the run.
    Lost,
}

/// Server-side state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: String,
    /// Opaque seed fixing the selection streams.
    pub seed: String,
    /// Owner.
    pub user_id: String,
    /// Creation time (ms).
    pub started_at: u64,
    /// Rounds won so far.
    pub round_number: u32,
    /// Item currently shown.
    pub current_item_id: String,
    /// Item to compare against.
    pub next_item_id: String,
    /// Consecutive correct guesses.
    pub current_streak: u32,
    /// Accepted guesses, oldest first.
    pub guess_log: Vec<GuessEntry>,
    /// Reprieve latch.
    pub has_used_reprieve: bool,
    /// Time of the last guess of any outcome (ms).
    pub last_guess_timestamp: Option<u64>,
    /// Guessing or lost.
    #[serde(default)]
    pub status: RunStatus,
    /// The losing guess, kept until a reprieve discards it.
    #[serde(default)]
    pub failed_guess: Option<GuessEntry>,
}

impl RunRecord {
    /// Fresh record for a new run.
    pub fn new(
        run_id: impl Into<String>,
        seed: impl Into<String>,
        user_id: impl Into<String>,
        started_at: u64,
        current: &Item,
        next: &Item,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            seed: seed.into(),
            user_id: user_id.into(),
            started_at,
            round_number: 0,
            current_item_id: current.id.clone(),
            next_item_id: next.id.clone(),
            current_streak: 0,
            guess_log: Vec::new(),
            has_used_reprieve: false,
            last_guess_timestamp: None,
            status: RunStatus::InProgress,
            failed_guess: None,
        }
    }

    /// Entry for a guess on the current pair.
    pub fn entry_for(&self, guess: Guess, timestamp: u64) -> GuessEntry {
        GuessEntry {
            round_number: self.round_number,
            current_item_id: self.current_item_id.clone(),
            next_item_id: self.next_item_id.clone(),
            guess,
            timestamp,
        }
    }

    /// Record a correct guess and move to the next pair.
    ///
    /// The revealed item becomes current and `new_next_id` is hidden next.
    pub fn apply_correct(&mut self, guess: Guess, timestamp: u64, new_next_id: impl Into<String>) {
        let entry = self.entry_for(guess, timestamp);
        self.guess_log.push(entry);
        self.current_streak += 1;
        self.round_number += 1;
        self.current_item_id = std::mem::take(&mut self.next_item_id);
        self.next_item_id = new_next_id.into();
        self.last_guess_timestamp = Some(timestamp);
    }

    /// Record a wrong guess. Streak, round and pair stay as they were.
    pub fn apply_incorrect(&mut self, guess: Guess, timestamp: u64) {
        self.failed_guess = Some(self.entry_for(guess, timestamp));
        self.status = RunStatus::Lost;
        self.last_guess_timestamp = Some(timestamp);
    }

    /// Resume after a reprieve with a replacement hidden item.
    ///
    /// The failed comparison is discarded; streak and current item are kept.
    pub fn resume(&mut self, new_next_id: impl Into<String>) {
        self.has_used_reprieve = true;
        self.status = RunStatus::InProgress;
        self.failed_guess = None;
        self.next_item_id = new_next_id.into();
    }

    /// True once the player has lost and not resumed.
    pub fn is_lost(&self) -> bool {
        self.status == RunStatus::Lost
    }

    /// Up to `window` distinct item ids from the log, most recent first.
    pub fn recent_item_ids(&self, window: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut recent = Vec::with_capacity(window);

        for entry in self.guess_log.iter().rev() {
            for id in [&entry.next_item_id, &entry.current_item_id] {
                if recent.len() == window {
                    return recent;
                }
                if seen.insert(id.as_str()) {
                    recent.push(id.clone());
                }
            }
        }

        recent
    }
}
