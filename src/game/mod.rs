//! Game Logic Module
//!
//! Pure game rules. No I/O, no wall clock, no ambient randomness.
//!
//! ## Module Structure
//!
//! - `catalog`: Item snapshot the game draws from
//! - `difficulty`: Pair tiers, streak targets, boss rounds
//! - `timer`: Think-time budget per streak
//! - `sequencer`: Seeded pair selection
//! - `run`: Run record and guess log
//! - `validator`: Guess and submission checks
//! - `reprieve`: Continue-after-loss offer

pub mod catalog;
pub mod difficulty;
pub mod timer;
pub mod sequencer;
pub mod run;
pub mod validator;
pub mod reprieve;

// Re-export key types
pub use catalog::{Catalog, CatalogError, Item};
pub use difficulty::{Difficulty, TargetDifficulty};
pub use timer::{TimerBudget, TimerTier};
pub use sequencer::{SelectionContext, SequenceError};
pub use run::{Guess, GuessEntry, RunRecord, RunStatus};
pub use validator::{Finding, SubmissionCheck, ValidationError, ValidationPolicy};
pub use reprieve::{ReprieveOffer, ReprievePolicy, ReprieveState};
