//! Core deterministic primitives.
//!
//! The selection stream is the only source of randomness the game logic
//! sees; the clock is the only source of time.

pub mod rng;
pub mod clock;

// Re-export core types
pub use rng::{SeededStream, derive_round_seed, generate_run_seed};
pub use clock::{Clock, SystemClock, ManualClock};
