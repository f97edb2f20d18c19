//! Streak leaderboards.
//!
//! - `board`: rolling and all-time ranked sets, best scores, overtakes
//! - `identity`: display identity and its fallback

pub mod board;
pub mod identity;

pub use board::{
    BoardKind, Leaderboard, LeaderboardEntry, OvertakeEvent, SubmitOutcome,
    LIVE_OVERTAKE_CAP, MAX_STREAK, SUBMIT_OVERTAKE_CAP,
};
pub use identity::{fallback_identity, Identity};
