//! Key space of the shared store.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Run record expiry.
pub const RUN_TTL: Duration = Duration::from_secs(60 * 60);
/// Rolling-window ranked set expiry; outlives its week so late reads work.
pub const WEEKLY_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);
/// Unused share token expiry.
pub const SHARE_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);
/// Share token expiry once redeemed.
pub const SHARE_TOKEN_USED_TTL: Duration = Duration::from_secs(60);
/// How long a redeemed payment is remembered.
pub const PAYMENT_REPLAY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// All-time ranked set.
pub const GLOBAL_LEADERBOARD: &str = "leaderboard:global";

/// Run record.
pub fn run_state(run_id: &str) -> String {
    format!("game:{}:state", run_id)
}

/// Best streak of a user.
pub fn user_best(user_id: &str) -> String {
    format!("user:{}:best", user_id)
}

/// Cached display identity of a user.
pub fn user_profile(user_id: &str) -> String {
    format!("user:{}:profile", user_id)
}

/// Rolling-window ranked set for a week bucket.
pub fn weekly_leaderboard(week: &str) -> String {
    format!("leaderboard:weekly:{}", week)
}

/// Share token.
pub fn share_token(token: &str) -> String {
    format!("share:{}", token)
}

/// Redeemed payment marker.
pub fn payment(tx_hash: &str) -> String {
    format!("payment:{}", tx_hash.to_ascii_lowercase())
}

/// ISO week bucket, e.g. `2026-W42`.
pub fn week_key(now_ms: u64) -> String {
    let at = DateTime::<Utc>::from_timestamp_millis(now_ms as i64).unwrap_or_default();
    at.format("%G-W%V").to_string()
}
