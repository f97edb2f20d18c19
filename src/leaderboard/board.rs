//! Ranked sets and overtake detection.
//!
//! ## Scoring
//!
//! Ranked-set scores pack the streak and the update time into one number:
//! `streak * 2^32 + unix_seconds`. Higher streaks always rank first, and on
//! equal streaks the most recent update ranks higher. Streaks are capped at
//! [`MAX_STREAK`] so the packed value stays below 2^53 and is exact in an
//! `f64` score.
//!
//! ## Overtakes
//!
//! Raising a best from `prev` to `new` overtakes every other user whose
//! streak lies in `[prev, new)`. Ties at `new` are not overtakes. The read
//! happens before the write; a concurrent writer may make the list slightly
//! stale, which only affects the notification.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::clock::Clock;
use crate::store::{keys, SharedStore, StoreError};
use super::identity::{fallback_identity, Identity};

/// Overtakes returned by a submission.
pub const SUBMIT_OVERTAKE_CAP: usize = 5;
/// Overtakes returned by a live probe.
pub const LIVE_OVERTAKE_CAP: usize = 3;
/// Largest page a board query may ask for.
pub const MAX_PAGE: usize = 100;

/// Highest streak a ranked-set score can hold exactly.
pub const MAX_STREAK: u32 = (1 << 21) - 1;

const STREAK_SHIFT: f64 = 4_294_967_296.0;

/// Which ranked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    /// Current week.
    #[default]
    #[serde(alias = "weekly")]
    Rolling,
    /// Since the beginning.
    #[serde(alias = "global", alias = "all-time")]
    AllTime,
}

/// One ranked row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: u64,
    /// Owner.
    pub user_id: String,
    /// Display identity.
    pub identity: Identity,
    /// Best streak.
    pub best_streak: u32,
    /// Last update (ms).
    pub timestamp: u64,
}

/// A user passed by a score increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OvertakeEvent {
    /// Who was passed.
    pub overtaken_user_id: String,
    /// Their display identity.
    pub overtaken_identity: Identity,
    /// Their best streak.
    pub their_streak: u32,
    /// The streak that passed them.
    pub your_streak: u32,
}

/// Result of a score submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    /// The submission raised the stored best.
    pub is_new_best: bool,
    /// All-time rank before the submission.
    pub previous_rank: Option<u64>,
    /// All-time rank after the submission.
    pub new_rank: Option<u64>,
    /// Best streak after the submission.
    pub best_streak: u32,
    /// Users passed, highest streak first.
    pub overtakes: Vec<OvertakeEvent>,
}

/// Pack a streak and update time into a ranked-set score. Streaks above
/// [`MAX_STREAK`] pack as `MAX_STREAK`.
pub fn encode_score(streak: u32, at_ms: u64) -> f64 {
    let secs = (at_ms / 1000).min(u32::MAX as u64);
    streak.min(MAX_STREAK) as f64 * STREAK_SHIFT + secs as f64
}

/// Split a ranked-set score into streak and update time (ms).
pub fn decode_score(score: f64) -> (u32, u64) {
    let streak = (score / STREAK_SHIFT).floor();
    let secs = score - streak * STREAK_SHIFT;
    (streak as u32, secs as u64 * 1000)
}

/// Leaderboard over a [`KvStore`](crate::store::KvStore).
#[derive(Clone)]
pub struct Leaderboard {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    weekly_ttl: Duration,
}

impl Leaderboard {
    /// Leaderboard on a store and clock.
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, weekly_ttl: keys::WEEKLY_TTL }
    }

    fn board_key(&self, kind: BoardKind) -> String {
        match kind {
            BoardKind::Rolling => keys::weekly_leaderboard(&keys::week_key(self.clock.now_ms())),
            BoardKind::AllTime => keys::GLOBAL_LEADERBOARD.to_string(),
        }
    }

    /// Stored best streak, 0 if none. Without a best key the all-time board
    /// entry is used.
    pub async fn best_streak(&self, user_id: &str) -> Result<u32, StoreError> {
        if let Some(raw) = self.store.get(&keys::user_best(user_id)).await? {
            return raw.trim().parse::<u32>().map_err(|_| {
                StoreError::Protocol(format!("bad best streak for {}: {}", user_id, raw))
            });
        }
        let score = self.store.zscore(keys::GLOBAL_LEADERBOARD, user_id).await?;
        Ok(score.map(|s| decode_score(s).0).unwrap_or(0))
    }

    /// 1-based rank in a board.
    pub async fn user_rank(
        &self,
        kind: BoardKind,
        user_id: &str,
    ) -> Result<Option<u64>, StoreError> {
        let rank = self.store.zrevrank(&self.board_key(kind), user_id).await?;
        Ok(rank.map(|r| r + 1))
    }

    /// Record a final streak.
    ///
    /// Only a strictly higher streak changes anything; otherwise the current
    /// rank is reported with no overtakes.
    pub async fn submit_score(
        &self,
        user_id: &str,
        streak: u32,
        identity: Option<&Identity>,
    ) -> Result<SubmitOutcome, StoreError> {
        if let Some(identity) = identity {
            self.cache_identity(user_id, identity).await;
        }

        let previous_best = self.best_streak(user_id).await?;
        let previous_rank = self.user_rank(BoardKind::AllTime, user_id).await?;

        if streak <= previous_best {
            debug!(user_id, streak, previous_best, "score does not improve best");
            return Ok(SubmitOutcome {
                is_new_best: false,
                previous_rank,
                new_rank: previous_rank,
                best_streak: previous_best,
                overtakes: Vec::new(),
            });
        }

        let overtakes = self
            .overtakes_between(user_id, previous_best, streak, SUBMIT_OVERTAKE_CAP)
            .await?;

        let score = encode_score(streak, self.clock.now_ms());
        let weekly = self.board_key(BoardKind::Rolling);
        self.store
            .set(&keys::user_best(user_id), &streak.to_string(), None)
            .await?;
        self.store.zadd(keys::GLOBAL_LEADERBOARD, score, user_id).await?;
        self.store.zadd(&weekly, score, user_id).await?;
        self.store.expire(&weekly, self.weekly_ttl).await?;

        let new_rank = self.user_rank(BoardKind::AllTime, user_id).await?;
        debug!(user_id, streak, ?new_rank, overtaken = overtakes.len(), "new best recorded");

        Ok(SubmitOutcome {
            is_new_best: true,
            previous_rank,
            new_rank,
            best_streak: streak,
            overtakes,
        })
    }

    /// Users passed by an in-progress streak going from `previous` to
    /// `current`. Read-only.
    pub async fn live_overtakes(
        &self,
        user_id: &str,
        previous: u32,
        current: u32,
    ) -> Result<Vec<OvertakeEvent>, StoreError> {
        if current <= previous {
            return Ok(Vec::new());
        }
        self.overtakes_between(user_id, previous, current, LIVE_OVERTAKE_CAP).await
    }

    async fn overtakes_between(
        &self,
        user_id: &str,
        from: u32,
        to: u32,
        cap: usize,
    ) -> Result<Vec<OvertakeEvent>, StoreError> {
        let min = from.min(MAX_STREAK) as f64 * STREAK_SHIFT;
        let max = to.min(MAX_STREAK) as f64 * STREAK_SHIFT - 1.0;
        let passed = self
            .store
            .zrangebyscore(keys::GLOBAL_LEADERBOARD, min, max)
            .await?;

        let mut overtakes = Vec::new();
        for (member, score) in passed.into_iter().filter(|(m, _)| m != user_id).take(cap) {
            let (their_streak, _) = decode_score(score);
            overtakes.push(OvertakeEvent {
                overtaken_identity: self.resolve_identity(&member).await,
                overtaken_user_id: member,
                their_streak,
                your_streak: to,
            });
        }
        Ok(overtakes)
    }

    /// Top of a board. `limit` is clamped to `1..=100`.
    pub async fn entries(
        &self,
        kind: BoardKind,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let limit = limit.clamp(1, MAX_PAGE);
        let rows = self
            .store
            .zrevrange_with_scores(&self.board_key(kind), 0, limit - 1)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (idx, (user_id, score)) in rows.into_iter().enumerate() {
            let (best_streak, timestamp) = decode_score(score);
            entries.push(LeaderboardEntry {
                rank: idx as u64 + 1,
                identity: self.resolve_identity(&user_id).await,
                user_id,
                best_streak,
                timestamp,
            });
        }
        Ok(entries)
    }

    /// Cached identity, or the fallback. Never fails.
    pub async fn resolve_identity(&self, user_id: &str) -> Identity {
        match self.store.get(&keys::user_profile(user_id)).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                debug!(user_id, error = %e, "unreadable profile, using fallback");
                fallback_identity(user_id)
            }),
            Ok(None) => fallback_identity(user_id),
            Err(e) => {
                debug!(user_id, error = %e, "profile lookup failed, using fallback");
                fallback_identity(user_id)
            }
        }
    }

    async fn cache_identity(&self, user_id: &str, identity: &Identity) {
        let result = match serde_json::to_string(identity) {
            Ok(json) => self.store.set(&keys::user_profile(user_id), &json, None).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(user_id, error = %e, "failed to cache profile");
        }
    }
}

impl std::fmt::Debug for Leaderboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaderboard").finish_non_exhaustive()
    }
}
