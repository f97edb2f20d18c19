//! Timer Policy
//!
//! Think-time shrinks as the streak grows. Purely advisory metadata for the
//! client; the only server-side enforcement is the inter-guess rate limit.

use serde::{Serialize, Deserialize};

/// Longest budget any round can have.
pub const MAX_BUDGET_SECS: u32 = 60;
/// Extra seconds granted on the round after a reprieve.
pub const REPRIEVE_GRACE_SECS: u32 = 10;

/// Named pressure tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerTier {
    /// Streak 0-4.
    Warmup,
    /// Streak 5-9.
    Challenge,
    /// Streak 10-14.
    Pressure,
    /// Streak 15-19.
    Intense,
    /// Streak 20+.
    Legendary,
}

impl TimerTier {
    /// Display name.
    pub fn label(self) -> &'static str {
        match self {
            TimerTier::Warmup => "Warmup",
            TimerTier::Challenge => "Challenge",
            TimerTier::Pressure => "Pressure",
            TimerTier::Intense => "Intense",
            TimerTier::Legendary => "Legendary",
        }
    }
}

/// Timer budget for one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerBudget {
    /// Seconds to answer.
    pub seconds: u32,
    /// Pressure tier.
    pub tier: TimerTier,
    /// Remaining fraction at which the client shows a warning.
    pub warning_at: f32,
    /// Remaining fraction at which the client shows critical state.
    pub critical_at: f32,
}

// (lowest streak, seconds, tier, warning, critical), highest band first
const BANDS: [(u32, u32, TimerTier, f32, f32); 5] = [
    (20, 12, TimerTier::Legendary, 0.5, 0.33),
    (15, 20, TimerTier::Intense, 0.5, 0.3),
    (10, 30, TimerTier::Pressure, 0.5, 0.25),
    (5, 45, TimerTier::Challenge, 0.5, 0.25),
    (0, MAX_BUDGET_SECS, TimerTier::Warmup, 0.5, 0.25),
];

/// Budget for the round played at `streak`.
pub fn timer_budget(streak: u32) -> TimerBudget {
    let (_, seconds, tier, warning_at, critical_at) = BANDS
        .iter()
        .copied()
        .find(|(from, ..)| streak >= *from)
        .unwrap_or(BANDS[BANDS.len() - 1]);

    TimerBudget { seconds, tier, warning_at, critical_at }
}

/// Budget for the first round after a reprieve, capped at the maximum.
pub fn timer_budget_after_reprieve(streak: u32) -> TimerBudget {
    let base = timer_budget(streak);
    TimerBudget {
        seconds: (base.seconds + REPRIEVE_GRACE_SECS).min(MAX_BUDGET_SECS),
        ..base
    }
}

/// Tier name for a streak.
pub fn tier_label(streak: u32) -> &'static str {
    timer_budget(streak).tier.label()
}
