//! Difficulty Tiers
//!
//! A pair is as hard as its values are close. Ratio of larger to smaller:
//! - Easy: > 10x
//! - Medium: > 3x up to 10x
//! - Hard: 3x or less
//!
//! Target tier rises with the streak, and every 5th round is a boss round
//! that is always hard.

use serde::{Serialize, Deserialize};

use super::catalog::Item;

/// Streak at which the target moves from easy to medium.
pub const MEDIUM_FROM_STREAK: u32 = 5;
/// Streak at which the target becomes mixed.
pub const MIXED_FROM_STREAK: u32 = 10;
/// Streak at which the target becomes hard.
pub const HARD_FROM_STREAK: u32 = 15;
/// Boss round interval.
pub const BOSS_ROUND_INTERVAL: u32 = 5;

const EASY_RATIO: f64 = 10.0;
const MEDIUM_RATIO: f64 = 3.0;

/// Difficulty of a single pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Obvious gap.
    Easy,
    /// Needs some knowledge.
    Medium,
    /// Close call.
    Hard,
}

/// Difficulty the sequencer aims for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDifficulty {
    /// Only pairs of this tier.
    Tier(Difficulty),
    /// Any tier, unpredictable.
    Mixed,
}

/// Ratio of the larger to the smaller value.
///
/// Two zero values are indistinguishable (ratio 1); a single zero is an
/// infinite gap.
pub fn value_ratio(a: &Item, b: &Item) -> f64 {
    let larger = a.value.max(b.value);
    let smaller = a.value.min(b.value);
    if larger <= 0.0 {
        1.0
    } else if smaller <= 0.0 {
        f64::INFINITY
    } else {
        larger / smaller
    }
}

/// Classify a pair.
pub fn pair_difficulty(a: &Item, b: &Item) -> Difficulty {
    let ratio = value_ratio(a, b);
    if ratio > EASY_RATIO {
        Difficulty::Easy
    } else if ratio > MEDIUM_RATIO {
        Difficulty::Medium
    } else {
        Difficulty::Hard
    }
}

/// Target difficulty for a streak.
///
/// - 0-4: easy (build confidence)
/// - 5-9: medium
/// - 10-14: mixed
/// - 15+: hard
pub fn target_difficulty(streak: u32) -> TargetDifficulty {
    if streak < MEDIUM_FROM_STREAK {
        TargetDifficulty::Tier(Difficulty::Easy)
    } else if streak < MIXED_FROM_STREAK {
        TargetDifficulty::Tier(Difficulty::Medium)
    } else if streak < HARD_FROM_STREAK {
        TargetDifficulty::Mixed
    } else {
        TargetDifficulty::Tier(Difficulty::Hard)
    }
}

/// Boss rounds are forced hard.
pub fn is_boss_round(round: u32) -> bool {
    round > 0 && round % BOSS_ROUND_INTERVAL == 0
}

/// Target for a round, boss rounds first.
pub fn target_for_round(round: u32, streak: u32) -> TargetDifficulty {
    if is_boss_round(round) {
        TargetDifficulty::Tier(Difficulty::Hard)
    } else {
        target_difficulty(streak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::test_support::item;

    #[test]
    fn test_pair_tiers() {
        let big = item("big", 1000.0);
        assert_eq!(pair_difficulty(&big, &item("a", 50.0)), Difficulty::Easy);
        assert_eq!(pair_difficulty(&big, &item("b", 200.0)), Difficulty::Medium);
        assert_eq!(pair_difficulty(&big, &item("c", 500.0)), Difficulty::Hard);
    }

    #[test]
    fn test_tier_boundaries() {
        let base = item("base", 100.0);
        // Exactly 10x is still medium, exactly 3x is hard
        assert_eq!(pair_difficulty(&base, &item("x10", 1000.0)), Difficulty::Medium);
        assert_eq!(pair_difficulty(&base, &item("x3", 300.0)), Difficulty::Hard);
    }

    #[test]
    fn test_ratio_is_symmetric() {
        let a = item("a", 7.0);
        let b = item("b", 70.0);
        assert_eq!(value_ratio(&a, &b), value_ratio(&b, &a));
    }

    #[test]
    fn test_zero_values() {
        let zero = item("z", 0.0);
        assert_eq!(value_ratio(&zero, &item("z2", 0.0)), 1.0);
        assert!(value_ratio(&zero, &item("a", 5.0)).is_infinite());
        assert_eq!(pair_difficulty(&zero, &item("a", 5.0)), Difficulty::Easy);
    }

    #[test]
    fn test_target_by_streak() {
        assert_eq!(target_difficulty(0), TargetDifficulty::Tier(Difficulty::Easy));
        assert_eq!(target_difficulty(4), TargetDifficulty::Tier(Difficulty::Easy));
        assert_eq!(target_difficulty(5), TargetDifficulty::Tier(Difficulty::Medium));
        assert_eq!(target_difficulty(12), TargetDifficulty::Mixed);
        assert_eq!(target_difficulty(15), TargetDifficulty::Tier(Difficulty::Hard));
        assert_eq!(target_difficulty(99), TargetDifficulty::Tier(Difficulty::Hard));
    }

    #[test]
    fn test_boss_rounds() {
        assert!(!is_boss_round(0));
        assert!(!is_boss_round(4));
        assert!(is_boss_round(5));
        assert!(is_boss_round(10));
        assert_eq!(target_for_round(5, 1), TargetDifficulty::Tier(Difficulty::Hard));
        assert_eq!(target_for_round(6, 1), TargetDifficulty::Tier(Difficulty::Easy));
    }
}
