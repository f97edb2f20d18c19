//! Seeded Sequencer
//!
//! Pure selection of item pairs. Every draw comes from a stream keyed by
//! `(seed, round, domain)`, so for a fixed catalog snapshot the item chosen
//! for round N is the same no matter when or how often it is recomputed.
//!
//! ## Selection
//!
//! 1. Hard-exclude the current item (and any explicitly excluded ids).
//! 2. Keep candidates whose pair with the current item matches the target
//!    tier; boss rounds target hard. Fall back to every candidate when the
//!    tier is empty.
//! 3. Weight recently shown items down (newest to a 0.3 floor) and draw.

use thiserror::Error;

use crate::core::rng::{SeededStream, DOMAIN_INITIAL, DOMAIN_NEXT, DOMAIN_REPRIEVE};
use super::catalog::{Catalog, Item};
use super::difficulty::{pair_difficulty, target_for_round, TargetDifficulty};

/// How many distinct recent items are down-weighted.
pub const RECENT_WINDOW: usize = 10;

/// Weight of the most recently shown item.
const RECENT_WEIGHT_FLOOR: f64 = 0.3;
/// Weight range spread across the recent window.
const RECENT_WEIGHT_SPAN: f64 = 0.5;
/// Weight of items not seen recently.
const FRESH_WEIGHT: f64 = 1.0;

/// Selection failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// Fewer than two usable items.
    #[error("catalog exhausted: need at least 2 items, {available} available")]
    CatalogExhausted {
        /// Items that could have been chosen.
        available: usize,
    },
    /// The current item is not in the catalog snapshot.
    #[error("unknown item {0}")]
    UnknownItem(String),
}

/// Inputs for choosing the hidden item of a round.
#[derive(Debug, Clone)]
pub struct SelectionContext<'a> {
    /// Item that stays visible.
    pub current: &'a Item,
    /// Round being prepared.
    pub round: u32,
    /// Streak the round is played at.
    pub streak: u32,
    /// Recently shown ids, most recent first.
    pub recent_ids: &'a [String],
    /// Ids that must not be picked besides the current item.
    pub excluded_ids: &'a [String],
}

/// Weight for an item given the recency list (most recent first).
pub fn recency_weight(id: &str, recent_ids: &[String]) -> f64 {
    match recent_ids.iter().position(|r| r == id) {
        None => FRESH_WEIGHT,
        Some(idx) => {
            RECENT_WEIGHT_FLOOR + (idx as f64 / recent_ids.len() as f64) * RECENT_WEIGHT_SPAN
        }
    }
}

/// Opening pair: one item from the top third by value, one from the bottom
/// third, in seed-determined order.
pub fn select_initial_pair(catalog: &Catalog, seed: &str) -> Result<(Item, Item), SequenceError> {
    if catalog.len() < 2 {
        return Err(SequenceError::CatalogExhausted { available: catalog.len() });
    }

    // Ties broken by id so the ordering never depends on sort stability
    let mut sorted: Vec<&Item> = catalog.items().iter().collect();
    sorted.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.id.cmp(&b.id)));

    let third = sorted.len().div_ceil(3);
    let top = &sorted[..third];
    let bottom = &sorted[sorted.len() - third..];

    let mut rng = SeededStream::for_round(seed, 0, DOMAIN_INITIAL);
    let first = *rng
        .choose(top)
        .ok_or(SequenceError::CatalogExhausted { available: 0 })?;
    let mut second = *rng
        .choose(bottom)
        .ok_or(SequenceError::CatalogExhausted { available: 0 })?;

    if second.id == first.id {
        second = bottom
            .iter()
            .copied()
            .find(|item| item.id != first.id)
            .or_else(|| sorted.iter().rev().copied().find(|item| item.id != first.id))
            .ok_or(SequenceError::CatalogExhausted { available: 1 })?;
    }

    if rng.next_coin() {
        Ok((first.clone(), second.clone()))
    } else {
        Ok((second.clone(), first.clone()))
    }
}

/// Hidden item for a round.
pub fn select_next(
    catalog: &Catalog,
    seed: &str,
    ctx: &SelectionContext<'_>,
) -> Result<Item, SequenceError> {
    select_with_domain(catalog, seed, ctx, DOMAIN_NEXT)
}

/// Replacement hidden item after a reprieve.
///
/// `failed_id` is excluded when anything else remains so the player does not
/// see the comparison they just lost.
pub fn select_fresh(
    catalog: &Catalog,
    seed: &str,
    ctx: &SelectionContext<'_>,
    failed_id: &str,
) -> Result<Item, SequenceError> {
    let mut excluded: Vec<String> = ctx.excluded_ids.to_vec();
    excluded.push(failed_id.to_string());

    let strict = SelectionContext { excluded_ids: &excluded, ..ctx.clone() };
    match select_with_domain(catalog, seed, &strict, DOMAIN_REPRIEVE) {
        Err(SequenceError::CatalogExhausted { .. }) => {
            select_with_domain(catalog, seed, ctx, DOMAIN_REPRIEVE)
        }
        other => other,
    }
}

fn select_with_domain(
    catalog: &Catalog,
    seed: &str,
    ctx: &SelectionContext<'_>,
    domain: &[u8],
) -> Result<Item, SequenceError> {
    let candidates: Vec<&Item> = catalog
        .items()
        .iter()
        .filter(|item| item.id != ctx.current.id && !ctx.excluded_ids.contains(&item.id))
        .collect();

    if candidates.is_empty() {
        return Err(SequenceError::CatalogExhausted {
            available: catalog.len().min(1),
        });
    }

    let tiered: Vec<&Item> = match target_for_round(ctx.round, ctx.streak) {
        TargetDifficulty::Mixed => candidates.clone(),
        TargetDifficulty::Tier(tier) => candidates
            .iter()
            .copied()
            .filter(|item| pair_difficulty(ctx.current, item) == tier)
            .collect(),
    };
    let pool = if tiered.is_empty() { candidates } else { tiered };

    let weights: Vec<f64> = pool
        .iter()
        .map(|item| recency_weight(&item.id, ctx.recent_ids))
        .collect();

    let mut rng = SeededStream::for_round(seed, ctx.round, domain);
    let idx = rng.choose_weighted(&weights).unwrap_or(pool.len() - 1);
    Ok(pool[idx].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::test_support::catalog;
    use crate::game::difficulty::Difficulty;
    use proptest::prelude::*;

    fn pool() -> Catalog {
        catalog(&[
            ("btc", 1_000_000.0),
            ("eth", 400_000.0),
            ("sol", 80_000.0),
            ("doge", 30_000.0),
            ("link", 9_000.0),
            ("pepe", 4_000.0),
            ("brett", 1_500.0),
            ("degen", 600.0),
            ("toshi", 250.0),
        ])
    }

    fn ctx<'a>(current: &'a Item, round: u32, streak: u32) -> SelectionContext<'a> {
        SelectionContext { current, round, streak, recent_ids: &[], excluded_ids: &[] }
    }

    #[test]
    fn test_initial_pair_is_deterministic() {
        let catalog = pool();
        let a = select_initial_pair(&catalog, "s1").unwrap();
        let b = select_initial_pair(&catalog, "s1").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.0.id, a.1.id);
    }

    #[test]
    fn test_selection_is_pinned() {
        let catalog = pool();
        let (first, second) = select_initial_pair(&catalog, "s1").unwrap();
        assert_eq!((first.id.as_str(), second.id.as_str()), ("eth", "brett"));

        let btc = catalog.get("btc").unwrap().clone();
        let doge = catalog.get("doge").unwrap().clone();
        let pick = |current: &Item, round: u32| {
            select_next(&catalog, "s1", &ctx(current, round, round)).unwrap().id
        };
        assert_eq!(pick(&btc, 1), "pepe");
        assert_eq!(pick(&doge, 1), "brett");
        assert_eq!(pick(&btc, 5), "eth");
        assert_eq!(pick(&doge, 5), "sol");
        assert_eq!(pick(&btc, 12), "link");

        let fresh = select_fresh(&catalog, "s1", &ctx(&btc, 1, 1), "pepe").unwrap();
        assert_eq!(fresh.id, "sol");
    }

    #[test]
    fn test_initial_pair_spans_thirds() {
        let catalog = pool();
        let top = ["btc", "eth", "sol"];
        let bottom = ["brett", "degen", "toshi"];

        for i in 0..50 {
            let (x, y) = select_initial_pair(&catalog, &format!("seed-{}", i)).unwrap();
            let ids = [x.id.as_str(), y.id.as_str()];
            assert!(ids.iter().any(|id| top.contains(id)));
            assert!(ids.iter().any(|id| bottom.contains(id)));
        }
    }

    #[test]
    fn test_initial_pair_two_items() {
        let catalog = catalog(&[("a", 1.0), ("b", 2.0)]);
        let (x, y) = select_initial_pair(&catalog, "tiny").unwrap();
        assert_ne!(x.id, y.id);
    }

    #[test]
    fn test_catalog_exhausted() {
        let single = catalog(&[("only", 1.0)]);
        assert_eq!(
            select_initial_pair(&single, "s1"),
            Err(SequenceError::CatalogExhausted { available: 1 })
        );

        let current = single.get("only").unwrap().clone();
        let result = select_next(&single, "s1", &ctx(&current, 1, 1));
        assert!(matches!(result, Err(SequenceError::CatalogExhausted { .. })));
    }

    #[test]
    fn test_next_never_repeats_current() {
        let catalog = pool();
        let current = catalog.get("doge").unwrap().clone();
        for round in 0..40 {
            let next = select_next(&catalog, "s1", &ctx(&current, round, round)).unwrap();
            assert_ne!(next.id, current.id);
        }
    }

    #[test]
    fn test_low_streak_targets_easy_pairs() {
        let catalog = pool();
        let current = catalog.get("btc").unwrap().clone();
        for round in [1, 2, 3, 4] {
            let seed = format!("e{}", round);
            let next = select_next(&catalog, &seed, &ctx(&current, round, 0)).unwrap();
            assert_eq!(pair_difficulty(&current, &next), Difficulty::Easy);
        }
    }

    #[test]
    fn test_boss_round_forces_hard() {
        let catalog = pool();
        let current = catalog.get("btc").unwrap().clone();
        // Streak 0 would target easy, round 5 overrides it
        let next = select_next(&catalog, "boss", &ctx(&current, 5, 0)).unwrap();
        assert_eq!(next.id, "eth");
    }

    #[test]
    fn test_empty_tier_falls_back() {
        // Nothing within 3x of 1000 besides itself
        let catalog = catalog(&[("a", 1000.0), ("b", 1.0), ("c", 2.0)]);
        let current = catalog.get("a").unwrap().clone();
        let next = select_next(&catalog, "s1", &ctx(&current, 5, 20)).unwrap();
        assert!(next.id == "b" || next.id == "c");
    }

    #[test]
    fn test_recency_weights() {
        let recent: Vec<String> = vec!["x".into(), "y".into()];
        assert_eq!(recency_weight("z", &recent), 1.0);
        assert!((recency_weight("x", &recent) - 0.3).abs() < 1e-9);
        assert!((recency_weight("y", &recent) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_recent_items_are_still_selectable() {
        // Two candidates, both recent: selection must not starve
        let catalog = catalog(&[("a", 1.0), ("b", 1.5), ("c", 2.0)]);
        let current = catalog.get("a").unwrap().clone();
        let recent: Vec<String> = vec!["b".into(), "c".into()];
        let ctx = SelectionContext {
            current: &current,
            round: 3,
            streak: 3,
            recent_ids: &recent,
            excluded_ids: &[],
        };
        assert!(select_next(&catalog, "s1", &ctx).is_ok());
    }

    #[test]
    fn test_fresh_excludes_failed_item() {
        let catalog = pool();
        let current = catalog.get("btc").unwrap().clone();
        for i in 0..30 {
            let seed = format!("r{}", i);
            let failed = select_next(&catalog, &seed, &ctx(&current, 2, 2)).unwrap();
            let fresh = select_fresh(&catalog, &seed, &ctx(&current, 2, 2), &failed.id).unwrap();
            assert_ne!(fresh.id, failed.id);
            assert_ne!(fresh.id, current.id);
        }
    }

    #[test]
    fn test_fresh_falls_back_when_only_failed_remains() {
        let catalog = catalog(&[("a", 1.0), ("b", 2.0)]);
        let current = catalog.get("a").unwrap().clone();
        let fresh = select_fresh(&catalog, "s1", &ctx(&current, 1, 1), "b").unwrap();
        assert_eq!(fresh.id, "b");
    }

    proptest! {
        #[test]
        fn prop_select_next_is_referentially_stable(
            seed in "[a-z0-9]{1,12}",
            round in 0u32..200,
            streak in 0u32..40,
        ) {
            let catalog = pool();
            let current = catalog.items()[(round as usize) % catalog.len()].clone();
            let recent: Vec<String> = vec!["eth".into(), "pepe".into()];
            let ctx = SelectionContext {
                current: &current,
                round,
                streak,
                recent_ids: &recent,
                excluded_ids: &[],
            };

            let first = select_next(&catalog, &seed, &ctx).unwrap();
            let second = select_next(&catalog, &seed, &ctx).unwrap();
            prop_assert_eq!(&first.id, &second.id);
            prop_assert_ne!(&first.id, &current.id);
        }
    }
}
