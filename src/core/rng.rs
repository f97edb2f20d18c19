//! Seeded Selection Stream
//!
//! Xorshift128+ generator keyed by `(run seed, round number, domain)`.
//! Every round gets an independent stream, so the server can recompute the
//! item for round N at any time without replaying rounds 0..N.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Domain separator for the opening pair.
pub const DOMAIN_INITIAL: &[u8] = b"CAPORSLAP_INITIAL_V1";
/// Domain separator for the regular next-item draw.
pub const DOMAIN_NEXT: &[u8] = b"CAPORSLAP_NEXT_V1";
/// Domain separator for the replacement item drawn after a reprieve.
pub const DOMAIN_REPRIEVE: &[u8] = b"CAPORSLAP_REPRIEVE_V1";

/// Deterministic PRNG using Xorshift128+.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG produces the exact same sequence on any
/// platform and across process restarts.
///
/// # Example
///
/// ```
/// use cap_or_slap::core::rng::{SeededStream, DOMAIN_NEXT};
///
/// let mut a = SeededStream::for_round("s1", 3, DOMAIN_NEXT);
/// let mut b = SeededStream::for_round("s1", 3, DOMAIN_NEXT);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeededStream {
    state: [u64; 2],
}

impl Default for SeededStream {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SeededStream {
    /// Create a stream from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the stream for one round of a run.
    pub fn for_round(seed: &str, round: u32, domain: &[u8]) -> Self {
        Self::new(derive_round_seed(seed, round, domain))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a float in [0, 1) from the top 53 bits.
    #[inline]
    pub fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Fair coin flip.
    #[inline]
    pub fn next_coin(&mut self) -> bool {
        self.next_u64() >> 63 == 1
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Non-positive weights are never picked. Returns `None` when no weight
    /// is positive.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }

        let mut remaining = self.next_unit() * total;
        let mut last_positive = None;
        for (idx, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            last_positive = Some(idx);
            if remaining < *weight {
                return Some(idx);
            }
            remaining -= weight;
        }

        // Float rounding can leave a sliver at the end
        last_positive
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the 64-bit stream seed for one round.
///
/// The seed string is length-prefixed so `("ab", 1)` and `("a", ...)`
/// can never collide on the byte level.
pub fn derive_round_seed(seed: &str, round: u32, domain: &[u8]) -> u64 {
    let mut hasher = Sha256::new();

    hasher.update(domain);
    hasher.update((seed.len() as u64).to_le_bytes());
    hasher.update(seed.as_bytes());
    hasher.update(round.to_le_bytes());

    let hash = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(bytes)
}

/// Draw a fresh opaque run seed.
pub fn generate_run_seed() -> String {
    hex::encode(uuid::Uuid::new_v4().as_bytes())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = SeededStream::new(12345);
        let mut rng2 = SeededStream::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = SeededStream::new(12345);
        let mut rng2 = SeededStream::new(54321);

        // Very unlikely to match
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_round_streams_are_independent() {
        let a = derive_round_seed("s1", 1, DOMAIN_NEXT);
        let b = derive_round_seed("s1", 2, DOMAIN_NEXT);
        let c = derive_round_seed("s1", 1, DOMAIN_REPRIEVE);
        let d = derive_round_seed("s2", 1, DOMAIN_NEXT);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a, derive_round_seed("s1", 1, DOMAIN_NEXT));
    }

    #[test]
    fn test_streams_are_pinned() {
        // Runs stored before a restart replay against these exact values
        assert_eq!(derive_round_seed("s1", 1, DOMAIN_NEXT), 0xad34_ad17_98b9_17a5);

        let mut rng = SeededStream::new(12345);
        assert_eq!(rng.next_u64(), 6_233_086_606_872_742_541);
        assert_eq!(rng.next_u64(), 16_773_932_862_165_078_138);

        let mut round = SeededStream::for_round("s1", 1, DOMAIN_NEXT);
        assert_eq!(round.next_u64(), 8_002_893_109_253_367_259);
    }

    #[test]
    fn test_next_int() {
        let mut rng = SeededStream::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_next_unit_range() {
        let mut rng = SeededStream::new(9999);

        for _ in 0..1000 {
            let v = rng.next_unit();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_choose_weighted_skips_zero_weights() {
        let mut rng = SeededStream::new(42);

        for _ in 0..500 {
            let idx = rng.choose_weighted(&[0.0, 1.0, 0.0, 0.5]).unwrap();
            assert!(idx == 1 || idx == 3);
        }

        assert_eq!(rng.choose_weighted(&[]), None);
        assert_eq!(rng.choose_weighted(&[0.0, 0.0]), None);
    }

    #[test]
    fn test_choose_weighted_prefers_heavy_items() {
        let mut rng = SeededStream::new(7);
        let mut counts = [0u32; 2];

        for _ in 0..4000 {
            counts[rng.choose_weighted(&[1.0, 0.25]).unwrap()] += 1;
        }

        // Expect roughly 4:1
        assert!(counts[0] > counts[1] * 3);
    }

    #[test]
    fn test_generated_seeds_are_unique() {
        let a = generate_run_seed();
        let b = generate_run_seed();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
