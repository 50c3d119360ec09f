//! Deterministic pseudo-random numbers for shuffle selectors.
//!
//! Linear congruential generator; the state is part of runner state so
//! snapshots resume the exact same shuffle sequence.

use serde::{Deserialize, Serialize};

const A: u64 = 1_103_515_245;
const C: u64 = 12_345;
const M: u64 = 1 << 31;

/// LCG state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prng {
    x: u32,
}

impl Default for Prng {
    fn default() -> Self {
        Self { x: 1337 }
    }
}

impl Prng {
    /// Seeded generator.
    #[must_use]
    pub fn with_seed(seed: u32) -> Self {
        Self { x: seed }
    }

    /// Next raw value in `[0, 2^31)`.
    pub fn next(&mut self) -> u32 {
        self.x = ((A * u64::from(self.x) + C) % M) as u32;
        self.x
    }

    /// Uniform value below `max` (0 when `max` is 0).
    pub fn below(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        ((u64::from(self.next()) * u64::from(max)) / M) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Prng::with_seed(7);
        let mut b = Prng::with_seed(7);
        for _ in 0..16 {
            assert_eq!(a.below(10), b.below(10));
        }
    }

    #[test]
    fn test_below_stays_in_range() {
        let mut p = Prng::default();
        for _ in 0..256 {
            assert!(p.below(5) < 5);
        }
    }
}
