//! Randomness for checksum perturbation.
//!
//! The re-encoder only needs "pick a coordinate below N". Keeping that behind
//! [`RandomSource`] lets tests pin the perturbed pixel with a fixed seed.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of uniformly distributed indices.
pub trait RandomSource: Send {
    /// Next raw 64-bit value.
    fn next_u64(&mut self) -> u64;

    /// A value in `0..bound`. `bound` must be non-zero.
    fn next_below(&mut self, bound: u32) -> u32 {
        debug_assert!(bound > 0);
        (self.next_u64() % bound as u64) as u32
    }
}

/// xorshift64 generator. Fast, tiny, and good enough for picking a pixel.
#[derive(Debug, Clone)]
pub struct XorShift {
    state: u64,
}

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    /// Seeded from the wall clock and the current thread.
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        let stack_addr = &nanos as *const u64 as u64;
        Self::new(nanos ^ stack_addr.rotate_left(32))
    }
}

impl RandomSource for XorShift {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = XorShift::new(42);
        let mut b = XorShift::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn zero_seed_is_not_stuck() {
        let mut rng = XorShift::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn next_below_stays_in_bounds() {
        let mut rng = XorShift::from_entropy();
        for bound in [1, 2, 7, 100, u32::MAX] {
            for _ in 0..64 {
                assert!(rng.next_below(bound) < bound);
            }
        }
    }
}
