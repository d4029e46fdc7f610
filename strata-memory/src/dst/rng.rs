//! `DeterministicRng` - Seeded Random Number Generator
//!
//! `TigerStyle`: ChaCha20-based RNG for deterministic simulation.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Golden-ratio increment used to derive fork seeds.
const FORK_SEED_INCREMENT: u64 = 0x9E37_79B9_7F4A_7C15;

/// A deterministic random number generator.
///
/// `TigerStyle`:
/// - Same seed always produces same sequence
/// - Fork creates independent streams
/// - All simulated randomness flows through this
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha20Rng,
    seed: u64,
    fork_counter: u64,
}

impl DeterministicRng {
    /// Create a new RNG with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed,
            fork_counter: 0,
        }
    }

    /// The original seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Random float in [0, 1).
    pub fn next_float(&mut self) -> f64 {
        let value = self.rng.gen::<f64>();
        debug_assert!((0.0..1.0).contains(&value), "float must be in [0, 1)");
        value
    }

    /// Random float in [min, max).
    ///
    /// # Panics
    /// Panics if `min > max`.
    pub fn next_float_in(&mut self, min: f64, max: f64) -> f64 {
        assert!(min <= max, "min ({min}) must be <= max ({max})");
        min + self.next_float() * (max - min)
    }

    /// Random u64.
    pub fn next_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Random usize in [min, max] (inclusive).
    ///
    /// # Panics
    /// Panics if `min > max`.
    pub fn next_usize(&mut self, min: usize, max: usize) -> usize {
        assert!(min <= max, "min ({min}) must be <= max ({max})");
        self.rng.gen_range(min..=max)
    }

    /// Random boolean with the given probability of `true`.
    ///
    /// # Panics
    /// Panics if probability is not in [0, 1].
    pub fn next_bool(&mut self, probability: f64) -> bool {
        assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1], got {probability}"
        );
        self.next_float() < probability
    }

    /// Choose a random element from a slice.
    ///
    /// # Panics
    /// Panics if the slice is empty.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "cannot choose from empty slice");
        &items[self.next_usize(0, items.len() - 1)]
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_usize(0, i);
            items.swap(i, j);
        }
    }

    /// Create an independent fork of this RNG.
    pub fn fork(&mut self) -> Self {
        self.fork_counter += 1;
        let fork_seed = self
            .seed
            .wrapping_add(self.fork_counter.wrapping_mul(FORK_SEED_INCREMENT));
        Self::new(fork_seed)
    }
}
