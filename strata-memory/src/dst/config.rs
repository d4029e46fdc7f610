//! `SimConfig` - Simulation Configuration
//!
//! `TigerStyle`: Seed management for deterministic testing.

use std::env;

use rand::Rng;

use crate::constants::DST_SIMULATION_STEPS_MAX;

/// Configuration for a simulation run.
///
/// `TigerStyle`: immutable after creation, seed printed for replay.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    seed: u64,
    steps_max: u64,
}

impl SimConfig {
    /// Create config with explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            steps_max: DST_SIMULATION_STEPS_MAX,
        }
    }

    /// Create config from `DST_SEED` or a random seed.
    ///
    /// A random seed is printed so a failing run can be replayed with
    /// `DST_SEED=<seed> cargo test`.
    ///
    /// # Panics
    /// Panics if `DST_SEED` is set but is not a valid u64.
    #[must_use]
    pub fn from_env_or_random() -> Self {
        let seed = match env::var("DST_SEED") {
            Ok(seed_str) => seed_str
                .parse::<u64>()
                .unwrap_or_else(|_| panic!("DST_SEED must be a valid u64, got: {seed_str}")),
            Err(_) => {
                let seed = rand::thread_rng().gen::<u64>();
                eprintln!("DST: Generated random seed (replay with DST_SEED={seed})");
                seed
            }
        };

        Self::with_seed(seed)
    }

    /// The seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Maximum number of simulation steps.
    #[must_use]
    pub fn steps_max(&self) -> u64 {
        self.steps_max
    }

    /// Override the step limit.
    ///
    /// # Panics
    /// Panics if `steps_max` is zero.
    #[must_use]
    pub fn with_steps_max(mut self, steps_max: u64) -> Self {
        assert!(steps_max > 0, "steps_max must be positive");
        self.steps_max = steps_max;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::from_env_or_random()
    }
}
