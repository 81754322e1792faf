//! Random number helpers.
//!
//! Arrival jitter must be reproducible in tests, so generators own a seeded
//! [`SeededRandom`]. Pool work-stealing only needs a cheap spread, so it uses
//! the thread-local generator through [`random_index`].

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic random source seeded from a `u64`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    seed: u64,
    rng: ChaCha8Rng,
}

impl SeededRandom {
    /// Create a generator with a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Create a generator seeded from the thread-local entropy source.
    pub fn from_entropy() -> Self {
        Self::new(rand::rng().random())
    }

    /// The seed this generator was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform `f64` in `[0, 1)`.
    pub fn random_ratio(&mut self) -> f64 {
        self.rng.random()
    }

    /// Draw from `Exp(1)` by inverse-CDF sampling.
    pub fn exponential(&mut self) -> f64 {
        // 1 - U lies in (0, 1], so the logarithm stays finite.
        -(1.0 - self.random_ratio()).ln()
    }
}

/// Uniform index in `0..len` from the thread-local generator.
///
/// Returns 0 when `len` is 0.
pub fn random_index(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        rand::rng().random_range(0..len)
    }
}
