//! Deterministic seeding utilities.
//!
//! - SeedSequence: expands a root u64 seed into deterministic sub-seeds,
//!   used by the coordinator to derive one seed per worker
//! - RngStream: a reproducible PRNG stream (ChaCha8)

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Type alias for the default RNG stream used across the crate.
pub type RngStream = ChaCha8Rng;

/// SplitMix64 mixer used to expand a 64-bit seed into a sequence of pseudo-random u64 values.
/// Fast and deterministic, ideal for deriving per-worker sub-seeds.
#[derive(Clone, Debug)]
pub struct SeedSequence {
    state: u128, // keep some extra space to avoid trivial cycles when mixing
}

impl SeedSequence {
    /// Create a new seed sequence from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        // Constants from the SplitMix64 reference for good bit diffusion.
        let init = (seed as u128) ^ 0x9E3779B97F4A7C15u128;
        Self { state: init }
    }

    /// Generate the next sub-seed deterministically.
    pub fn next_subseed(&mut self) -> u64 {
        let mut z = (self.state as u64).wrapping_add(0x9E3779B97F4A7C15);
        self.state = (self.state ^ (z as u128)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// Create an RNG stream seeded from the next subseed.
    pub fn next_rng(&mut self) -> RngStream {
        let s = self.next_subseed();
        RngStream::seed_from_u64(s)
    }

    /// Produce `n` sub-seeds deterministically from this sequence.
    pub fn split_n(&mut self, n: usize) -> Vec<u64> {
        (0..n).map(|_| self.next_subseed()).collect()
    }
}

/// Split a root seed into N sub-seeds deterministically (convenience helper).
pub fn split_n(seed: u64, n: usize) -> Vec<u64> {
    let mut ss = SeedSequence::new(seed);
    ss.split_n(n)
}

/// Create a new RNG stream from a root seed (convenience).
pub fn rng_from_seed(seed: u64) -> RngStream {
    RngStream::seed_from_u64(seed)
}
