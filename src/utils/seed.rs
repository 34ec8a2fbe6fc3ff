//! Seeded random number generators.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hands out reproducible RNGs derived from one base seed.
///
/// `rng()` always restarts the base stream, so two models built from
/// `seeder.rng()` get identical weights regardless of what was drawn
/// before. Use `rng_for` for streams that must differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seeder {
    seed: u64,
}

impl Seeder {
    pub fn new(seed: u64) -> Self {
        Seeder { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// A fresh generator on the base stream.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    /// A generator for the named stream, independent of the base stream.
    pub fn rng_for(&self, stream: u64) -> StdRng {
        // splitmix64 finalizer over the combined seed
        let mut z = self
            .seed
            .wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        StdRng::seed_from_u64(z ^ (z >> 31))
    }
}

impl Default for Seeder {
    fn default() -> Self {
        Seeder::new(1)
    }
}
