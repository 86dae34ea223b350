//! Deterministic RNG wrapper and seed-derivation helpers.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Spacing between replica seeds derived from one base seed.
pub const REPLICA_SEED_STRIDE: u64 = 7919;

/// Deterministic RNG handle for engines that draw their own noise.
#[derive(Debug, Clone)]
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Creates a new RNG handle from a master seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Derives the deterministic seed for a specific substream.
///
/// Hashes `(master_seed, substream)` with SipHash-1-3 under fixed zero keys,
/// so the result is identical on every platform.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}

/// Seed for replica `replica` of a group started from `base_seed`.
///
/// Offsets are `replica * REPLICA_SEED_STRIDE`, so seeds within a group are
/// pairwise distinct for any realistic replica count.
pub fn replica_seed(base_seed: u64, replica: usize) -> u64 {
    base_seed.wrapping_add((replica as u64).wrapping_mul(REPLICA_SEED_STRIDE))
}
