//! Seeded PRNG backing `random()` and `uuid4()` in workflow code.
//!
//! Replay requires byte-identical draw sequences across platforms, so the
//! generator is a ChaCha8 stream keyed from the randomness-seed vector the
//! service provides. The whole generator is swapped atomically when an
//! `updateRandomSeed` job arrives.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic random source for one workflow run.
#[derive(Debug, Clone)]
pub struct DeterministicRandom {
    rng: ChaCha8Rng,
}

impl DeterministicRandom {
    /// Build a generator from an arbitrary-length seed vector. The seed is
    /// cycled into the 32-byte ChaCha key; an empty seed yields the all-zero
    /// key.
    pub fn new(seed: &[u8]) -> Self {
        let mut key = [0u8; 32];
        if !seed.is_empty() {
            for (i, slot) in key.iter_mut().enumerate() {
                *slot = seed[i % seed.len()];
            }
        }
        Self {
            rng: ChaCha8Rng::from_seed(key),
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Fill `buf` from the stream. Used for deterministic UUIDs.
    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    /// Deterministic v4-shaped UUID drawn from the stream.
    pub fn uuid4(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            bytes[0], bytes[1], bytes[2], bytes[3],
            bytes[4], bytes[5],
            bytes[6], bytes[7],
            bytes[8], bytes[9],
            bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        )
    }
}
