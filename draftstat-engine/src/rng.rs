//! Seeded, injectable randomness for transition direction choices.
//!
//! Every ingestion request draws from its own stream. Streams are derived
//! from the configured seed and a monotonically increasing request counter,
//! so a replay with the same seed reproduces the same directions.

use hmac::{Hmac, Mac};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::TRANSITION_STREAM_TAG;

/// Counting wrapper for RNG streams providing instrumentation.
#[derive(Debug, Clone)]
pub struct CountingRng<R> {
    rng: R,
    draws: u64,
}

impl CountingRng<ChaCha8Rng> {
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self::wrap(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: RngCore> CountingRng<R> {
    pub const fn wrap(rng: R) -> Self {
        Self { rng, draws: 0 }
    }

    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl<R: RngCore> RngCore for CountingRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

/// Domain-separated child seed of `user_seed`.
#[must_use]
pub fn derive_stream_seed(user_seed: u64, domain_tag: &[u8]) -> u64 {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&user_seed.to_le_bytes()) else {
        return user_seed;
    };
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}

/// Hands out one independent stream per ingestion request.
#[derive(Debug)]
pub struct RngSource {
    seed: u64,
    issued: AtomicU64,
}

impl RngSource {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            issued: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Streams handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Stream for the next request.
    pub fn next_stream(&self) -> CountingRng<ChaCha8Rng> {
        let index = self.issued.fetch_add(1, Ordering::Relaxed);
        self.stream(index)
    }

    /// Stream number `index`, independent of the counter.
    #[must_use]
    pub fn stream(&self, index: u64) -> CountingRng<ChaCha8Rng> {
        let mut tag = TRANSITION_STREAM_TAG.to_vec();
        tag.extend_from_slice(&index.to_le_bytes());
        CountingRng::from_seed(derive_stream_seed(self.seed, &tag))
    }
}
