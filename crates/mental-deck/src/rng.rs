//! Random byte source
//!
//! Production decks draw from the operating system. Seeded decks run an
//! HMAC-DRBG (SHA-512) so that a test can replay a whole game byte for byte.

use crate::error::{DeckError, Result};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain separation tag mixed into every seeded generator.
const PERSONALIZATION: [u8; 4] = [0xde, 0xcc, 0xca, 0xad];

/// Minimum seed length: the 192-bit security strength of HMAC-DRBG/SHA-512.
pub const MIN_ENTROPY_BYTES: usize = 24;

const OUT_LEN: usize = 64;

type HmacSha512 = Hmac<Sha512>;

/// Source of uniformly distributed bytes.
#[derive(Debug)]
pub struct RandomSource {
    entropy: Option<Vec<u8>>,
    drbg: Option<HmacDrbg>,
}

impl RandomSource {
    /// Bytes from the operating system's entropy source.
    pub fn new() -> Self {
        Self {
            entropy: None,
            drbg: None,
        }
    }

    /// Deterministic bytes derived from `entropy`.
    ///
    /// The generator is built lazily on the first call to [`bytes`](Self::bytes).
    pub fn seeded(entropy: &[u8]) -> Result<Self> {
        if entropy.len() < MIN_ENTROPY_BYTES {
            return Err(DeckError::InsufficientEntropy {
                actual: entropy.len(),
                required: MIN_ENTROPY_BYTES,
            });
        }
        Ok(Self {
            entropy: Some(entropy.to_vec()),
            drbg: None,
        })
    }

    /// Whether this source replays a seeded stream.
    pub fn is_deterministic(&self) -> bool {
        self.entropy.is_some()
    }

    /// Next `n` random bytes.
    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.fill(&mut out);
        out
    }

    /// Fill `dest` with random bytes.
    pub fn fill(&mut self, dest: &mut [u8]) {
        let Some(entropy) = self.entropy.as_deref() else {
            OsRng.fill_bytes(dest);
            return;
        };
        self.drbg
            .get_or_insert_with(|| HmacDrbg::new(entropy, &[], &PERSONALIZATION))
            .generate(dest);
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RandomSource {
    fn drop(&mut self) {
        self.entropy.zeroize();
    }
}

/// HMAC-DRBG over SHA-512 (NIST SP 800-90A, no prediction resistance).
#[derive(Zeroize, ZeroizeOnDrop)]
struct HmacDrbg {
    k: [u8; OUT_LEN],
    v: [u8; OUT_LEN],
}

impl std::fmt::Debug for HmacDrbg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacDrbg").finish_non_exhaustive()
    }
}

impl HmacDrbg {
    fn new(entropy: &[u8], nonce: &[u8], personalization: &[u8]) -> Self {
        let mut drbg = Self {
            k: [0x00; OUT_LEN],
            v: [0x01; OUT_LEN],
        };
        let mut seed = Vec::with_capacity(entropy.len() + nonce.len() + personalization.len());
        seed.extend_from_slice(entropy);
        seed.extend_from_slice(nonce);
        seed.extend_from_slice(personalization);
        drbg.update(&seed);
        seed.zeroize();
        drbg
    }

    #[allow(clippy::expect_used)]
    fn hmac(key: &[u8; OUT_LEN], parts: &[&[u8]]) -> [u8; OUT_LEN] {
        let mut mac =
            <HmacSha512 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
        for part in parts {
            mac.update(part);
        }
        let mut out = [0u8; OUT_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    fn update(&mut self, seed: &[u8]) {
        self.k = Self::hmac(&self.k, &[&self.v, &[0x00], seed]);
        self.v = Self::hmac(&self.k, &[&self.v]);
        if seed.is_empty() {
            return;
        }
        self.k = Self::hmac(&self.k, &[&self.v, &[0x01], seed]);
        self.v = Self::hmac(&self.k, &[&self.v]);
    }

    fn generate(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(OUT_LEN) {
            self.v = Self::hmac(&self.k, &[&self.v]);
            chunk.copy_from_slice(&self.v[..chunk.len()]);
        }
        self.update(&[]);
    }
}
