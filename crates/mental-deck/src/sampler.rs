//! Unbiased integer sampling by rejection

use crate::error::{DeckError, Result};
use crate::rng::RandomSource;

/// Bytes pulled from the source per refill.
const RAND_BLOCK: usize = 64;

/// Largest bound accepted by [`UniformSampler::uniform`]; keeps the bit pool
/// inside a `u64`.
pub const MAX_BOUND: u32 = 1 << 31;

/// Turns random bytes into integers uniform over `[0, max)`.
///
/// Values are cut from a bit pool fed from 64-byte blocks. Each draw takes
/// the low `bits` bits of the pool, where `2^bits` is the smallest power of
/// two above `max`, and rejects anything `>= max`. Bits left over in the pool
/// survive a refill.
#[derive(Debug)]
pub struct UniformSampler {
    source: RandomSource,
    block: Vec<u8>,
    cursor: usize,
    pool: u64,
    pool_bits: u32,
}

impl UniformSampler {
    /// Wrap a random source.
    pub fn new(source: RandomSource) -> Self {
        Self {
            source,
            block: Vec::new(),
            cursor: 0,
            pool: 0,
            pool_bits: 0,
        }
    }

    /// Raw bytes from the underlying source.
    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        self.source.bytes(n)
    }

    /// Fill `dest` from the underlying source.
    pub fn fill(&mut self, dest: &mut [u8]) {
        self.source.fill(dest);
    }

    /// Uniform integer in `[0, max)`.
    ///
    /// Fails with [`DeckError::SampleBound`] if `max` is zero or above
    /// [`MAX_BOUND`].
    pub fn uniform(&mut self, max: u32) -> Result<u32> {
        if max == 0 || max > MAX_BOUND {
            return Err(DeckError::SampleBound {
                max: u64::from(max),
            });
        }

        let mut p: u64 = 1;
        let mut bits = 0;
        while p <= u64::from(max) {
            p <<= 1;
            bits += 1;
        }

        loop {
            let num = self.take_bits(bits, p);
            if num < u64::from(max) {
                return Ok(num as u32);
            }
        }
    }

    fn take_bits(&mut self, bits: u32, p: u64) -> u64 {
        while self.pool_bits < bits {
            if self.cursor == self.block.len() {
                self.block = self.source.bytes(RAND_BLOCK);
                self.cursor = 0;
            }
            self.pool |= u64::from(self.block[self.cursor]) << self.pool_bits;
            self.cursor += 1;
            self.pool_bits += 8;
        }

        let num = self.pool % p;
        self.pool >>= bits;
        self.pool_bits -= bits;
        num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seeded(seed: u8) -> UniformSampler {
        UniformSampler::new(RandomSource::seeded(&[seed; 32]).unwrap())
    }

    #[test]
    fn bound_of_one_always_yields_zero() {
        let mut sampler = seeded(1);
        for _ in 0..100 {
            assert_eq!(sampler.uniform(1), Ok(0));
        }
    }

    #[test]
    fn seeded_samplers_agree() {
        let mut a = seeded(9);
        let mut b = seeded(9);
        let xs: Vec<u32> = (0..64).map(|_| a.uniform(52).unwrap()).collect();
        let ys: Vec<u32> = (0..64).map(|_| b.uniform(52).unwrap()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn out_of_range_bounds_are_rejected() {
        let mut sampler = seeded(3);
        assert_eq!(sampler.uniform(0), Err(DeckError::SampleBound { max: 0 }));
        assert_eq!(
            sampler.uniform(MAX_BOUND + 1),
            Err(DeckError::SampleBound {
                max: u64::from(MAX_BOUND) + 1
            })
        );
        assert!(sampler.uniform(MAX_BOUND).is_ok());
    }

    proptest! {
        #[test]
        fn samples_stay_below_bound(seed in any::<u8>(), max in 1u32..100_000) {
            let mut sampler = seeded(seed);
            for _ in 0..32 {
                prop_assert!(sampler.uniform(max).unwrap() < max);
            }
        }
    }
}
