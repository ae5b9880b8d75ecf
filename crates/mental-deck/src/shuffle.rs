//! Replayable Fisher–Yates permutation

use crate::error::{DeckError, Result};
use crate::sampler::UniformSampler;

/// A permutation plan fixed at construction.
///
/// The swap targets are drawn once, so the same permutation can be applied
/// to any number of lists of the planned length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingShuffler {
    len: usize,
    targets: Vec<usize>,
}

impl RingShuffler {
    /// Draw a plan for lists of `len` elements.
    ///
    /// Fails with [`DeckError::SampleBound`] if `len` exceeds what the
    /// sampler can draw from.
    pub fn new(sampler: &mut UniformSampler, len: usize) -> Result<Self> {
        let bound = u32::try_from(len).map_err(|_| DeckError::SampleBound { max: len as u64 })?;
        let targets = (0..bound.saturating_sub(1))
            .map(|i| -> Result<usize> { Ok((i + sampler.uniform(bound - i)?) as usize) })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { len, targets })
    }

    /// Length of the lists this plan applies to.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the plan is for empty lists.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Swap targets, `targets()[i]` is the position swapped with `i`.
    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Permute `list` in place.
    pub fn run<T>(&self, list: &mut [T]) -> Result<()> {
        if list.len() != self.len {
            return Err(DeckError::LengthMismatch {
                expected: self.len,
                actual: list.len(),
            });
        }
        for (i, &j) in self.targets.iter().enumerate() {
            list.swap(i, j);
        }
        Ok(())
    }
}
