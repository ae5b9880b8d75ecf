//! Prime-order group used for card encryption
//!
//! The deck only needs a cyclic group of prime order: scalar multiplication
//! commutes, so every peer's encryption layer can be added or removed in any
//! order. [`Ristretto255`] is the provided implementation.

use crate::error::{DeckError, Result};
use crate::sampler::UniformSampler;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use std::fmt::Debug;
use zeroize::Zeroize;

/// Group descriptor consumed by the deck.
pub trait Curve: Send + Sync + 'static {
    /// Exponent type, an integer modulo the group order.
    type Scalar: Copy + Debug + Zeroize + Send + Sync;
    /// Group element.
    type Point: Copy + Debug + PartialEq + Send + Sync;

    /// Human-readable name used in logs.
    const NAME: &'static str;

    /// Fixed generator.
    fn base_point() -> Self::Point;

    /// Uniform non-zero scalar, sampled by rejection.
    fn random_scalar(sampler: &mut UniformSampler) -> Self::Scalar;

    /// Multiplicative inverse modulo the group order.
    fn invert(scalar: &Self::Scalar) -> Self::Scalar;

    /// Scalar multiplication.
    fn mul(point: &Self::Point, scalar: &Self::Scalar) -> Self::Point;

    /// Group addition.
    fn add(a: &Self::Point, b: &Self::Point) -> Self::Point;

    /// Compact hex encoding of a point.
    fn encode_point(point: &Self::Point) -> String;

    /// Inverse of [`encode_point`](Self::encode_point).
    fn decode_point(encoded: &str) -> Result<Self::Point>;

    /// Hex encoding of a scalar.
    fn encode_scalar(scalar: &Self::Scalar) -> String;

    /// Inverse of [`encode_scalar`](Self::encode_scalar).
    fn decode_scalar(encoded: &str) -> Result<Self::Scalar>;
}

/// The Ristretto group over Curve25519 (prime order ℓ ≈ 2^252).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ristretto255;

impl Ristretto255 {
    /// ℓ is just above 2^252, so 253 candidate bits accept about half the draws.
    const SCALAR_MASK: u8 = 0x1f;

    fn decode_32(encoded: &str) -> Option<[u8; 32]> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(encoded, &mut bytes).ok()?;
        Some(bytes)
    }
}

impl Curve for Ristretto255 {
    type Scalar = Scalar;
    type Point = RistrettoPoint;

    const NAME: &'static str = "ristretto255";

    fn base_point() -> RistrettoPoint {
        RISTRETTO_BASEPOINT_POINT
    }

    fn random_scalar(sampler: &mut UniformSampler) -> Scalar {
        let mut bytes = [0u8; 32];
        loop {
            sampler.fill(&mut bytes);
            bytes[31] &= Self::SCALAR_MASK;
            let candidate: Option<Scalar> = Scalar::from_canonical_bytes(bytes).into();
            if let Some(scalar) = candidate.filter(|s| *s != Scalar::ZERO) {
                bytes.zeroize();
                return scalar;
            }
        }
    }

    fn invert(scalar: &Scalar) -> Scalar {
        scalar.invert()
    }

    fn mul(point: &RistrettoPoint, scalar: &Scalar) -> RistrettoPoint {
        point * scalar
    }

    fn add(a: &RistrettoPoint, b: &RistrettoPoint) -> RistrettoPoint {
        a + b
    }

    fn encode_point(point: &RistrettoPoint) -> String {
        hex::encode(point.compress().as_bytes())
    }

    fn decode_point(encoded: &str) -> Result<RistrettoPoint> {
        Self::decode_32(encoded)
            .and_then(|bytes| CompressedRistretto(bytes).decompress())
            .ok_or_else(|| DeckError::InvalidPoint(encoded.to_string()))
    }

    fn encode_scalar(scalar: &Scalar) -> String {
        hex::encode(scalar.as_bytes())
    }

    fn decode_scalar(encoded: &str) -> Result<Scalar> {
        Self::decode_32(encoded)
            .and_then(|bytes| Option::from(Scalar::from_canonical_bytes(bytes)))
            .ok_or_else(|| DeckError::InvalidScalar(encoded.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RandomSource;

    fn sampler() -> UniformSampler {
        UniformSampler::new(RandomSource::seeded(&[0x42; 24]).unwrap())
    }

    #[test]
    fn point_encoding_round_trips() {
        let mut sampler = sampler();
        let s = Ristretto255::random_scalar(&mut sampler);
        let p = Ristretto255::mul(&Ristretto255::base_point(), &s);
        let encoded = Ristretto255::encode_point(&p);
        assert_eq!(encoded.len(), 64);
        assert_eq!(Ristretto255::decode_point(&encoded).unwrap(), p);
    }

    #[test]
    fn inverse_undoes_multiplication() {
        let mut sampler = sampler();
        let s = Ristretto255::random_scalar(&mut sampler);
        let t = Ristretto255::random_scalar(&mut sampler);
        let g = Ristretto255::base_point();

        let locked = Ristretto255::mul(&Ristretto255::mul(&g, &s), &t);
        let opened = Ristretto255::mul(
            &Ristretto255::mul(&locked, &Ristretto255::invert(&s)),
            &Ristretto255::invert(&t),
        );
        assert_eq!(opened, g);
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        assert!(matches!(
            Ristretto255::decode_point("zz"),
            Err(DeckError::InvalidPoint(_))
        ));
        // All-ones is not a canonical Ristretto encoding.
        assert!(Ristretto255::decode_point(&"ff".repeat(32)).is_err());
        assert!(matches!(
            Ristretto255::decode_scalar(&"ff".repeat(32)),
            Err(DeckError::InvalidScalar(_))
        ));
    }

    #[test]
    fn scalar_encoding_round_trips() {
        let mut sampler = sampler();
        let s = Ristretto255::random_scalar(&mut sampler);
        let encoded = Ristretto255::encode_scalar(&s);
        assert_eq!(Ristretto255::decode_scalar(&encoded).unwrap(), s);
    }
}
