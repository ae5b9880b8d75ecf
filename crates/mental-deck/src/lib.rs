//! # Mental Deck - commutative card encryption
//!
//! The cryptographic half of dealer-less card dealing. A [`CommutativeDeck`]
//! holds one peer's secrets and its view of the shared deck; peers exchange
//! the hex-encoded points it produces until every peer holds the same locked
//! deck, after which any card opens only when every peer releases its key
//! share for that position.
//!
//! ## Components
//!
//! - [`RandomSource`]: OS entropy, or a seeded HMAC-DRBG for reproducible runs
//! - [`UniformSampler`]: rejection sampling over a refillable bit pool
//! - [`RingShuffler`]: replayable Fisher–Yates plan
//! - [`Curve`] / [`Ristretto255`]: the prime-order group
//! - [`CommutativeDeck`]: commit, shuffle, lock, draw and unlock

pub mod deck;
pub mod error;
pub mod group;
pub mod rng;
pub mod sampler;
pub mod shuffle;

pub use deck::{CommutativeDeck, DeckConfig, MAX_CARDS};
pub use error::{DeckError, Result};
pub use group::{Curve, Ristretto255};
pub use rng::{RandomSource, MIN_ENTROPY_BYTES};
pub use sampler::{UniformSampler, MAX_BOUND};
pub use shuffle::RingShuffler;
