//! Commutative-encryption deck
//!
//! Every card is a group element. Peers first blind the cards additively
//! (commit), then each peer permutes the deck and multiplies it by a private
//! shuffle secret on a ring pass (shuffle). A second ring pass strips each
//! shuffle secret again and replaces it with a per-position lock secret
//! (lock). A card at position `i` opens once every peer reveals the inverse
//! of its lock secret for `i`, and the result is matched back against the
//! commitment set by a linear scan.

use crate::error::{DeckError, Result};
use crate::group::{Curve, Ristretto255};
use crate::rng::RandomSource;
use crate::sampler::UniformSampler;
use crate::shuffle::RingShuffler;
use std::fmt;
use tracing::debug;
use zeroize::Zeroize;

/// Most cards a deck can hold.
pub const MAX_CARDS: usize = 0xff;

/// Deck construction parameters.
#[derive(Clone, Default)]
pub struct DeckConfig {
    /// Number of card slots, `1..=255`.
    pub card_count: usize,
    /// Seed for deterministic randomness; OS entropy when absent.
    pub entropy: Option<Vec<u8>>,
}

impl DeckConfig {
    /// Configuration for `card_count` cards drawing on OS entropy.
    pub fn new(card_count: usize) -> Self {
        Self {
            card_count,
            entropy: None,
        }
    }

    /// Seed the deck's randomness.
    pub fn with_entropy(mut self, entropy: impl Into<Vec<u8>>) -> Self {
        self.entropy = Some(entropy.into());
        self
    }
}

impl fmt::Debug for DeckConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeckConfig")
            .field("card_count", &self.card_count)
            .field("seeded", &self.entropy.is_some())
            .finish()
    }
}

/// One peer's view of the jointly shuffled deck.
pub struct CommutativeDeck<C: Curve = Ristretto255> {
    card_count: usize,
    sampler: UniformSampler,
    shuffler: RingShuffler,
    shuffle_secret: C::Scalar,
    lock_secrets: Vec<C::Scalar>,
    cards: Vec<C::Point>,
    locked: Vec<C::Point>,
    drawn: Vec<bool>,
}

impl<C: Curve> CommutativeDeck<C> {
    /// Create a deck and draw all of this peer's secrets.
    pub fn new(config: &DeckConfig) -> Result<Self> {
        let card_count = config.card_count;
        if card_count == 0 || card_count > MAX_CARDS {
            return Err(DeckError::CardCount(card_count));
        }

        let source = match &config.entropy {
            Some(entropy) => RandomSource::seeded(entropy)?,
            None => RandomSource::new(),
        };
        let mut sampler = UniformSampler::new(source);

        let shuffler = RingShuffler::new(&mut sampler, card_count)?;
        let shuffle_secret = C::random_scalar(&mut sampler);
        let lock_secrets = (0..card_count)
            .map(|_| C::random_scalar(&mut sampler))
            .collect();

        Ok(Self {
            card_count,
            sampler,
            shuffler,
            shuffle_secret,
            lock_secrets,
            cards: Vec::new(),
            locked: Vec::new(),
            drawn: vec![false; card_count],
        })
    }

    /// Number of card slots.
    pub fn card_count(&self) -> usize {
        self.card_count
    }

    /// Whether `commit` has run.
    pub fn is_committed(&self) -> bool {
        !self.cards.is_empty()
    }

    /// Whether the final deck has been stored.
    pub fn is_locked(&self) -> bool {
        !self.locked.is_empty()
    }

    /// Whether slot `index` has been drawn or had its key released.
    pub fn is_drawn(&self, index: usize) -> bool {
        self.drawn.get(index).copied().unwrap_or(false)
    }

    /// Encoded card identities in commit order.
    pub fn cards(&self) -> Vec<String> {
        encode_all::<C>(&self.cards)
    }

    /// Encoded final deck.
    pub fn locked(&self) -> Vec<String> {
        encode_all::<C>(&self.locked)
    }

    /// Generate this peer's commitment points.
    pub fn commit(&mut self) -> Result<Vec<String>> {
        if self.is_committed() {
            return Err(DeckError::AlreadyCommitted);
        }

        let base = C::base_point();
        let mut cards = Vec::with_capacity(self.card_count);
        for _ in 0..self.card_count {
            let mut secret = C::random_scalar(&mut self.sampler);
            cards.push(C::mul(&base, &secret));
            secret.zeroize();
        }
        self.cards = cards;

        debug!(cards = self.card_count, curve = C::NAME, "Committed deck");
        Ok(self.cards())
    }

    /// Fold another peer's commitment into the local cards.
    pub fn on_commit(&mut self, points: &[String]) -> Result<()> {
        if !self.is_committed() {
            return Err(DeckError::NotCommitted);
        }
        let points = self.decode_all(points)?;

        for (card, point) in self.cards.iter_mut().zip(&points) {
            *card = C::add(card, point);
        }
        Ok(())
    }

    /// Permute and re-encrypt a deck with this peer's shuffle secret.
    ///
    /// With `None` the pass starts from the local cards, which is what the
    /// first player in the ring does.
    pub fn shuffle(&mut self, points: Option<&[String]>) -> Result<Vec<String>> {
        if !self.is_committed() {
            return Err(DeckError::NotCommitted);
        }
        let mut shuffled = match points {
            Some(points) => self.decode_all(points)?,
            None => self.cards.clone(),
        };

        self.shuffler.run(&mut shuffled)?;
        for point in &mut shuffled {
            *point = C::mul(point, &self.shuffle_secret);
        }
        Ok(encode_all::<C>(&shuffled))
    }

    /// Swap this peer's shuffle layer for its per-position lock layer.
    pub fn lock(&self, points: &[String]) -> Result<Vec<String>> {
        let points = self.decode_all(points)?;

        let mut unshuffle = C::invert(&self.shuffle_secret);
        let locked = points
            .iter()
            .zip(&self.lock_secrets)
            .map(|(point, secret)| C::mul(&C::mul(point, &unshuffle), secret))
            .collect::<Vec<_>>();
        unshuffle.zeroize();
        Ok(encode_all::<C>(&locked))
    }

    /// Store the fully shuffled and locked deck.
    pub fn on_lock(&mut self, points: &[String]) -> Result<()> {
        if self.is_locked() {
            return Err(DeckError::AlreadyLocked);
        }
        self.locked = self.decode_all(points)?;
        debug!(cards = self.card_count, "Stored final deck");
        Ok(())
    }

    /// True when every slot has been drawn.
    pub fn is_empty(&self) -> bool {
        self.drawn.iter().all(|drawn| *drawn)
    }

    /// Lowest slot not drawn yet.
    pub fn draw_index(&self) -> Result<usize> {
        self.drawn
            .iter()
            .position(|drawn| !drawn)
            .ok_or(DeckError::NoCardsLeft)
    }

    /// Reserve a slot, the lowest undrawn one when `index` is `None`.
    pub fn draw(&mut self, index: Option<usize>) -> Result<usize> {
        let index = match index {
            Some(index) => self.check_index(index)?,
            None => self.draw_index()?,
        };
        self.drawn[index] = true;
        Ok(index)
    }

    /// This peer's key share for slot `index`; marks the slot drawn.
    pub fn key(&mut self, index: usize) -> Result<String> {
        let index = self.check_index(index)?;
        self.drawn[index] = true;

        let mut key = C::invert(&self.lock_secrets[index]);
        let encoded = C::encode_scalar(&key);
        key.zeroize();
        Ok(encoded)
    }

    /// Open slot `index` with every peer's key share.
    ///
    /// Returns the card's commit-order index.
    pub fn unlock(&self, index: usize, keys: &[String]) -> Result<usize> {
        let index = self.check_index(index)?;
        if !self.is_locked() {
            return Err(DeckError::NotLocked);
        }

        let mut point = self.locked[index];
        for key in keys {
            let mut scalar = C::decode_scalar(key)?;
            point = C::mul(&point, &scalar);
            scalar.zeroize();
        }

        self.cards
            .iter()
            .position(|card| *card == point)
            .ok_or(DeckError::UnlockFailed { index })
    }

    fn check_index(&self, index: usize) -> Result<usize> {
        if index < self.card_count {
            Ok(index)
        } else {
            Err(DeckError::CardOutOfRange {
                index,
                card_count: self.card_count,
            })
        }
    }

    fn decode_all(&self, points: &[String]) -> Result<Vec<C::Point>> {
        if points.len() != self.card_count {
            return Err(DeckError::LengthMismatch {
                expected: self.card_count,
                actual: points.len(),
            });
        }
        points.iter().map(|p| C::decode_point(p)).collect()
    }
}

impl<C: Curve> Drop for CommutativeDeck<C> {
    fn drop(&mut self) {
        self.shuffle_secret.zeroize();
        for secret in &mut self.lock_secrets {
            secret.zeroize();
        }
    }
}

impl<C: Curve> fmt::Debug for CommutativeDeck<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommutativeDeck")
            .field("curve", &C::NAME)
            .field("card_count", &self.card_count)
            .field("committed", &self.is_committed())
            .field("locked", &self.is_locked())
            .field("drawn", &self.drawn.iter().filter(|d| **d).count())
            .finish_non_exhaustive()
    }
}

fn encode_all<C: Curve>(points: &[C::Point]) -> Vec<String> {
    points.iter().map(C::encode_point).collect()
}
