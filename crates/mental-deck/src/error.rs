//! Deck errors

use thiserror::Error;

/// Errors raised by the deck and its randomness pipeline.
///
/// Variants fall into two groups: invariant violations, which mean the caller
/// drove the deck out of order, and integrity failures, which mean a peer
/// supplied points or keys that do not fit this deck.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeckError {
    /// `commit` was called more than once
    #[error("Already committed")]
    AlreadyCommitted,

    /// An operation that needs the local commitment ran before `commit`
    #[error("Should commit first")]
    NotCommitted,

    /// `on_lock` was called more than once
    #[error("Already locked")]
    AlreadyLocked,

    /// An operation that needs the final deck ran before `on_lock`
    #[error("Deck is not locked yet")]
    NotLocked,

    /// A peer sent the wrong number of points
    #[error("Wrong point number: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Number of points this deck holds
        expected: usize,
        /// Number of points received
        actual: usize,
    },

    /// Card count outside `1..=255`
    #[error("Can't have {0} cards, the deck holds between 1 and 255")]
    CardCount(usize),

    /// Card slot outside the deck
    #[error("Card {index} is out of range for a deck of {card_count}")]
    CardOutOfRange {
        /// Requested slot
        index: usize,
        /// Number of slots in the deck
        card_count: usize,
    },

    /// Sampling bound outside `1..=MAX_BOUND`
    #[error("Can't sample below {max}, the bound must be within 1..=2^31")]
    SampleBound {
        /// Requested exclusive upper bound
        max: u64,
    },

    /// Every slot has been drawn
    #[error("No cards to draw")]
    NoCardsLeft,

    /// A point failed to decode or is not a group element
    #[error("Invalid point encoding: {0}")]
    InvalidPoint(String),

    /// A scalar failed to decode or is not canonical
    #[error("Invalid scalar encoding: {0}")]
    InvalidScalar(String),

    /// The supplied keys do not open the locked card
    #[error("Failed to unlock card {index}")]
    UnlockFailed {
        /// Slot that failed to open
        index: usize,
    },

    /// Seed too short for the deterministic generator
    #[error("Insufficient entropy: got {actual} bytes, need at least {required}")]
    InsufficientEntropy {
        /// Bytes supplied
        actual: usize,
        /// Minimum accepted
        required: usize,
    },
}

impl DeckError {
    /// Whether this error means the caller broke the deck's call order or
    /// limits, as opposed to a peer sending bad data.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            DeckError::AlreadyCommitted
                | DeckError::NotCommitted
                | DeckError::AlreadyLocked
                | DeckError::NotLocked
                | DeckError::CardCount(_)
                | DeckError::CardOutOfRange { .. }
                | DeckError::NoCardsLeft
                | DeckError::SampleBound { .. }
                | DeckError::InsufficientEntropy { .. }
        )
    }
}

/// Deck result alias
pub type Result<T> = std::result::Result<T, DeckError>;
