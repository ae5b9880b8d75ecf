//! Session configuration

use crate::error::{ProtocolError, Result};
use crate::message::{PlayerIndex, FIRST_PLAYER};
use mental_deck::{DeckConfig, MAX_CARDS, MIN_ENTROPY_BYTES};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cards in a standard deck.
pub const DEFAULT_CARD_COUNT: usize = 52;

fn default_card_count() -> usize {
    DEFAULT_CARD_COUNT
}

/// Parameters of one peer's seat at the table.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// This peer's ring position
    pub index: PlayerIndex,
    /// Ring size
    pub player_count: usize,
    /// Number of card slots
    #[serde(default = "default_card_count")]
    pub card_count: usize,
    /// Seed for reproducible randomness, hex in serialized form
    #[serde(default, with = "hex_entropy", skip_serializing_if = "Option::is_none")]
    pub entropy: Option<Vec<u8>>,
}

impl SessionConfig {
    /// Seat `index` in a ring of `player_count` with a standard deck.
    pub fn new(index: PlayerIndex, player_count: usize) -> Self {
        Self {
            index,
            player_count,
            card_count: DEFAULT_CARD_COUNT,
            entropy: None,
        }
    }

    /// Override the deck size.
    pub fn with_card_count(mut self, card_count: usize) -> Self {
        self.card_count = card_count;
        self
    }

    /// Seed the deck's randomness.
    pub fn with_entropy(mut self, entropy: impl Into<Vec<u8>>) -> Self {
        self.entropy = Some(entropy.into());
        self
    }

    /// Check the parameters before any state is built from them.
    pub fn validate(&self) -> Result<()> {
        if self.player_count < 2 {
            return Err(ProtocolError::InvalidConfig(format!(
                "player_count must be at least 2, got {}",
                self.player_count
            )));
        }
        if self.index >= self.player_count {
            return Err(ProtocolError::InvalidConfig(format!(
                "index {} is outside a ring of {}",
                self.index, self.player_count
            )));
        }
        if self.card_count == 0 || self.card_count > MAX_CARDS {
            return Err(ProtocolError::InvalidConfig(format!(
                "card_count must be within 1..={MAX_CARDS}, got {}",
                self.card_count
            )));
        }
        if let Some(entropy) = &self.entropy {
            if entropy.len() < MIN_ENTROPY_BYTES {
                return Err(ProtocolError::InvalidConfig(format!(
                    "entropy must be at least {MIN_ENTROPY_BYTES} bytes, got {}",
                    entropy.len()
                )));
            }
        }
        Ok(())
    }

    /// Ring predecessor.
    pub fn prev(&self) -> PlayerIndex {
        if self.index == 0 {
            self.player_count - 1
        } else {
            self.index - 1
        }
    }

    /// Ring successor.
    pub fn next(&self) -> PlayerIndex {
        (self.index + 1) % self.player_count
    }

    /// Whether this peer leads ring passes and manages the mutex.
    pub fn is_first(&self) -> bool {
        self.index == FIRST_PLAYER
    }

    /// Deck parameters derived from this seat.
    pub fn deck_config(&self) -> DeckConfig {
        DeckConfig {
            card_count: self.card_count,
            entropy: self.entropy.clone(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("index", &self.index)
            .field("player_count", &self.player_count)
            .field("card_count", &self.card_count)
            .field("seeded", &self.entropy.is_some())
            .finish()
    }
}

mod hex_entropy {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(entropy: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match entropy {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| hex::decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
