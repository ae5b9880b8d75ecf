//! Game-rule hooks
//!
//! The engine knows nothing about the game being played. Before a card is
//! drawn or opened, and before a state update is applied, it asks the
//! [`Controller`] whether the move is legal; after the move completes it
//! reports the outcome. Every hook is called synchronously from the engine,
//! both for the local player's moves and for moves announced by peers.

use crate::message::{CardIndex, CardValue, PlayerIndex};
use serde_json::Value;
use thiserror::Error;

/// A veto or failure reported by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ControllerError {
    reason: String,
}

impl ControllerError {
    /// Create an error with a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason given.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Game rules consulted by the protocol engine.
pub trait Controller: Send + 'static {
    /// May `player` draw the card at slot `card`?
    fn validate_draw(&self, player: PlayerIndex, card: CardIndex) -> Result<(), ControllerError>;

    /// `player` drew `card`. The value is only known to the drawing peer.
    fn draw(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: Option<CardValue>,
    ) -> Result<(), ControllerError>;

    /// May `player` reveal `card` to the table?
    fn validate_open(&self, player: PlayerIndex, card: CardIndex) -> Result<(), ControllerError>;

    /// `player` opened `card`, which turned out to be `value`.
    fn open(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: CardValue,
    ) -> Result<(), ControllerError>;

    /// May `player` apply this game-state delta?
    fn validate_update(&self, info: &Value, player: PlayerIndex) -> Result<(), ControllerError>;

    /// Apply a game-state delta from `player`.
    fn update(&mut self, info: &Value, player: PlayerIndex) -> Result<(), ControllerError>;
}
