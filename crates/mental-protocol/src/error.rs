//! Protocol error types

use crate::controller::ControllerError;
use crate::message::{MessageKind, PlayerIndex};
use mental_deck::DeckError;
use thiserror::Error;

/// Errors surfaced by protocol operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The local deck refused an operation
    #[error("Deck error: {0}")]
    Deck(#[from] DeckError),

    /// The local controller vetoed an operation
    #[error("Controller rejected operation: {0}")]
    Controller(#[from] ControllerError),

    /// Session parameters are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called more than once
    #[error("Session already started")]
    AlreadyStarted,

    /// `serve` was called more than once
    #[error("Engine is already being served")]
    AlreadyServing,

    /// A card operation was attempted before the session became ready
    #[error("Session is not ready")]
    NotReady,

    /// The engine shut down while an operation was waiting
    #[error("Message stream closed")]
    StreamClosed,

    /// A peer answered a request with an `error` message
    #[error("Peer {peer} rejected the request: {reason}")]
    Rejected {
        /// The refusing peer
        peer: PlayerIndex,
        /// Reason the peer gave
        reason: String,
    },

    /// A message carried the wrong payload for its kind
    #[error("Unexpected payload in {kind} message")]
    UnexpectedPayload {
        /// Kind of the malformed message
        kind: MessageKind,
    },

    /// Session initialization aborted
    #[error("Session failed: {0}")]
    SessionFailed(String),
}

impl ProtocolError {
    /// Build an unexpected-payload error for `kind`.
    pub fn unexpected(kind: MessageKind) -> Self {
        ProtocolError::UnexpectedPayload { kind }
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
