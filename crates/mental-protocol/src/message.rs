//! Protocol wire messages
//!
//! Every message is a `{ type, payload }` pair. The sender is supplied by the
//! transport on delivery and the optional target by the engine on send, so
//! neither appears in the message itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a peer in the ring.
pub type PlayerIndex = usize;

/// Card slot in the deck.
pub type CardIndex = usize;

/// Revealed card identity: the card's index in commit order.
pub type CardValue = usize;

/// The ring's designated first player; it kicks off ring passes and manages
/// the distributed mutex.
pub const FIRST_PLAYER: PlayerIndex = 0;

/// Message type, used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    /// Commitment points, broadcast
    #[serde(rename = "commit")]
    Commit,
    /// Shuffle ring pass
    #[serde(rename = "shuffle")]
    Shuffle,
    /// Lock ring pass
    #[serde(rename = "lock")]
    Lock,
    /// Final locked deck, broadcast by the first player
    #[serde(rename = "final")]
    Final,
    /// Draw announcement
    #[serde(rename = "draw")]
    Draw,
    /// Key share answering a draw
    #[serde(rename = "draw:key")]
    DrawKey,
    /// Open announcement
    #[serde(rename = "open")]
    Open,
    /// Key share answering an open
    #[serde(rename = "open:key")]
    OpenKey,
    /// Full key set of an opened card
    #[serde(rename = "open:keys")]
    OpenKeys,
    /// Game-state update
    #[serde(rename = "update")]
    Update,
    /// Update acknowledgment
    #[serde(rename = "update:ack")]
    UpdateAck,
    /// Mutex request to the manager
    #[serde(rename = "mutex:acquire")]
    MutexAcquire,
    /// Mutex grant from the manager
    #[serde(rename = "mutex:baton")]
    MutexBaton,
    /// Mutex hand-back to the manager
    #[serde(rename = "mutex:release")]
    MutexRelease,
    /// Protocol violation report
    #[serde(rename = "error")]
    Error,
}

impl MessageKind {
    /// Every kind, in wire order.
    pub const ALL: [MessageKind; 15] = [
        MessageKind::Commit,
        MessageKind::Shuffle,
        MessageKind::Lock,
        MessageKind::Final,
        MessageKind::Draw,
        MessageKind::DrawKey,
        MessageKind::Open,
        MessageKind::OpenKey,
        MessageKind::OpenKeys,
        MessageKind::Update,
        MessageKind::UpdateAck,
        MessageKind::MutexAcquire,
        MessageKind::MutexBaton,
        MessageKind::MutexRelease,
        MessageKind::Error,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Commit => "commit",
            MessageKind::Shuffle => "shuffle",
            MessageKind::Lock => "lock",
            MessageKind::Final => "final",
            MessageKind::Draw => "draw",
            MessageKind::DrawKey => "draw:key",
            MessageKind::Open => "open",
            MessageKind::OpenKey => "open:key",
            MessageKind::OpenKeys => "open:keys",
            MessageKind::Update => "update",
            MessageKind::UpdateAck => "update:ack",
            MessageKind::MutexAcquire => "mutex:acquire",
            MessageKind::MutexBaton => "mutex:baton",
            MessageKind::MutexRelease => "mutex:release",
            MessageKind::Error => "error",
        }
    }

    /// Look a kind up by wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// No body (mutex traffic)
    Empty,
    /// Hex-encoded group elements
    Points(Vec<String>),
    /// A card slot
    Card(CardIndex),
    /// One hex-encoded key share
    Key(String),
    /// Every peer's key share, indexed by player
    Keys(Vec<String>),
    /// Opaque game-state delta
    Info(serde_json::Value),
    /// Acknowledgment
    Ack,
    /// Carried by [`MessageKind::Error`]
    Error {
        /// Kind of the message that caused the error
        context: MessageKind,
        /// Human-readable reason
        reason: String,
    },
}

impl Payload {
    /// Points body, if this is one.
    pub fn into_points(self) -> Option<Vec<String>> {
        match self {
            Payload::Points(points) => Some(points),
            _ => None,
        }
    }

    /// Card body, if this is one.
    pub fn as_card(&self) -> Option<CardIndex> {
        match self {
            Payload::Card(index) => Some(*index),
            _ => None,
        }
    }

    /// Single key body, if this is one.
    pub fn into_key(self) -> Option<String> {
        match self {
            Payload::Key(key) => Some(key),
            _ => None,
        }
    }

    /// Key set body, if this is one.
    pub fn into_keys(self) -> Option<Vec<String>> {
        match self {
            Payload::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    /// Update body, if this is one.
    pub fn into_info(self) -> Option<serde_json::Value> {
        match self {
            Payload::Info(info) => Some(info),
            _ => None,
        }
    }
}

/// A typed protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Routing key
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Body
    pub payload: Payload,
}

impl Message {
    /// Build a message.
    pub fn new(kind: MessageKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    /// Build an `error` message about a message of kind `context`.
    pub fn error(context: MessageKind, reason: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            payload: Payload::Error {
                context,
                reason: reason.into(),
            },
        }
    }

    /// Encode as JSON for a text transport.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// A message leaving the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// The message
    pub message: Message,
    /// Recipient, or `None` to broadcast to every other ring member
    pub target: Option<PlayerIndex>,
}

/// A message delivered into a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The message body
    pub payload: Payload,
    /// Sender
    pub from: PlayerIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(MessageKind::from_wire("bogus"), None);
    }

    #[test]
    fn message_uses_type_field() {
        let msg = Message::new(MessageKind::DrawKey, Payload::Key("ab".into()));
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"draw:key\""));
        assert_eq!(Message::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn error_message_carries_context() {
        let msg = Message::error(MessageKind::Draw, "can't draw a card");
        assert_eq!(msg.kind, MessageKind::Error);
        assert_eq!(
            msg.payload,
            Payload::Error {
                context: MessageKind::Draw,
                reason: "can't draw a card".into()
            }
        );
    }

    #[test]
    fn payload_accessors() {
        assert_eq!(Payload::Card(3).as_card(), Some(3));
        assert_eq!(Payload::Ack.as_card(), None);
        assert_eq!(Payload::Key("k".into()).into_key(), Some("k".into()));
        assert_eq!(Payload::Empty.into_points(), None);
    }
}
