//! # Mental Protocol - dealer-less card dealing between peers
//!
//! Coordinates a ring of peers, each holding a [`mental_deck::CommutativeDeck`],
//! through the rounds that produce a jointly shuffled and locked deck, then
//! serializes draws, opens and game-state updates with a distributed mutex.
//!
//! The engine is transport-agnostic: messages leave through the
//! [`OutboundStream`] returned by [`ProtocolEngine::new`] and enter through
//! [`ProtocolEngine::receive`]. Game rules are supplied by a [`Controller`].
//!
//! ## Driving an engine
//!
//! ```rust,ignore
//! let (engine, outbound) = ProtocolEngine::new(SessionConfig::new(index, 4), rules)?;
//! let engine = Arc::new(engine);
//!
//! // forward `outbound` to peers and feed their messages into `receive`
//! tokio::spawn({ let engine = engine.clone(); async move { engine.serve().await } });
//!
//! engine.start().await?;
//! let card = engine.draw().await?;
//! ```

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod message;
pub mod session;
pub mod stream;

pub use config::{SessionConfig, DEFAULT_CARD_COUNT};
pub use controller::{Controller, ControllerError};
pub use engine::collect::Collection;
pub use engine::mutex::RingLock;
pub use engine::reduce::RingPass;
pub use engine::{OutboundStream, ProtocolEngine, SessionPhase};
pub use error::{ProtocolError, Result};
pub use message::{
    CardIndex, CardValue, Delivery, Message, MessageKind, Outbound, Payload, PlayerIndex,
    FIRST_PLAYER,
};
pub use session::{DrawnCard, OpenedCard};
pub use stream::MessageStream;
