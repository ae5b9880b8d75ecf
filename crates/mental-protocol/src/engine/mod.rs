//! Protocol engine
//!
//! One [`ProtocolEngine`] is one peer's seat at the table. It owns the
//! peer's deck and controller, routes inbound messages into
//! [`MessageStream`]s, and emits outbound messages on the
//! [`OutboundStream`] returned by [`ProtocolEngine::new`]. Moving those
//! messages between peers is the caller's job.
//!
//! The coordination primitives live in submodules:
//!
//! - [`collect`](self::collect): full-ring barrier keyed by sender
//! - [`reduce`](self::reduce): ring pass led by the first player
//! - [`mutex`](self::mutex): token-passing mutual exclusion managed by the
//!   first player
//!
//! Internal state sits behind `parking_lot` locks that are never held across
//! an `.await`, so an engine can be shared through an `Arc` between a task
//! running [`serve`](ProtocolEngine::serve) and callers issuing operations.

pub mod collect;
pub mod mutex;
pub mod reduce;

use crate::config::SessionConfig;
use crate::controller::Controller;
use crate::error::{ProtocolError, Result};
use crate::message::{
    Delivery, Message, MessageKind, Outbound, Payload, PlayerIndex, FIRST_PLAYER,
};
use crate::stream::{MessageStream, Router};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use mental_deck::{CommutativeDeck, Curve, Ristretto255};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use self::mutex::MutexState;

/// Reason sent back for a message no stream was waiting for.
pub const UNEXPECTED_MESSAGE: &str = "unexpected message";

/// Messages the engine wants delivered to peers.
pub type OutboundStream = UnboundedReceiver<Outbound>;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Constructed, `start` not called yet
    Created,
    /// Commitments are being exchanged
    Committing,
    /// The shuffle ring pass is running
    Shuffling,
    /// The lock ring pass is running
    Locking,
    /// The final deck is stored; cards can be drawn and opened
    Ready,
    /// Initialization aborted
    Failed(String),
}

impl SessionPhase {
    /// Whether card operations are allowed.
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionPhase::Ready)
    }
}

/// Streams `start` consumes, registered at construction so that early
/// messages from faster peers are buffered.
pub(crate) struct InitStreams {
    pub(crate) commit: MessageStream,
    pub(crate) shuffle: MessageStream,
    pub(crate) lock: MessageStream,
    pub(crate) final_deck: MessageStream,
}

/// Streams `serve` consumes.
struct StandingStreams {
    acquire: Option<MessageStream>,
    release: Option<MessageStream>,
    draw: MessageStream,
    open: MessageStream,
    update: MessageStream,
    errors: MessageStream,
}

/// One peer's protocol state machine.
pub struct ProtocolEngine<K: Controller, C: Curve = Ristretto255> {
    config: SessionConfig,
    router: Router,
    outbound: UnboundedSender<Outbound>,
    deck: Mutex<CommutativeDeck<C>>,
    controller: Mutex<K>,
    ring_lock: Mutex<MutexState>,
    init: Mutex<Option<InitStreams>>,
    standing: Mutex<Option<StandingStreams>>,
    phase: watch::Sender<SessionPhase>,
}

impl<K: Controller, C: Curve> ProtocolEngine<K, C> {
    /// Build an engine for the seat described by `config`.
    pub fn new(config: SessionConfig, controller: K) -> Result<(Self, OutboundStream)> {
        config.validate()?;
        let deck = CommutativeDeck::new(&config.deck_config())?;
        let (outbound, rx) = mpsc::unbounded();

        let router = Router::default();
        let prev = config.prev();
        let first = config.is_first();

        let init = InitStreams {
            commit: router.subscribe(MessageKind::Commit, None),
            shuffle: router.subscribe(MessageKind::Shuffle, Some(prev)),
            lock: router.subscribe(MessageKind::Lock, Some(prev)),
            final_deck: router.subscribe(MessageKind::Final, Some(FIRST_PLAYER)),
        };
        let standing = StandingStreams {
            acquire: first.then(|| router.subscribe(MessageKind::MutexAcquire, None)),
            release: first.then(|| router.subscribe(MessageKind::MutexRelease, None)),
            draw: router.subscribe(MessageKind::Draw, None),
            open: router.subscribe(MessageKind::Open, None),
            update: router.subscribe(MessageKind::Update, None),
            errors: router.subscribe(MessageKind::Error, None),
        };

        debug!(
            player = config.index,
            players = config.player_count,
            cards = config.card_count,
            curve = C::NAME,
            "Created protocol engine"
        );

        let engine = Self {
            config,
            router,
            outbound,
            deck: Mutex::new(deck),
            controller: Mutex::new(controller),
            ring_lock: Mutex::new(MutexState::default()),
            init: Mutex::new(Some(init)),
            standing: Mutex::new(Some(standing)),
            phase: watch::Sender::new(SessionPhase::Created),
        };
        Ok((engine, rx))
    }

    /// Session parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// This peer's ring position.
    pub fn index(&self) -> PlayerIndex {
        self.config.index
    }

    /// Ring size.
    pub fn player_count(&self) -> usize {
        self.config.player_count
    }

    /// Ring predecessor.
    pub fn prev(&self) -> PlayerIndex {
        self.config.prev()
    }

    /// Ring successor.
    pub fn next(&self) -> PlayerIndex {
        self.config.next()
    }

    /// Whether this peer leads ring passes and manages the mutex.
    pub fn is_first(&self) -> bool {
        self.config.is_first()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    /// Wait until the session is ready, or report why it failed.
    pub async fn ready(&self) -> Result<()> {
        let mut phase = self.phase.subscribe();
        loop {
            match &*phase.borrow_and_update() {
                SessionPhase::Ready => return Ok(()),
                SessionPhase::Failed(reason) => {
                    return Err(ProtocolError::SessionFailed(reason.clone()))
                }
                _ => {}
            }
            phase
                .changed()
                .await
                .map_err(|_| ProtocolError::StreamClosed)?;
        }
    }

    /// Inspect the local deck.
    pub fn with_deck<R>(&self, f: impl FnOnce(&CommutativeDeck<C>) -> R) -> R {
        f(&self.deck.lock())
    }

    /// Inspect the controller.
    pub fn with_controller<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&self.controller.lock())
    }

    /// Number of live streams for `kind`.
    pub fn listener_count(&self, kind: MessageKind) -> usize {
        self.router.route_count(kind)
    }

    /// Deliver a message from peer `from`.
    ///
    /// The message is pushed into every stream registered for its kind whose
    /// sender filter is unset or matches. A message nobody listens for is
    /// answered with an [`UNEXPECTED_MESSAGE`] error. Messages claiming to
    /// come from outside the ring or from this peer are dropped.
    pub fn receive(&self, message: Message, from: PlayerIndex) {
        if from >= self.player_count() || from == self.index() {
            warn!(
                player = self.index(),
                from,
                kind = %message.kind,
                "Dropping message from invalid sender"
            );
            return;
        }

        let kind = message.kind;
        let delivered = self.router.dispatch(kind, message.payload, from);
        debug!(player = self.index(), from, kind = %kind, delivered, "Routed message");

        // Nobody expects this kind from this sender in the current phase.
        // Errors are never answered with errors.
        if delivered == 0 && kind != MessageKind::Error && !self.router.is_closed() {
            self.send_error(kind, UNEXPECTED_MESSAGE, from);
        }
    }

    /// Subscribe to `kind`, from anyone or only from `from`.
    pub fn stream(&self, kind: MessageKind, from: Option<PlayerIndex>) -> MessageStream {
        self.router.subscribe(kind, from)
    }

    /// Stop the engine: every stream ends, `serve` returns and waiting
    /// operations fail with [`ProtocolError::StreamClosed`].
    pub fn shutdown(&self) {
        self.router.close();
        self.ring_lock.lock().clear();
        debug!(player = self.index(), "Engine shut down");
    }

    /// Drive the engine's standing listeners until shutdown.
    ///
    /// Handles mutex traffic on the first player, logs inbound `error`
    /// messages, and once the session is ready answers `draw`, `open` and
    /// `update` requests from peers. Requests arriving earlier stay queued.
    pub async fn serve(&self) -> Result<()> {
        let mut standing = self
            .standing
            .lock()
            .take()
            .ok_or(ProtocolError::AlreadyServing)?;
        let mut phase = self.phase.subscribe();
        let mut requests: FuturesUnordered<BoxFuture<'_, Result<()>>> = FuturesUnordered::new();

        debug!(player = self.index(), "Serving");
        loop {
            let ready = phase.borrow_and_update().is_ready();

            tokio::select! {
                Some(item) = next_or_pending(&mut standing.acquire) => {
                    self.on_acquire(item.from);
                }
                Some(item) = next_or_pending(&mut standing.release) => {
                    self.on_release(item.from);
                }
                Some(item) = standing.draw.next(), if ready => {
                    requests.push(async move { self.on_draw(item) }.boxed());
                }
                Some(item) = standing.open.next(), if ready => {
                    requests.push(self.on_open(item).boxed());
                }
                Some(item) = standing.update.next(), if ready => {
                    requests.push(async move { self.on_update(item) }.boxed());
                }
                Some(result) = requests.next(), if !requests.is_empty() => {
                    if let Err(err) = result {
                        debug!(player = self.index(), error = %err, "Request handling failed");
                    }
                }
                changed = phase.changed(), if !ready => {
                    if changed.is_err() {
                        break;
                    }
                }
                item = standing.errors.next() => match item {
                    Some(item) => self.on_error(item),
                    None => break,
                },
            }
        }

        debug!(player = self.index(), "Stopped serving");
        Ok(())
    }

    fn on_error(&self, item: Delivery) {
        match item.payload {
            Payload::Error { context, reason } => warn!(
                player = self.index(),
                from = item.from,
                kind = %context,
                reason = %reason,
                "Peer reported an error"
            ),
            _ => warn!(
                player = self.index(),
                from = item.from,
                "Malformed error message"
            ),
        }
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        debug!(player = self.index(), phase = ?phase, "Phase changed");
        self.phase.send_replace(phase);
    }

    pub(crate) fn take_init_streams(&self) -> Option<InitStreams> {
        self.init.lock().take()
    }

    pub(crate) fn deck(&self) -> &Mutex<CommutativeDeck<C>> {
        &self.deck
    }

    pub(crate) fn controller(&self) -> &Mutex<K> {
        &self.controller
    }

    pub(crate) fn ring_lock_state(&self) -> &Mutex<MutexState> {
        &self.ring_lock
    }

    /// Queue a message for one peer, or for every other peer when `target`
    /// is `None`.
    pub(crate) fn send(&self, message: Message, target: Option<PlayerIndex>) {
        debug!(
            player = self.index(),
            kind = %message.kind,
            target = ?target,
            "Sending message"
        );
        if self
            .outbound
            .unbounded_send(Outbound { message, target })
            .is_err()
        {
            debug!(player = self.index(), "Outbound stream dropped");
        }
    }

    pub(crate) fn send_to(&self, kind: MessageKind, payload: Payload, target: PlayerIndex) {
        self.send(Message::new(kind, payload), Some(target));
    }

    pub(crate) fn broadcast(&self, kind: MessageKind, payload: Payload) {
        self.send(Message::new(kind, payload), None);
    }

    /// Report a protocol violation to `target`.
    pub(crate) fn send_error(
        &self,
        context: MessageKind,
        reason: impl Into<String>,
        target: PlayerIndex,
    ) {
        let reason = reason.into();
        warn!(
            player = self.index(),
            target,
            kind = %context,
            reason = %reason,
            "Reporting protocol error"
        );
        self.send(Message::error(context, reason), Some(target));
    }
}

impl<K: Controller, C: Curve> std::fmt::Debug for ProtocolEngine<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("config", &self.config)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

async fn next_or_pending(stream: &mut Option<MessageStream>) -> Option<Delivery> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
