//! Session operations
//!
//! `start` runs the initialization rounds: every peer broadcasts its
//! commitment, the commitments are folded into one blinded deck, then a
//! shuffle pass and a lock pass travel around the ring and the first player
//! broadcasts the final deck.
//!
//! `draw`, `open` and `update` run under the ring lock so that at most one of
//! them is in flight ring-wide. Their peer-side halves (`recv_*`) are driven
//! by [`ProtocolEngine::serve`].

use crate::controller::Controller;
use crate::engine::collect::Collection;
use crate::engine::reduce::RingPass;
use crate::engine::{InitStreams, ProtocolEngine, SessionPhase};
use crate::error::{ProtocolError, Result};
use crate::message::{
    CardIndex, CardValue, Delivery, Message, MessageKind, Payload, PlayerIndex, FIRST_PLAYER,
};
use crate::stream::MessageStream;
use mental_deck::Curve;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Reason sent when a draw is vetoed.
pub const DRAW_REFUSED: &str = "can't draw a card";
/// Reason sent when an open is vetoed.
pub const OPEN_REFUSED: &str = "can't open a card";
/// Reason sent when the announced key set does not open the card.
pub const OPEN_FAILED: &str = "can't open card";
/// Reason sent when an update is vetoed.
pub const UPDATE_REFUSED: &str = "failed to update the state";

/// A card drawn by the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawnCard {
    /// Deck slot
    pub index: CardIndex,
    /// Commit-order identity
    pub value: CardValue,
}

/// A card revealed to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedCard {
    /// Deck slot
    pub index: CardIndex,
    /// Commit-order identity
    pub value: CardValue,
}

impl<K: Controller, C: Curve> ProtocolEngine<K, C> {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Run the commit, shuffle and lock rounds. May be called once.
    pub async fn start(&self) -> Result<()> {
        let streams = self
            .take_init_streams()
            .ok_or(ProtocolError::AlreadyStarted)?;

        match self.initialize(streams).await {
            Ok(()) => {
                self.set_phase(SessionPhase::Ready);
                info!(player = self.index(), "Session ready");
                Ok(())
            }
            Err(err) => {
                warn!(player = self.index(), error = %err, "Session initialization failed");
                self.set_phase(SessionPhase::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn initialize(&self, streams: InitStreams) -> Result<()> {
        let InitStreams {
            commit,
            shuffle,
            lock,
            mut final_deck,
        } = streams;

        self.set_phase(SessionPhase::Committing);
        let own = self.deck().lock().commit()?;
        self.broadcast(MessageKind::Commit, Payload::Points(own.clone()));
        info!(player = self.index(), cards = own.len(), "Broadcast commitment");

        let commits = self
            .gather(Collection::new(commit), Payload::Points(own))
            .await?;
        {
            let mut deck = self.deck().lock();
            for (player, payload) in commits.into_iter().enumerate() {
                if player == self.index() {
                    continue;
                }
                let points = payload
                    .into_points()
                    .ok_or(ProtocolError::unexpected(MessageKind::Commit))?;
                deck.on_commit(&points)?;
            }
        }

        self.set_phase(SessionPhase::Shuffling);
        let shuffle_step = |points: Option<&[String]>| -> Result<Vec<String>> {
            Ok(self.deck().lock().shuffle(points)?)
        };
        let lock_step = |points: Option<&[String]>| -> Result<Vec<String>> {
            Ok(self.deck().lock().lock(points.unwrap_or(&[]))?)
        };
        let shuffle = RingPass::new(shuffle);
        let lock = RingPass::new(lock);

        if self.is_first() {
            let shuffled = self.feed(shuffle, None, shuffle_step).await?;
            self.set_phase(SessionPhase::Locking);
            let locked = self.feed(lock, Some(shuffled.as_slice()), lock_step).await?;

            self.deck().lock().on_lock(&locked)?;
            self.broadcast(MessageKind::Final, Payload::Points(locked));
        } else {
            self.relay(shuffle, shuffle_step).await?;
            self.set_phase(SessionPhase::Locking);
            self.relay(lock, lock_step).await?;

            let item = final_deck.next_delivery().await?;
            final_deck.unwatch();
            let locked = item
                .payload
                .into_points()
                .ok_or(ProtocolError::unexpected(MessageKind::Final))?;
            self.deck().lock().on_lock(&locked)?;
            debug!(player = self.index(), from = FIRST_PLAYER, "Received final deck");
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.phase().is_ready() {
            Ok(())
        } else {
            Err(ProtocolError::NotReady)
        }
    }

    // ========================================================================
    // Draw
    // ========================================================================

    /// Draw the lowest undrawn card. Its value is learned only locally.
    pub async fn draw(&self) -> Result<DrawnCard> {
        self.ensure_ready()?;
        self.mutex(|| self.draw_locked()).await
    }

    async fn draw_locked(&self) -> Result<DrawnCard> {
        let index = self.deck().lock().draw_index()?;
        self.controller().lock().validate_draw(self.index(), index)?;
        let key = {
            let mut deck = self.deck().lock();
            deck.draw(Some(index))?;
            deck.key(index)?
        };

        let replies = self.collect_replies(MessageKind::DrawKey, MessageKind::Draw);
        self.broadcast(MessageKind::Draw, Payload::Card(index));
        let keys = into_keys(self.gather(replies, Payload::Key(key)).await?, MessageKind::DrawKey)?;

        let value = self.deck().lock().unlock(index, &keys)?;
        self.controller()
            .lock()
            .draw(self.index(), index, Some(value))?;

        debug!(player = self.index(), card = index, "Drew card");
        Ok(DrawnCard { index, value })
    }

    /// Answer peer `from`'s draw of slot `index` with this peer's key share.
    pub fn recv_draw(&self, index: CardIndex, from: PlayerIndex) -> Result<()> {
        let share = self.draw_share(index, from);
        let key = self.refuse_on_error(MessageKind::Draw, DRAW_REFUSED, from, share)?;
        debug!(player = self.index(), from, card = index, "Answered draw");
        self.send_to(MessageKind::DrawKey, Payload::Key(key), from);
        Ok(())
    }

    fn draw_share(&self, index: CardIndex, from: PlayerIndex) -> Result<String> {
        let mut controller = self.controller().lock();
        controller.validate_draw(from, index)?;
        let key = self.deck().lock().key(index)?;
        controller.draw(from, index, None)?;
        Ok(key)
    }

    // ========================================================================
    // Open
    // ========================================================================

    /// Reveal a card to every peer; the lowest undrawn card when `index` is
    /// `None`.
    pub async fn open(&self, index: Option<CardIndex>) -> Result<OpenedCard> {
        self.ensure_ready()?;
        self.mutex(|| self.open_locked(index)).await
    }

    async fn open_locked(&self, index: Option<CardIndex>) -> Result<OpenedCard> {
        let index = match index {
            Some(index) => index,
            None => self.deck().lock().draw_index()?,
        };
        self.controller().lock().validate_open(self.index(), index)?;
        let key = self.deck().lock().key(index)?;

        let replies = self.collect_replies(MessageKind::OpenKey, MessageKind::Open);
        self.broadcast(MessageKind::Open, Payload::Card(index));

        let opened = self.finish_open(index, replies, key).await;
        if let Err(err) = &opened {
            // Peers that already answered are waiting for the key set.
            self.broadcast_abort(MessageKind::Open, err);
        }
        opened
    }

    async fn finish_open(
        &self,
        index: CardIndex,
        replies: Collection,
        key: String,
    ) -> Result<OpenedCard> {
        let keys = into_keys(self.gather(replies, Payload::Key(key)).await?, MessageKind::OpenKey)?;
        let value = self.deck().lock().unlock(index, &keys)?;

        self.broadcast(MessageKind::OpenKeys, Payload::Keys(keys));
        self.controller().lock().open(self.index(), index, value)?;

        debug!(player = self.index(), card = index, value, "Opened card");
        Ok(OpenedCard { index, value })
    }

    /// Answer peer `from`'s open of slot `index`, then wait for the full key
    /// set and learn the card.
    pub async fn recv_open(&self, index: CardIndex, from: PlayerIndex) -> Result<OpenedCard> {
        let mut key_sets = self.stream(MessageKind::OpenKeys, Some(from));
        let mut aborts = self.stream(MessageKind::Error, Some(from));

        let share = self.open_share(index, from);
        let key = self.refuse_on_error(MessageKind::Open, OPEN_REFUSED, from, share)?;
        self.send_to(MessageKind::OpenKey, Payload::Key(key), from);

        let item = tokio::select! {
            item = key_sets.next_delivery() => item?,
            abort = next_abort(&mut aborts, MessageKind::Open) => return Err(abort),
        };
        key_sets.unwatch();
        aborts.unwatch();

        let keys = item
            .payload
            .into_keys()
            .ok_or(ProtocolError::unexpected(MessageKind::OpenKeys));
        let unlocked = keys.and_then(|keys| Ok(self.deck().lock().unlock(index, &keys)?));
        let value = self.refuse_on_error(MessageKind::OpenKeys, OPEN_FAILED, from, unlocked)?;

        self.controller().lock().open(from, index, value)?;
        debug!(player = self.index(), from, card = index, value, "Learned opened card");
        Ok(OpenedCard { index, value })
    }

    fn open_share(&self, index: CardIndex, from: PlayerIndex) -> Result<String> {
        self.controller().lock().validate_open(from, index)?;
        Ok(self.deck().lock().key(index)?)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Apply a game-state delta locally and on every peer.
    pub async fn update(&self, info: Value) -> Result<()> {
        self.ensure_ready()?;
        self.mutex(|| self.update_locked(info)).await
    }

    async fn update_locked(&self, info: Value) -> Result<()> {
        self.apply_update(&info, self.index())?;

        let acks = self.collect_replies(MessageKind::UpdateAck, MessageKind::Update);
        self.broadcast(MessageKind::Update, Payload::Info(info));
        self.gather(acks, Payload::Ack).await?;

        debug!(player = self.index(), "Update acknowledged by every peer");
        Ok(())
    }

    /// Apply peer `from`'s game-state delta and acknowledge it.
    pub fn recv_update(&self, info: &Value, from: PlayerIndex) -> Result<()> {
        let applied = self.apply_update(info, from);
        self.refuse_on_error(MessageKind::Update, UPDATE_REFUSED, from, applied)?;
        self.send_to(MessageKind::UpdateAck, Payload::Ack, from);
        Ok(())
    }

    fn apply_update(&self, info: &Value, player: PlayerIndex) -> Result<()> {
        let mut controller = self.controller().lock();
        controller.validate_update(info, player)?;
        controller.update(info, player)?;
        Ok(())
    }

    // ========================================================================
    // Request dispatch (driven by `serve`)
    // ========================================================================

    pub(crate) fn on_draw(&self, item: Delivery) -> Result<()> {
        let index = self.card_or_refuse(MessageKind::Draw, &item)?;
        self.recv_draw(index, item.from)
    }

    pub(crate) async fn on_open(&self, item: Delivery) -> Result<()> {
        let index = self.card_or_refuse(MessageKind::Open, &item)?;
        self.recv_open(index, item.from).await.map(|_| ())
    }

    pub(crate) fn on_update(&self, item: Delivery) -> Result<()> {
        match item.payload {
            Payload::Info(info) => self.recv_update(&info, item.from),
            _ => {
                let err = ProtocolError::unexpected(MessageKind::Update);
                self.send_error(MessageKind::Update, err.to_string(), item.from);
                Err(err)
            }
        }
    }

    fn card_or_refuse(&self, kind: MessageKind, item: &Delivery) -> Result<CardIndex> {
        item.payload.as_card().ok_or_else(|| {
            let err = ProtocolError::unexpected(kind);
            self.send_error(kind, err.to_string(), item.from);
            err
        })
    }

    /// Pass a result through, telling `from` about a failure.
    fn refuse_on_error<T>(
        &self,
        context: MessageKind,
        reason: &str,
        from: PlayerIndex,
        result: Result<T>,
    ) -> Result<T> {
        result.map_err(|err| {
            warn!(player = self.index(), from, kind = %context, error = %err, "Refusing request");
            self.send_error(context, reason, from);
            err
        })
    }

    fn broadcast_abort(&self, context: MessageKind, err: &ProtocolError) {
        self.send(Message::error(context, err.to_string()), None);
    }
}

fn into_keys(payloads: Vec<Payload>, kind: MessageKind) -> Result<Vec<String>> {
    payloads
        .into_iter()
        .map(|payload| payload.into_key().ok_or(ProtocolError::unexpected(kind)))
        .collect()
}

/// Resolves when the watched peer reports an error about `context`.
async fn next_abort(errors: &mut MessageStream, context: MessageKind) -> ProtocolError {
    while let Ok(item) = errors.next_delivery().await {
        if let Payload::Error { context: about, reason } = item.payload {
            if about == context {
                return ProtocolError::Rejected {
                    peer: item.from,
                    reason,
                };
            }
        }
    }
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{drain, engine};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn card_operations_need_a_ready_session() {
        let (peer, _outbound) = engine(0, 2);
        assert_eq!(peer.draw().await, Err(ProtocolError::NotReady));
        assert_eq!(peer.open(Some(0)).await, Err(ProtocolError::NotReady));
        assert_eq!(
            peer.update(serde_json::json!({"bet": 1})).await,
            Err(ProtocolError::NotReady)
        );
    }

    #[tokio::test]
    async fn start_runs_once() {
        let (peer, _outbound) = engine(1, 2);
        let starting = peer.start();
        futures::pin_mut!(starting);
        assert!(futures::poll!(starting.as_mut()).is_pending());
        assert_eq!(peer.phase(), SessionPhase::Committing);

        assert_eq!(peer.start().await, Err(ProtocolError::AlreadyStarted));
    }

    #[tokio::test]
    async fn start_broadcasts_commitment_first() {
        let (peer, mut outbound) = engine(0, 2);
        let starting = peer.start();
        futures::pin_mut!(starting);
        assert!(futures::poll!(starting.as_mut()).is_pending());

        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message.kind, MessageKind::Commit);
        assert_eq!(sent[0].target, None);
        assert_matches!(&sent[0].message.payload, Payload::Points(points) if points.len() == 4);
    }

    #[tokio::test]
    async fn bad_commitment_fails_the_session() {
        let (peer, _outbound) = engine(0, 2);
        peer.receive(Message::new(MessageKind::Commit, Payload::Points(vec!["zz".into()])), 1);

        assert_matches!(peer.start().await, Err(ProtocolError::Deck(_)));
        assert_matches!(peer.phase(), SessionPhase::Failed(_));
        assert_matches!(peer.ready().await, Err(ProtocolError::SessionFailed(_)));
    }

    #[test]
    fn recv_update_acknowledges() {
        let (peer, mut outbound) = engine(1, 3);
        peer.recv_update(&serde_json::json!({"pot": 10}), 2).unwrap();

        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, Message::new(MessageKind::UpdateAck, Payload::Ack));
        assert_eq!(sent[0].target, Some(2));
    }

    #[tokio::test]
    async fn vetoed_update_waits_for_every_answer() {
        let (peer, mut outbound) = engine(0, 3);
        peer.set_phase(SessionPhase::Ready);
        let ack = || Message::new(MessageKind::UpdateAck, Payload::Ack);

        let first = peer.update(serde_json::json!({"n": 1}));
        futures::pin_mut!(first);
        assert!(futures::poll!(first.as_mut()).is_pending());

        peer.receive(Message::error(MessageKind::Update, UPDATE_REFUSED), 1);
        assert!(futures::poll!(first.as_mut()).is_pending());
        peer.receive(ack(), 2);
        assert_matches!(
            first.await,
            Err(ProtocolError::Rejected { peer: 1, reason }) if reason == UPDATE_REFUSED
        );

        // Peer 2's ack went to the vetoed request, so the next update needs
        // a fresh one from everybody.
        let second = peer.update(serde_json::json!({"n": 2}));
        futures::pin_mut!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());
        peer.receive(ack(), 1);
        assert!(futures::poll!(second.as_mut()).is_pending());
        peer.receive(ack(), 2);
        assert_eq!(second.await, Ok(()));

        let sent = drain(&mut outbound);
        assert!(sent.iter().all(|out| out.message.kind == MessageKind::Update));
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn recv_draw_replies_with_key_and_marks_slot() {
        let (peer, mut outbound) = engine(1, 3);
        peer.recv_draw(2, 0).unwrap();

        assert!(peer.with_deck(|deck| deck.is_drawn(2)));
        let sent = drain(&mut outbound);
        assert_eq!(sent[0].message.kind, MessageKind::DrawKey);
        assert_eq!(sent[0].target, Some(0));
    }

    #[test]
    fn recv_draw_out_of_range_is_refused() {
        let (peer, mut outbound) = engine(1, 3);
        assert_matches!(peer.recv_draw(9, 0), Err(ProtocolError::Deck(_)));

        let sent = drain(&mut outbound);
        assert_eq!(sent[0].message, Message::error(MessageKind::Draw, DRAW_REFUSED));
    }

    #[tokio::test]
    async fn recv_open_aborts_when_opener_gives_up() {
        let (peer, mut outbound) = engine(2, 3);
        let opening = peer.recv_open(1, 0);
        futures::pin_mut!(opening);
        assert!(futures::poll!(opening.as_mut()).is_pending());
        assert_eq!(drain(&mut outbound)[0].message.kind, MessageKind::OpenKey);

        peer.receive(Message::error(MessageKind::Open, "rejected by 1"), 0);
        assert_matches!(
            opening.await,
            Err(ProtocolError::Rejected { peer: 0, .. })
        );
    }

    #[tokio::test]
    async fn recv_open_reports_bad_key_sets() {
        let (peer, mut outbound) = engine(1, 2);
        let opening = peer.recv_open(0, 0);
        futures::pin_mut!(opening);
        assert!(futures::poll!(opening.as_mut()).is_pending());
        drain(&mut outbound);

        peer.receive(Message::new(MessageKind::OpenKeys, Payload::Keys(vec![])), 0);
        assert_matches!(opening.await, Err(ProtocolError::Deck(_)));
        assert_eq!(
            drain(&mut outbound)[0].message,
            Message::error(MessageKind::OpenKeys, OPEN_FAILED)
        );
    }
}
