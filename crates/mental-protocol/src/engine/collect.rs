//! Full-ring barrier
//!
//! A collection waits until every peer has sent one message of a kind and
//! returns the payloads ordered by sender, with the local peer's own
//! contribution in its slot. A second message from the same peer is
//! answered with an `error` message and otherwise ignored.
//!
//! Collections answering a request can also watch for a veto: an `error`
//! message whose context is the request counts as that peer's answer and
//! turns the result into [`ProtocolError::Rejected`].

use super::ProtocolEngine;
use crate::controller::Controller;
use crate::error::{ProtocolError, Result};
use crate::message::{MessageKind, Payload, PlayerIndex};
use crate::stream::MessageStream;
use futures::StreamExt;
use mental_deck::Curve;
use tracing::debug;

/// Reason sent back to a peer that answered twice.
pub const DUPLICATE_MESSAGE: &str = "duplicate message";

/// Registered but not yet awaited collection.
///
/// Create it before sending the request so no reply can slip past.
#[derive(Debug)]
pub struct Collection {
    kind: MessageKind,
    replies: MessageStream,
    vetoes: Option<(MessageKind, MessageStream)>,
}

impl Collection {
    pub(crate) fn new(replies: MessageStream) -> Self {
        Self {
            kind: replies.kind(),
            replies,
            vetoes: None,
        }
    }

    /// Message kind being collected.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

impl<K: Controller, C: Curve> ProtocolEngine<K, C> {
    /// Collect one `kind` message from every peer.
    ///
    /// `own` fills this peer's slot.
    pub async fn collect(&self, kind: MessageKind, own: Payload) -> Result<Vec<Payload>> {
        let collection = Collection::new(self.stream(kind, None));
        self.gather(collection, own).await
    }

    /// Register a collection of `reply` messages that aborts when a peer
    /// answers `request` with an error.
    pub fn collect_replies(&self, reply: MessageKind, request: MessageKind) -> Collection {
        let mut collection = Collection::new(self.stream(reply, None));
        collection.vetoes = Some((request, self.stream(MessageKind::Error, None)));
        collection
    }

    /// Wait for a registered collection to fill.
    ///
    /// A vetoed collection still waits until every peer has either replied
    /// or vetoed, so no answer to this request is left in flight for the
    /// next collection of the same kind. The first veto is returned.
    pub async fn gather(&self, collection: Collection, own: Payload) -> Result<Vec<Payload>> {
        let Collection {
            kind,
            mut replies,
            mut vetoes,
        } = collection;

        let mut slots: Vec<Option<Payload>> = vec![None; self.player_count()];
        let mut vetoed = vec![false; slots.len()];
        slots[self.index()] = Some(own);
        let mut missing = slots.len() - 1;
        let mut rejection = None;

        while missing > 0 {
            let item = tokio::select! {
                item = replies.next_delivery() => item?,
                (peer, reason) = next_veto(&mut vetoes) => {
                    if matches!(slots.get(peer), Some(None)) && !vetoed[peer] {
                        vetoed[peer] = true;
                        missing -= 1;
                        rejection.get_or_insert(ProtocolError::Rejected { peer, reason });
                    }
                    continue;
                }
            };

            match slots.get_mut(item.from) {
                Some(slot @ None) if !vetoed[item.from] => {
                    *slot = Some(item.payload);
                    missing -= 1;
                }
                _ => self.send_error(kind, DUPLICATE_MESSAGE, item.from),
            }
        }
        replies.unwatch();

        if let Some(rejection) = rejection {
            debug!(player = self.index(), kind = %kind, "Collection vetoed");
            return Err(rejection);
        }
        debug!(player = self.index(), kind = %kind, "Collected from every peer");
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Resolves with the next veto of the watched request; never resolves
/// without one.
async fn next_veto(vetoes: &mut Option<(MessageKind, MessageStream)>) -> (PlayerIndex, String) {
    if let Some((request, errors)) = vetoes {
        while let Some(item) = errors.next().await {
            if let Payload::Error { context, reason } = item.payload {
                if context == *request {
                    return (item.from, reason);
                }
            }
        }
    }
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{drain, engine};
    use crate::message::Message;
    use assert_matches::assert_matches;

    fn ack() -> Message {
        Message::new(MessageKind::UpdateAck, Payload::Ack)
    }

    #[tokio::test]
    async fn orders_payloads_by_sender() {
        let (peer, _outbound) = engine(1, 3);
        let collection = Collection::new(peer.stream(MessageKind::Commit, None));

        peer.receive(Message::new(MessageKind::Commit, Payload::Card(2)), 2);
        peer.receive(Message::new(MessageKind::Commit, Payload::Card(0)), 0);

        let out = peer.gather(collection, Payload::Card(1)).await.unwrap();
        assert_eq!(
            out,
            vec![Payload::Card(0), Payload::Card(1), Payload::Card(2)]
        );
        assert_eq!(peer.listener_count(MessageKind::Commit), 1);
    }

    #[tokio::test]
    async fn duplicates_are_reported_and_ignored() {
        let (peer, mut outbound) = engine(0, 3);
        let collection = Collection::new(peer.stream(MessageKind::Commit, None));

        peer.receive(Message::new(MessageKind::Commit, Payload::Card(1)), 1);
        peer.receive(Message::new(MessageKind::Commit, Payload::Card(9)), 1);
        peer.receive(Message::new(MessageKind::Commit, Payload::Card(2)), 2);

        let out = peer.gather(collection, Payload::Card(0)).await.unwrap();
        assert_eq!(out[1], Payload::Card(1));

        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Some(1));
        assert_eq!(
            sent[0].message,
            Message::error(MessageKind::Commit, DUPLICATE_MESSAGE)
        );
    }

    #[tokio::test]
    async fn veto_fails_collection_once_everyone_answered() {
        let (peer, _outbound) = engine(0, 3);
        let collection = peer.collect_replies(MessageKind::UpdateAck, MessageKind::Update);

        peer.receive(ack(), 1);
        peer.receive(Message::error(MessageKind::Draw, "unrelated"), 2);
        peer.receive(Message::error(MessageKind::Update, "no"), 2);

        assert_matches!(
            peer.gather(collection, Payload::Ack).await,
            Err(ProtocolError::Rejected { peer: 2, reason }) if reason == "no"
        );
        assert_eq!(peer.listener_count(MessageKind::UpdateAck), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_collection() {
        let (peer, _outbound) = engine(0, 2);
        let collection = peer.collect_replies(MessageKind::UpdateAck, MessageKind::Update);
        peer.shutdown();
        assert_eq!(
            peer.gather(collection, Payload::Ack).await,
            Err(ProtocolError::StreamClosed)
        );
    }
}
