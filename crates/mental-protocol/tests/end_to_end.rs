//! End-to-End Dealing Tests
//!
//! A full table: four peers jointly shuffle a 52-card deck, take turns
//! drawing every card, then each owner opens its cards to the table.

use mental_deck::DeckError;
use mental_protocol::{DrawnCard, ProtocolError, SessionPhase};
use mental_testkit::{init_tracing, wait_until, LocalRing, TableController};
use std::collections::BTreeSet;

const PLAYERS: usize = 4;
const CARDS: usize = 52;

#[tokio::test]
async fn four_peers_draw_and_open_a_full_deck() {
    init_tracing();
    let ring = LocalRing::new(PLAYERS, CARDS, |_| TableController::new(CARDS)).unwrap();
    ring.start().await.unwrap();

    // ========================================================================
    // Initialization
    // ========================================================================

    let locked = ring.peer(0).with_deck(|deck| deck.locked());
    assert_eq!(locked.len(), CARDS);
    for peer in ring.peers() {
        assert_eq!(peer.phase(), SessionPhase::Ready);
        assert_eq!(peer.with_deck(|deck| deck.locked()), locked);
    }

    // ========================================================================
    // Round-robin draws
    // ========================================================================

    let mut drawn: Vec<DrawnCard> = Vec::with_capacity(CARDS);
    for turn in 0..CARDS {
        let card = ring.peer(turn % PLAYERS).draw().await.unwrap();
        assert!(card.value < CARDS, "drawn value out of range");
        drawn.push(card);
    }

    let indices: BTreeSet<usize> = drawn.iter().map(|c| c.index).collect();
    let values: BTreeSet<usize> = drawn.iter().map(|c| c.value).collect();
    assert_eq!(indices.len(), CARDS, "every slot drawn once");
    assert_eq!(values.len(), CARDS, "every card drawn once");

    assert_eq!(
        ring.peer(1).draw().await,
        Err(ProtocolError::Deck(DeckError::NoCardsLeft))
    );

    // ========================================================================
    // Owners open their cards
    // ========================================================================

    for card in &drawn {
        let owner = ring.peer(card.index % PLAYERS);
        let opened = owner.open(Some(card.index)).await.unwrap();
        assert_eq!(opened.index, card.index);
        assert_eq!(opened.value, card.value, "opened value matches the draw");
    }

    // Every peer learned the same values; the last open may still be in flight.
    let expected: Vec<(usize, usize)> = drawn.iter().map(|c| (c.index, c.value)).collect();
    let settled = wait_until(|| {
        ring.peers()
            .iter()
            .all(|peer| peer.with_controller(|c| c.opened().len()) == CARDS)
    })
    .await;
    assert!(settled, "peers did not learn every opened card");
    for peer in ring.peers() {
        let seen: Vec<(usize, usize)> = peer.with_controller(|c| c.opened().into_iter().collect());
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn seeded_rings_deal_identically() {
    let deal = || async {
        let ring = LocalRing::seeded(3, 12, 7, |_| TableController::new(12)).unwrap();
        ring.start().await.unwrap();
        let card = ring.peer(1).draw().await.unwrap();
        (ring.peer(2).with_deck(|deck| deck.locked()), card)
    };

    let (first_deck, first_card) = deal().await;
    let (second_deck, second_card) = deal().await;
    assert_eq!(first_deck, second_deck);
    assert_eq!(first_card, second_card);
}

#[tokio::test]
async fn owners_cannot_be_overruled() {
    let ring = LocalRing::new(2, 6, |_| TableController::new(6)).unwrap();
    ring.start().await.unwrap();

    let card = ring.peer(0).draw().await.unwrap();
    assert_eq!(ring.peer(0).with_controller(|c| c.slot(card.index).cloned().unwrap().owner), Some(0));

    // Peer 1 may not open peer 0's card: its own controller says no first.
    let err = ring.peer(1).open(Some(card.index)).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Controller(_)), "{err:?}");

    // Opening an undrawn card with the default slot works for anyone.
    let opened = ring.peer(1).open(None).await.unwrap();
    assert_ne!(opened.index, card.index);
}
