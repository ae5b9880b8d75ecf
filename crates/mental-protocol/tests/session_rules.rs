//! Session Rule Tests
//!
//! Controller vetoes, updates and lifecycle errors across a live ring.

use mental_protocol::session::{DRAW_REFUSED, UPDATE_REFUSED};
use mental_protocol::{MessageKind, ProtocolError, SessionPhase};
use mental_testkit::{
    init_tracing, wait_until, ControllerEvent, LocalRing, PermissiveController, VetoController,
};
use serde_json::json;

async fn ready_ring<K, F>(players: usize, cards: usize, controller: F) -> LocalRing<K>
where
    K: mental_protocol::Controller,
    F: FnMut(usize) -> K,
{
    init_tracing();
    let ring = LocalRing::new(players, cards, controller).unwrap();
    ring.start().await.unwrap();
    ring
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn start_twice_fails() {
    let ring = ready_ring(2, 4, |_| PermissiveController::default()).await;
    assert_eq!(ring.peer(0).start().await, Err(ProtocolError::AlreadyStarted));
    assert_eq!(ring.peer(1).phase(), SessionPhase::Ready);
    assert_eq!(ring.peer(1).ready().await, Ok(()));
}

#[tokio::test]
async fn init_streams_are_released_after_start() {
    let ring = ready_ring(3, 4, |_| PermissiveController::default()).await;
    for peer in ring.peers() {
        for kind in [
            MessageKind::Commit,
            MessageKind::Shuffle,
            MessageKind::Lock,
            MessageKind::Final,
        ] {
            assert_eq!(peer.listener_count(kind), 0, "{kind} still routed");
        }
    }
}

#[tokio::test]
async fn shutdown_fails_pending_operations() {
    let ring = ready_ring(2, 4, |_| PermissiveController::default()).await;
    ring.shutdown();
    assert_eq!(ring.peer(1).draw().await, Err(ProtocolError::StreamClosed));
    assert_eq!(ring.peer(0).draw().await, Err(ProtocolError::StreamClosed));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn update_is_applied_on_every_peer() {
    let ring = ready_ring(3, 4, |_| PermissiveController::default()).await;
    let info = json!({"pot": 30, "turn": 2});

    ring.peer(2).update(info.clone()).await.unwrap();

    // Every peer acknowledged before `update` returned.
    for peer in ring.peers() {
        assert_eq!(peer.with_controller(|c| c.updates()), vec![(2, info.clone())]);
    }
}

#[tokio::test]
async fn vetoed_update_is_rejected() {
    let ring = ready_ring(3, 4, |index| {
        if index == 1 {
            VetoController::default().veto_updates()
        } else {
            VetoController::default()
        }
    })
    .await;

    let err = ring.peer(0).update(json!({"fold": true})).await.unwrap_err();
    assert_eq!(
        err,
        ProtocolError::Rejected {
            peer: 1,
            reason: UPDATE_REFUSED.to_string()
        }
    );
}

#[tokio::test]
async fn local_veto_never_reaches_the_ring() {
    let ring = ready_ring(2, 4, |index| {
        if index == 0 {
            VetoController::default().veto_opens()
        } else {
            VetoController::default()
        }
    })
    .await;

    let err = ring.peer(0).open(Some(0)).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Controller(_)), "{err:?}");
    assert!(!ring.peer(1).with_deck(|deck| deck.is_drawn(0)));
}

// ============================================================================
// Draws
// ============================================================================

#[tokio::test]
async fn remote_draw_veto_surfaces_as_rejection() {
    let ring = ready_ring(3, 4, |index| {
        if index == 2 {
            VetoController::default().veto_draws()
        } else {
            VetoController::default()
        }
    })
    .await;

    let err = ring.peer(0).draw().await.unwrap_err();
    assert_eq!(
        err,
        ProtocolError::Rejected {
            peer: 2,
            reason: DRAW_REFUSED.to_string()
        }
    );

    // The lock was released: the manager can take it again.
    assert_eq!(ring.peer(0).mutex(|| async { Ok(()) }).await, Ok(()));
}

#[tokio::test]
async fn peers_learn_who_drew_but_not_what() {
    let ring = ready_ring(3, 5, |_| PermissiveController::default()).await;
    let card = ring.peer(1).draw().await.unwrap();

    assert_eq!(
        ring.peer(1).with_controller(|c| c.events().to_vec()),
        vec![ControllerEvent::Draw {
            player: 1,
            card: card.index,
            value: Some(card.value)
        }]
    );
    for other in [0, 2] {
        assert_eq!(
            ring.peer(other).with_controller(|c| c.events().to_vec()),
            vec![ControllerEvent::Draw {
                player: 1,
                card: card.index,
                value: None
            }]
        );
    }
}

#[tokio::test]
async fn open_reveals_to_everyone() {
    let ring = ready_ring(3, 5, |_| PermissiveController::default()).await;
    let opened = ring.peer(2).open(None).await.unwrap();
    assert_eq!(opened.index, 0);

    let settled = wait_until(|| {
        ring.peers()
            .iter()
            .all(|peer| peer.with_controller(|c| c.opened().get(&0).copied()) == Some(opened.value))
    })
    .await;
    assert!(settled, "every peer should learn the opened card");
}
