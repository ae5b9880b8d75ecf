//! Distributed Mutex Tests
//!
//! Runs mutex bodies from several peers of an in-process ring and checks
//! that they never overlap and that each peer's bodies run in request order.

use futures::future::join_all;
use mental_protocol::{PlayerIndex, Result};
use mental_testkit::{init_tracing, LocalRing, PermissiveController};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    active: AtomicUsize,
    overlaps: AtomicUsize,
    log: Mutex<Vec<(PlayerIndex, usize)>>,
}

impl Recorder {
    async fn body(&self, player: PlayerIndex, seq: usize, hold: Duration) -> Result<()> {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.log.lock().push((player, seq));
        tokio::time::sleep(hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn log(&self) -> Vec<(PlayerIndex, usize)> {
        self.log.lock().clone()
    }
}

fn ring(players: usize) -> LocalRing<PermissiveController> {
    init_tracing();
    LocalRing::seeded(players, 4, 0x40, |_| PermissiveController::default()).unwrap()
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn manager_runs_first_and_repeat_requester_runs_last() {
    let ring = ring(3);
    let recorder = Recorder::default();
    let hold = Duration::from_millis(20);

    // Requests issued in the order P1, P0, P1, P2.
    let requests = [(1, 0), (0, 0), (1, 1), (2, 0)];
    let bodies = requests.iter().map(|&(player, seq)| {
        let recorder = &recorder;
        ring.peer(player)
            .mutex(move || recorder.body(player, seq, hold))
    });
    for result in join_all(bodies).await {
        result.unwrap();
    }

    let log = recorder.log();
    assert_eq!(recorder.overlaps.load(Ordering::SeqCst), 0, "bodies overlapped");
    // The manager's own request is granted at once; P1's second request
    // queues locally and only reaches the manager after P2's.
    assert_eq!(log, vec![(0, 0), (1, 0), (2, 0), (1, 1)]);
}

#[tokio::test]
async fn many_peers_never_overlap() {
    let ring = ring(4);
    let recorder = Recorder::default();
    let hold = Duration::from_millis(1);

    let bodies = (0..5).flat_map(|seq| (0..4).map(move |player| (player, seq)));
    let bodies = bodies.map(|(player, seq)| {
        let recorder = &recorder;
        ring.peer(player)
            .mutex(move || recorder.body(player, seq, hold))
    });
    for result in join_all(bodies).await {
        result.unwrap();
    }

    assert_eq!(recorder.overlaps.load(Ordering::SeqCst), 0, "bodies overlapped");

    let mut per_peer: BTreeMap<PlayerIndex, Vec<usize>> = BTreeMap::new();
    for (player, seq) in recorder.log() {
        per_peer.entry(player).or_default().push(seq);
    }
    assert_eq!(per_peer.len(), 4);
    for (player, seqs) in per_peer {
        assert_eq!(seqs, vec![0, 1, 2, 3, 4], "peer {player} ran out of order");
    }

    // The manager's own turn comes only after the last release arrived.
    ring.peer(0).mutex(|| async { Ok(()) }).await.unwrap();
    for peer in ring.peers() {
        assert_eq!(peer.mutex_holder(), None);
    }
}

#[tokio::test]
async fn body_result_is_returned_to_the_caller() {
    let ring = ring(2);
    let value = ring.peer(1).mutex(|| async { Ok(42) }).await.unwrap();
    assert_eq!(value, 42);

    ring.peer(0).mutex(|| async { Ok(()) }).await.unwrap();
    assert_eq!(ring.peer(0).mutex_holder(), None);
    assert_eq!(ring.peer(1).mutex_holder(), None);
}
