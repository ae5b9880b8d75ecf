//! Distributed mutex
//!
//! The first player manages a ring-wide lock. Requests are granted in
//! arrival order: the manager's own requests complete through a oneshot
//! channel, remote requests through a `mutex:baton` message, and a remote
//! holder gives the lock back with `mutex:release`.
//!
//! Every other peer keeps at most one request in flight with the manager.
//! Further local acquisitions wait in a local queue and take their turn when
//! the current one is released, so each peer's acquisitions run in the
//! order they were made.

use super::ProtocolEngine;
use crate::controller::Controller;
use crate::error::{ProtocolError, Result};
use crate::message::{MessageKind, Payload, PlayerIndex, FIRST_PLAYER};
use mental_deck::Curve;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::debug;

enum Grant {
    /// Wake a waiting local acquisition
    Local(oneshot::Sender<()>),
    /// Send a baton to a remote requester (manager only)
    Remote,
}

struct Waiter {
    requester: PlayerIndex,
    grant: Grant,
}

/// Holder and FIFO queue of the ring lock.
#[derive(Default)]
pub(crate) struct MutexState {
    holder: Option<PlayerIndex>,
    queue: VecDeque<Waiter>,
}

impl MutexState {
    /// Forget every holder and waiter; waiting acquisitions fail.
    pub(crate) fn clear(&mut self) {
        self.holder = None;
        self.queue.clear();
    }
}

/// Proof of holding the ring lock. Dropping it releases the lock.
#[must_use = "the ring lock is released as soon as the guard is dropped"]
pub struct RingLock<'a, K: Controller, C: Curve> {
    engine: &'a ProtocolEngine<K, C>,
}

impl<K: Controller, C: Curve> Drop for RingLock<'_, K, C> {
    fn drop(&mut self) {
        self.engine.release_ring_lock();
    }
}

impl<K: Controller, C: Curve> ProtocolEngine<K, C> {
    /// Run `body` while holding the ring-wide lock.
    ///
    /// The lock is released once the body's future completes, whatever its
    /// outcome, and the body's result is returned.
    pub async fn mutex<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.lock_ring().await?;
        let result = body().await;
        drop(guard);
        result
    }

    /// Acquire the ring-wide lock.
    pub async fn lock_ring(&self) -> Result<RingLock<'_, K, C>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Waiter {
            requester: self.index(),
            grant: Grant::Local(tx),
        });
        rx.await.map_err(|_| ProtocolError::StreamClosed)?;

        if !self.is_first() {
            if let Err(err) = self.request_baton().await {
                self.hand_over();
                return Err(err);
            }
        }

        debug!(player = self.index(), "Acquired ring lock");
        Ok(RingLock { engine: self })
    }

    /// Current holder as seen by this peer.
    ///
    /// On the manager this is the ring-wide holder; elsewhere it is this
    /// peer while one of its acquisitions is in flight.
    pub fn mutex_holder(&self) -> Option<PlayerIndex> {
        self.ring_lock_state().lock().holder
    }

    /// Number of acquisitions waiting behind the holder.
    pub fn mutex_queue_len(&self) -> usize {
        self.ring_lock_state().lock().queue.len()
    }

    async fn request_baton(&self) -> Result<()> {
        let mut baton = self.stream(MessageKind::MutexBaton, Some(FIRST_PLAYER));
        self.send_to(MessageKind::MutexAcquire, Payload::Empty, FIRST_PLAYER);
        baton.next_delivery().await?;
        Ok(())
    }

    fn release_ring_lock(&self) {
        debug!(player = self.index(), "Releasing ring lock");
        if !self.is_first() {
            self.send_to(MessageKind::MutexRelease, Payload::Empty, FIRST_PLAYER);
        }
        self.hand_over();
    }

    /// `mutex:acquire` from `from` (manager only).
    pub(crate) fn on_acquire(&self, from: PlayerIndex) {
        debug!(player = self.index(), from, "Mutex requested");
        self.enqueue(Waiter {
            requester: from,
            grant: Grant::Remote,
        });
    }

    /// `mutex:release` from `from` (manager only).
    pub(crate) fn on_release(&self, from: PlayerIndex) {
        let mut state = self.ring_lock_state().lock();
        if state.holder != Some(from) {
            drop(state);
            self.send_error(
                MessageKind::MutexRelease,
                "mutex is not held by the releasing peer",
                from,
            );
            return;
        }

        debug!(player = self.index(), from, "Mutex released");
        state.holder = None;
        let next = state.queue.pop_front();
        self.grant(&mut state, next);
    }

    fn enqueue(&self, waiter: Waiter) {
        let mut state = self.ring_lock_state().lock();
        if let Some(holder) = state.holder {
            debug!(
                player = self.index(),
                requester = waiter.requester,
                holder,
                "Mutex busy, queueing"
            );
            state.queue.push_back(waiter);
            return;
        }
        self.grant(&mut state, Some(waiter));
    }

    fn hand_over(&self) {
        let mut state = self.ring_lock_state().lock();
        state.holder = None;
        let next = state.queue.pop_front();
        self.grant(&mut state, next);
    }

    fn grant(&self, state: &mut MutexState, mut next: Option<Waiter>) {
        while let Some(waiter) = next.take() {
            state.holder = Some(waiter.requester);
            match waiter.grant {
                Grant::Local(tx) => {
                    if tx.send(()).is_ok() {
                        debug!(player = self.index(), "Mutex granted locally");
                        return;
                    }
                    // The acquisition was abandoned; move on.
                    state.holder = None;
                    next = state.queue.pop_front();
                }
                Grant::Remote => {
                    debug!(
                        player = self.index(),
                        holder = waiter.requester,
                        "Mutex granted to peer"
                    );
                    self.send_to(MessageKind::MutexBaton, Payload::Empty, waiter.requester);
                    return;
                }
            }
        }
    }
}
