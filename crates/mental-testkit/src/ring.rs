//! In-process ring
//!
//! [`LocalRing`] plays the transport for a set of engines living in one
//! process: every peer's outbound messages are forwarded by a task of their
//! own, which keeps each sender's messages in order, and every peer's
//! [`serve`](ProtocolEngine::serve) loop runs on a spawned task.
//!
//! Must be created inside a Tokio runtime.

use futures::future::try_join_all;
use futures::StreamExt;
use mental_protocol::{
    Controller, Outbound, OutboundStream, PlayerIndex, ProtocolEngine, Result, SessionConfig,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Engines connected through in-memory forwarding.
pub struct LocalRing<K: Controller> {
    peers: Vec<Arc<ProtocolEngine<K>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<K: Controller> LocalRing<K> {
    /// A ring of `player_count` peers with `card_count` cards and OS
    /// entropy. `controller` builds each peer's rules from its index.
    pub fn new(
        player_count: usize,
        card_count: usize,
        controller: impl FnMut(PlayerIndex) -> K,
    ) -> Result<Self> {
        let configs = (0..player_count)
            .map(|index| SessionConfig::new(index, player_count).with_card_count(card_count))
            .collect();
        Self::with_configs(configs, controller)
    }

    /// Like [`new`](Self::new), with every peer's randomness seeded from
    /// `seed` so runs are reproducible.
    pub fn seeded(
        player_count: usize,
        card_count: usize,
        seed: u8,
        controller: impl FnMut(PlayerIndex) -> K,
    ) -> Result<Self> {
        let configs = (0..player_count)
            .map(|index| {
                SessionConfig::new(index, player_count)
                    .with_card_count(card_count)
                    .with_entropy(vec![seed.wrapping_add(index as u8); 32])
            })
            .collect();
        Self::with_configs(configs, controller)
    }

    /// A ring built from explicit per-peer configurations, listed by index.
    pub fn with_configs(
        configs: Vec<SessionConfig>,
        mut controller: impl FnMut(PlayerIndex) -> K,
    ) -> Result<Self> {
        let mut peers = Vec::with_capacity(configs.len());
        let mut outbound = Vec::with_capacity(configs.len());
        for config in configs {
            let rules = controller(config.index);
            let (engine, rx) = ProtocolEngine::new(config, rules)?;
            peers.push(Arc::new(engine));
            outbound.push(rx);
        }

        let mut tasks = Vec::with_capacity(peers.len() * 2);
        for (index, rx) in outbound.into_iter().enumerate() {
            tasks.push(tokio::spawn(forward(index, rx, peers.clone())));

            let peer = Arc::clone(&peers[index]);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = peer.serve().await {
                    warn!(player = index, error = %err, "Serve loop failed");
                }
            }));
        }

        Ok(Self { peers, tasks })
    }

    /// Peer at ring position `index`.
    ///
    /// # Panics
    ///
    /// If `index` is outside the ring.
    pub fn peer(&self, index: PlayerIndex) -> &Arc<ProtocolEngine<K>> {
        &self.peers[index]
    }

    /// Every peer, by index.
    pub fn peers(&self) -> &[Arc<ProtocolEngine<K>>] {
        &self.peers
    }

    /// Ring size.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the ring has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Run `start` on every peer concurrently.
    pub async fn start(&self) -> Result<()> {
        try_join_all(self.peers.iter().map(|peer| peer.start())).await?;
        Ok(())
    }

    /// Shut every engine down and stop the forwarding tasks.
    pub fn shutdown(&self) {
        for peer in &self.peers {
            peer.shutdown();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl<K: Controller> Drop for LocalRing<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn forward<K: Controller>(
    from: PlayerIndex,
    mut rx: OutboundStream,
    peers: Vec<Arc<ProtocolEngine<K>>>,
) {
    while let Some(Outbound { message, target }) = rx.next().await {
        match target {
            Some(to) => match peers.get(to) {
                Some(peer) => peer.receive(message, from),
                None => warn!(from, to, "Message for a peer outside the ring"),
            },
            None => {
                for (to, peer) in peers.iter().enumerate() {
                    if to != from {
                        peer.receive(message.clone(), from);
                    }
                }
            }
        }
    }
    debug!(player = from, "Outbound stream ended");
}
