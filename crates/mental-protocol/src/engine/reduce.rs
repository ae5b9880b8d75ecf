//! Ring pass
//!
//! A value travels once around the ring, each peer transforming it before
//! handing it to its successor. The first player seeds the pass with
//! [`feed`](ProtocolEngine::feed) and gets the fully reduced value back when
//! it returns from the last peer; everyone else calls
//! [`relay`](ProtocolEngine::relay), which transforms the one value it
//! receives from its predecessor and forwards it.

use super::ProtocolEngine;
use crate::controller::Controller;
use crate::error::{ProtocolError, Result};
use crate::message::{MessageKind, Payload};
use crate::stream::MessageStream;
use mental_deck::Curve;
use tracing::debug;

/// A ring pass of one message kind, listening to the ring predecessor.
#[derive(Debug)]
pub struct RingPass {
    stream: MessageStream,
}

impl RingPass {
    pub(crate) fn new(stream: MessageStream) -> Self {
        Self { stream }
    }

    /// Message kind carrying the pass.
    pub fn kind(&self) -> MessageKind {
        self.stream.kind()
    }
}

impl<K: Controller, C: Curve> ProtocolEngine<K, C> {
    /// Listen for a ring pass of `kind` from the predecessor.
    pub fn ring_pass(&self, kind: MessageKind) -> RingPass {
        RingPass::new(self.stream(kind, Some(self.prev())))
    }

    /// Start a pass (first player): reduce `seed`, send it on, and wait for
    /// the value to come back around the ring.
    pub async fn feed<F>(
        &self,
        pass: RingPass,
        seed: Option<&[String]>,
        reduce: F,
    ) -> Result<Vec<String>>
    where
        F: FnOnce(Option<&[String]>) -> Result<Vec<String>>,
    {
        let RingPass { mut stream } = pass;
        let kind = stream.kind();

        let acc = reduce(seed)?;
        self.send_to(kind, Payload::Points(acc), self.next());
        debug!(player = self.index(), kind = %kind, "Fed ring pass");

        let item = stream.next_delivery().await?;
        stream.unwatch();
        item.payload
            .into_points()
            .ok_or(ProtocolError::unexpected(kind))
    }

    /// Take part in a pass (every peer but the first): reduce the value from
    /// the predecessor and forward it. Failures are reported back to the
    /// predecessor as well as returned.
    pub async fn relay<F>(&self, pass: RingPass, reduce: F) -> Result<()>
    where
        F: FnOnce(Option<&[String]>) -> Result<Vec<String>>,
    {
        let RingPass { mut stream } = pass;
        let kind = stream.kind();

        let item = stream.next_delivery().await?;
        stream.unwatch();

        let reduced = item
            .payload
            .into_points()
            .ok_or(ProtocolError::unexpected(kind))
            .and_then(|points| reduce(Some(points.as_slice())));

        match reduced {
            Ok(acc) => {
                debug!(
                    player = self.index(),
                    kind = %kind,
                    next = self.next(),
                    "Relayed ring pass"
                );
                self.send_to(kind, Payload::Points(acc), self.next());
                Ok(())
            }
            Err(err) => {
                self.send_error(kind, err.to_string(), item.from);
                Err(err)
            }
        }
    }
}
