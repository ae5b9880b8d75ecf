//! Message streams and the routing table behind them
//!
//! A [`MessageStream`] is a subscription to one message kind, optionally
//! narrowed to one sender. Inbound messages are pushed into every matching
//! subscription in arrival order and buffered until the owner reads them.

use crate::error::{ProtocolError, Result};
use crate::message::{Delivery, MessageKind, Payload, PlayerIndex};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

struct Route {
    id: u64,
    from: Option<PlayerIndex>,
    tx: UnboundedSender<Delivery>,
}

#[derive(Default)]
struct RoutingTable {
    next_id: u64,
    routes: HashMap<MessageKind, Vec<Route>>,
    closed: bool,
}

impl RoutingTable {
    fn remove(&mut self, kind: MessageKind, id: u64) {
        if let Some(list) = self.routes.get_mut(&kind) {
            list.retain(|route| route.id != id);
            if list.is_empty() {
                self.routes.remove(&kind);
            }
        }
    }
}

/// Per-engine routing table keyed by message kind.
#[derive(Clone, Default)]
pub(crate) struct Router {
    table: Arc<Mutex<RoutingTable>>,
}

impl Router {
    /// Register a stream for `kind`, from anyone or only from `from`.
    pub(crate) fn subscribe(&self, kind: MessageKind, from: Option<PlayerIndex>) -> MessageStream {
        let (tx, rx) = mpsc::unbounded();
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;

        // A closed router hands out streams that end immediately.
        if !table.closed {
            table
                .routes
                .entry(kind)
                .or_default()
                .push(Route { id, from, tx });
        }

        MessageStream {
            kind,
            from,
            id,
            rx,
            table: Arc::downgrade(&self.table),
            watching: true,
        }
    }

    /// Push a message into every matching stream. Returns how many matched.
    pub(crate) fn dispatch(&self, kind: MessageKind, payload: Payload, from: PlayerIndex) -> usize {
        let table = self.table.lock();
        let Some(list) = table.routes.get(&kind) else {
            return 0;
        };

        let mut delivered = 0;
        for route in list {
            if route.from.map_or(true, |only| only == from) {
                let delivery = Delivery {
                    payload: payload.clone(),
                    from,
                };
                if route.tx.unbounded_send(delivery).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Number of live streams for `kind`.
    pub(crate) fn route_count(&self, kind: MessageKind) -> usize {
        self.table.lock().routes.get(&kind).map_or(0, Vec::len)
    }

    /// Whether [`Router::close`] has run.
    pub(crate) fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    /// Drop every route so all streams end.
    pub(crate) fn close(&self) {
        let mut table = self.table.lock();
        table.closed = true;
        table.routes.clear();
    }
}

/// A subscription to one message kind.
pub struct MessageStream {
    kind: MessageKind,
    from: Option<PlayerIndex>,
    id: u64,
    rx: UnboundedReceiver<Delivery>,
    table: Weak<Mutex<RoutingTable>>,
    watching: bool,
}

impl MessageStream {
    /// Message kind this stream receives.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Sender filter, if any.
    pub fn from(&self) -> Option<PlayerIndex> {
        self.from
    }

    /// Whether the stream is still registered.
    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Stop receiving and leave the routing table. Already buffered
    /// deliveries can still be read. Calling this twice is harmless.
    pub fn unwatch(&mut self) {
        if !self.watching {
            return;
        }
        self.watching = false;
        if let Some(table) = self.table.upgrade() {
            table.lock().remove(self.kind, self.id);
        }
        self.rx.close();
    }

    /// Next delivery, or [`ProtocolError::StreamClosed`] once the stream ends.
    pub async fn next_delivery(&mut self) -> Result<Delivery> {
        self.next().await.ok_or(ProtocolError::StreamClosed)
    }
}

impl Stream for MessageStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.unwatch();
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("watching", &self.watching)
            .finish()
    }
}
