//! Trait seams between the protocol core and whatever drives it.
//!
//! ## Protocol Traits
//!
//! | Seam | Trait | Purpose |
//! |------|-------|---------|
//! | Outbound | [`Outbox`] | collect relays produced while handling a message |
//! | Peers | [`PeerDirectory`] | resolve a peer id to its node, used by elections and the driver |
//! | Stats | [`ObservabilitySink`] | hop counts, scores, traffic and coordinator switches |
//!
//! The core never enumerates a global node list and never writes to global
//! counters; it only talks to these traits.

use crate::identity::Identifier;
use crate::messages::{Envelope, Message};
use crate::node::Node;

/// Destination for messages produced while handling inbound traffic.
pub trait Outbox {
    fn enqueue(&mut self, to: Identifier, message: Message);
}

impl Outbox for Vec<Envelope> {
    fn enqueue(&mut self, to: Identifier, message: Message) {
        self.push(Envelope { to, message });
    }
}

/// Resolves peer identifiers to node state.
pub trait PeerDirectory {
    /// Every known peer, in identifier order.
    fn peer_ids(&self) -> Vec<Identifier>;

    fn resolve(&self, id: &Identifier) -> Option<&Node>;

    fn resolve_mut(&mut self, id: &Identifier) -> Option<&mut Node>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HopKind {
    /// Index message reached a node with no closer peer.
    IndexTerminal,
    SuccessForward,
    SuccessBackward,
    SuccessTotal,
}

impl HopKind {
    pub const ALL: [HopKind; 4] = [
        HopKind::IndexTerminal,
        HopKind::SuccessForward,
        HopKind::SuccessBackward,
        HopKind::SuccessTotal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HopKind::IndexTerminal => "index_terminal",
            HopKind::SuccessForward => "success_forward",
            HopKind::SuccessBackward => "success_backward",
            HopKind::SuccessTotal => "success_total",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrafficKind {
    Lookup,
    Index,
}

/// Sink for protocol statistics. Every method defaults to a no-op.
pub trait ObservabilitySink: Send + Sync {
    fn record_hop(&self, _kind: HopKind, _count: u32) {}

    fn record_score(&self, _value: f64) {}

    fn record_traffic(&self, _kind: TrafficKind, _data_id: Identifier) {}

    fn record_filter_created(&self) {}

    fn record_coordinator_switch(&self) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {}
