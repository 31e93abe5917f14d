//! # Index and Lookup Protocol
//!
//! Per-node state machine for the two message kinds:
//!
//! | Message | On receipt |
//! |---------|------------|
//! | Index | record sender in the bloom index, relay toward `data_id` once, note a terminal hop when no closer peer exists |
//! | Lookup | answer on a hit; otherwise jump backward to bloom-matched peers and, while still forward, relay toward `data_id` |
//!
//! Both protocols process a given `data_id` at most once per node, so
//! duplicate deliveries are silently absorbed.
//!
//! ## Direction of backward jumps
//!
//! Index messages always travel toward `data_id`, so every peer recorded in
//! the bloom index is at least as far from `data_id` as this node. Backward
//! jumps go to those peers, retracing the index trail toward the node that
//! stored the data. Matches closer to `data_id` than this node cannot lie on
//! such a trail and are skipped, which also rules out backward cycles.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::bloom::{BloomIndex, RecordOutcome};
use crate::config::Config;
use crate::identity::{distance_cmp, Identifier};
use crate::messages::{IndexMessage, LookupMessage, Message};
use crate::protocols::{HopKind, ObservabilitySink, Outbox, TrafficKind};
use crate::routing::{BucketTouchOutcome, RoutingTable};
use crate::telemetry::AccessTelemetry;

pub struct Router {
    id: Identifier,
    alpha: usize,
    routing: RoutingTable,
    bloom: BloomIndex,
    storage: BTreeSet<Identifier>,
    handled_lookups: HashSet<Identifier>,
    handled_index: HashSet<Identifier>,
    telemetry: AccessTelemetry,
    lookups: VecDeque<LookupMessage>,
    index: VecDeque<IndexMessage>,
    sink: Arc<dyn ObservabilitySink>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("neighbours", &self.routing.len())
            .field("stored", &self.storage.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Router {
    /// Empty router for `id`, sized from `config`.
    pub fn new(id: Identifier, config: &Config, sink: Arc<dyn ObservabilitySink>) -> Self {
        Self {
            id,
            alpha: config.alpha,
            routing: RoutingTable::new(id, config.k, config.bits),
            bloom: BloomIndex::new(
                config.bloom_expected_elements,
                config.bloom_false_positive_rate,
            ),
            storage: BTreeSet::new(),
            handled_lookups: HashSet::new(),
            handled_index: HashSet::new(),
            telemetry: AccessTelemetry::default(),
            lookups: VecDeque::new(),
            index: VecDeque::new(),
            sink,
        }
    }

    /// Identifier of the owning node.
    pub fn id(&self) -> Identifier {
        self.id
    }

    /// Insert or refresh `peer` in the routing table.
    pub fn add_neighbour(&mut self, peer: Identifier) -> BucketTouchOutcome {
        self.routing.add_neighbour(peer)
    }

    /// Read-only view of the k-bucket table.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    /// Per-peer filter chains recorded from index traffic.
    pub fn bloom_index(&self) -> &BloomIndex {
        &self.bloom
    }

    /// True if `data_id` was stored on this node.
    pub fn holds(&self, data_id: &Identifier) -> bool {
        self.storage.contains(data_id)
    }

    /// True once a lookup for `data_id` has been processed here.
    pub fn has_handled_lookup(&self, data_id: &Identifier) -> bool {
        self.handled_lookups.contains(data_id)
    }

    /// True once an index message for `data_id` has been processed here.
    pub fn has_handled_index(&self, data_id: &Identifier) -> bool {
        self.handled_index.contains(data_id)
    }

    /// Access telemetry accumulated since the last extraction.
    pub fn telemetry(&self) -> &AccessTelemetry {
        &self.telemetry
    }

    /// Extract this round's telemetry, leaving the counters empty.
    pub fn take_telemetry(&mut self) -> AccessTelemetry {
        self.telemetry.take()
    }

    /// Keep `data_id` locally and announce it toward its closest peers.
    pub fn store_data(&mut self, data_id: Identifier, out: &mut impl Outbox) {
        self.storage.insert(data_id);
        let msg = IndexMessage::new(data_id, self.id);
        let closer = self.get_closer_nodes(&data_id);
        debug!(
            node = %self.id.short(),
            data = %data_id.short(),
            fanout = closer.len(),
            "stored data, announcing index"
        );
        for peer in closer {
            out.enqueue(peer, msg.into());
        }
    }

    /// Queue a fresh lookup originating here; processed on the next drain.
    pub fn start_lookup(&mut self, data_id: Identifier) {
        self.lookups.push_back(LookupMessage::new(data_id, self.id));
    }

    /// Queue an inbound message for the next drain.
    pub fn deliver(&mut self, message: Message) {
        match message {
            Message::Lookup(msg) => self.lookups.push_back(msg),
            Message::Index(msg) => self.index.push_back(msg),
        }
    }

    /// Messages queued but not yet processed.
    pub fn pending(&self) -> usize {
        self.lookups.len() + self.index.len()
    }

    /// Process every queued message, lookups first. Returns how many were handled.
    pub fn drain(&mut self, out: &mut impl Outbox) -> usize {
        let mut processed = 0;
        while let Some(msg) = self.lookups.pop_front() {
            self.handle_lookup(&msg, out);
            processed += 1;
        }
        while let Some(msg) = self.index.pop_front() {
            self.handle_index(&msg, out);
            processed += 1;
        }
        processed
    }

    /// Process one lookup: answer a hit, else jump backward and relay forward.
    pub fn handle_lookup(&mut self, msg: &LookupMessage, out: &mut impl Outbox) {
        let data_id = msg.data_id();
        self.routing.add_neighbour(msg.from());
        self.sink.record_traffic(TrafficKind::Lookup, data_id);

        if !self.handled_lookups.insert(data_id) {
            trace!(
                node = %self.id.short(),
                data = %data_id.short(),
                "lookup already handled"
            );
            return;
        }
        self.telemetry.record(data_id, msg.from());

        if self.storage.contains(&data_id) {
            debug!(
                node = %self.id.short(),
                data = %data_id.short(),
                forward_hops = msg.forward_hops(),
                backward_hops = msg.backward_hops(),
                "lookup hit"
            );
            self.sink.record_hop(HopKind::SuccessForward, msg.forward_hops());
            self.sink.record_hop(HopKind::SuccessBackward, msg.backward_hops());
            self.sink.record_hop(HopKind::SuccessTotal, msg.total_hops());
            return;
        }

        let backward_targets: Vec<Identifier> = self
            .bloom
            .match_all(&data_id)
            .into_iter()
            .filter(|peer| *peer != self.id && !peer.is_closer_than(&self.id, &data_id))
            .collect();
        if !backward_targets.is_empty() {
            let back = msg.backward(self.id);
            trace!(
                node = %self.id.short(),
                data = %data_id.short(),
                targets = backward_targets.len(),
                "backward jump"
            );
            for peer in backward_targets {
                out.enqueue(peer, back.into());
            }
        }

        if msg.is_forward() {
            let next = msg.forward(self.id);
            for peer in self.get_closer_nodes(&data_id) {
                trace!(
                    node = %self.id.short(),
                    to = %peer.short(),
                    data = %data_id.short(),
                    "relay lookup"
                );
                out.enqueue(peer, next.into());
            }
        }
    }

    /// Record the sender for `data_id`, then relay toward it once or note a terminal hop.
    pub fn handle_index(&mut self, msg: &IndexMessage, out: &mut impl Outbox) {
        let data_id = msg.data_id();
        self.routing.add_neighbour(msg.from());
        self.sink.record_traffic(TrafficKind::Index, data_id);

        if self.bloom.record(msg.from(), &data_id) == RecordOutcome::AddedNewFilter {
            self.sink.record_filter_created();
        }

        if !self.handled_index.insert(data_id) {
            return;
        }

        let closer = self.get_closer_nodes(&data_id);
        if closer.is_empty() {
            debug!(
                node = %self.id.short(),
                data = %data_id.short(),
                hops = msg.hops(),
                "index reached closest node"
            );
            self.sink.record_hop(HopKind::IndexTerminal, msg.hops());
            return;
        }

        let relay = msg.relay(self.id);
        for peer in closer {
            trace!(
                node = %self.id.short(),
                to = %peer.short(),
                data = %data_id.short(),
                hops = relay.hops(),
                "relay index"
            );
            out.enqueue(peer, relay.into());
        }
    }

    /// Up to `alpha` known peers strictly closer to `target` than this node,
    /// nearest first. Empty means this node is locally closest.
    pub fn get_closer_nodes(&self, target: &Identifier) -> Vec<Identifier> {
        let own = self.id.xor_distance(target);
        let mut closer: Vec<Identifier> = self
            .routing
            .neighbours(target, self.alpha)
            .into_iter()
            .take_while(|peer| distance_cmp(&peer.xor_distance(target), &own) == Ordering::Less)
            .collect();
        closer.truncate(self.alpha);
        closer
    }
}
