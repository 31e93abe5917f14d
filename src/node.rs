//! # Node
//!
//! A [`Node`] bundles everything one participant owns:
//!
//! - **Router**: routing table, bloom index, local storage, handled-id sets,
//!   access telemetry and inbound queues
//! - **Ledger**: this node's replica of the score chain
//! - **Coordinator slots**: `rotation_window` flags indexed by `cycle % rotation_window`
//! - **Adopted data scores**: taken from the last block accepted
//!
//! Nodes never reach each other directly. Outbound messages go to an
//! [`Outbox`]; the driver resolves and delivers them.
//!
//! ## Quick Start
//!
//! ```ignore
//! let config = Arc::new(Config::default());
//! let mut node = Node::new(Identifier::from_u64(1), config)?;
//! node.add_neighbour(Identifier::from_u64(2));
//!
//! let mut out: Vec<Envelope> = Vec::new();
//! node.store_data(Identifier::from_u64(42), &mut out);
//! node.advance(0, &mut out);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, ConfigError};
use crate::identity::Identifier;
use crate::ledger::{Block, Ledger, LedgerError};
use crate::merkle::Digest;
use crate::messages::Message;
use crate::protocols::{NoopSink, ObservabilitySink, Outbox};
use crate::router::Router;
use crate::routing::BucketTouchOutcome;
use crate::scoring::{NodeScoring, ScoringError, WeightedNodeScore};
use crate::telemetry::{AccessTelemetry, NodeMetrics};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid scoring policy: {0}")]
    Scoring(#[from] ScoringError),
    #[error("ledger initialisation failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// What a node hands the coordinator during collection.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: Identifier,
    pub score: f64,
    pub metrics: NodeMetrics,
    /// Merkle leaf for this node.
    pub digest: Digest,
    pub telemetry: AccessTelemetry,
}

pub struct Node {
    id: Identifier,
    config: Arc<Config>,
    router: Router,
    ledger: Ledger,
    coordinator_slots: Vec<bool>,
    data_scores: BTreeMap<Identifier, f64>,
    node_score: f64,
    scoring: Arc<dyn NodeScoring>,
    last_election: Option<u64>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("router", &self.router)
            .field("ledger_len", &self.ledger.len())
            .field("coordinator_slots", &self.coordinator_slots)
            .field("node_score", &self.node_score)
            .finish()
    }
}

impl Node {
    /// Node with no observability; fails on an invalid `config`.
    pub fn new(id: Identifier, config: Arc<Config>) -> Result<Self, NodeError> {
        Self::with_sink(id, config, Arc::new(NoopSink))
    }

    /// Node reporting protocol statistics to `sink`.
    pub fn with_sink(
        id: Identifier,
        config: Arc<Config>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let scoring = Arc::new(WeightedNodeScore::new(config.node_weights)?);
        Ok(Self {
            id,
            router: Router::new(id, &config, sink),
            ledger: Ledger::new()?,
            coordinator_slots: vec![false; config.rotation_window],
            data_scores: BTreeMap::new(),
            node_score: 0.0,
            scoring,
            last_election: None,
            config,
        })
    }

    /// Replace the node scoring policy. Every node must use the same one.
    pub fn set_scoring(&mut self, scoring: Arc<dyn NodeScoring>) {
        self.scoring = scoring;
    }

    /// This node's identifier.
    pub fn id(&self) -> Identifier {
        self.id
    }

    /// Shared protocol configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Routing, indexing and lookup state.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Local replica of the score chain.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Data scores adopted from the last accepted block.
    pub fn data_scores(&self) -> &BTreeMap<Identifier, f64> {
        &self.data_scores
    }

    /// Score computed at the last report.
    pub fn node_score(&self) -> f64 {
        self.node_score
    }

    /// Insert or refresh a routing neighbour.
    pub fn add_neighbour(&mut self, peer: Identifier) -> BucketTouchOutcome {
        self.router.add_neighbour(peer)
    }

    /// Store `data_id` locally and announce it toward closer peers.
    pub fn store_data(&mut self, data_id: Identifier, out: &mut impl Outbox) {
        self.router.store_data(data_id, out);
    }

    /// Queue a lookup originating at this node.
    pub fn start_lookup(&mut self, data_id: Identifier) {
        self.router.start_lookup(data_id);
    }

    /// Queue an inbound message.
    pub fn deliver(&mut self, message: Message) {
        self.router.deliver(message);
    }

    /// Inbound messages not yet processed.
    pub fn pending(&self) -> usize {
        self.router.pending()
    }

    /// Drain every queued message for `cycle`.
    pub fn advance(&mut self, cycle: u64, out: &mut impl Outbox) -> usize {
        let processed = self.router.drain(out);
        if processed > 0 {
            debug!(node = %self.id.short(), cycle, processed, "drained inbound queues");
        }
        processed
    }

    /// Extract this round's telemetry and score it. Counters start over afterwards.
    pub fn report(&mut self) -> NodeReport {
        let telemetry = self.router.take_telemetry();
        self.node_score = self.scoring.score(&telemetry);
        let metrics = telemetry.metrics();
        NodeReport {
            id: self.id,
            score: self.node_score,
            digest: metrics.digest(),
            metrics,
            telemetry,
        }
    }

    /// Validate `block` against the local tip, append it and adopt its data scores.
    pub fn receive_block(&mut self, block: &Block) -> Result<(), LedgerError> {
        if let Err(err) = self.ledger.append(block.clone()) {
            warn!(
                node = %self.id.short(),
                block = %hex::encode(&block.hash[..8]),
                error = %err,
                "rejected block"
            );
            return Err(err);
        }
        self.data_scores = block.data.data_scores.clone();
        debug!(
            node = %self.id.short(),
            height = self.ledger.len() - 1,
            "accepted block"
        );
        Ok(())
    }

    /// Adopt `other` wholesale if it is strictly longer and valid.
    pub fn sync_ledger(&mut self, other: &Ledger) -> bool {
        if !self.ledger.replace_if_longer(other) {
            return false;
        }
        self.data_scores = self.ledger.tip().data.data_scores.clone();
        debug!(
            node = %self.id.short(),
            len = self.ledger.len(),
            "adopted longer ledger"
        );
        true
    }

    fn slot(&self, cycle: u64) -> usize {
        (cycle % self.coordinator_slots.len() as u64) as usize
    }

    /// True if this node holds the coordinator slot for `cycle`.
    pub fn is_coordinator(&self, cycle: u64) -> bool {
        self.coordinator_slots[self.slot(cycle)]
    }

    /// Set or clear the slot for `cycle % rotation_window`.
    pub fn set_coordinator(&mut self, cycle: u64, active: bool) {
        let slot = self.slot(cycle);
        self.coordinator_slots[slot] = active;
    }

    /// Claim the election for `cycle`. False if this node is not the
    /// coordinator or already ran one this cycle.
    pub fn begin_election(&mut self, cycle: u64) -> bool {
        if !self.is_coordinator(cycle) || self.last_election == Some(cycle) {
            return false;
        }
        self.last_election = Some(cycle);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BlockData;
    use crate::messages::Envelope;

    fn id(value: u64) -> Identifier {
        Identifier::from_u64(value)
    }

    fn node(value: u64) -> Node {
        let config = Arc::new(Config {
            bits: 64,
            ..Config::default()
        });
        Node::new(id(value), config).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Arc::new(Config {
            k: 0,
            ..Config::default()
        });
        let err = Node::new(id(1), config).unwrap_err();
        assert!(matches!(err, NodeError::Config(ConfigError::Zero("k"))));
    }

    #[test]
    fn coordinator_slots_follow_cycle_phase() {
        let mut n = node(1);
        assert!(!n.is_coordinator(0));
        n.set_coordinator(3, true);
        assert!(n.is_coordinator(3));
        assert!(n.is_coordinator(8), "slot repeats every rotation window");
        assert!(!n.is_coordinator(4));
        n.set_coordinator(13, false);
        assert!(!n.is_coordinator(3));
    }

    #[test]
    fn at_most_one_election_per_cycle() {
        let mut n = node(1);
        assert!(!n.begin_election(0), "not coordinator yet");
        n.set_coordinator(0, true);
        assert!(n.begin_election(0));
        assert!(!n.begin_election(0));
        assert!(n.begin_election(5));
    }

    #[test]
    fn report_scores_and_clears_telemetry() {
        let mut n = node(100);
        n.add_neighbour(id(1));
        n.start_lookup(id(0));
        let mut out: Vec<Envelope> = Vec::new();
        n.advance(0, &mut out);

        let report = n.report();
        assert_eq!(report.metrics.access_count, 1);
        assert!(report.score > 0.0);
        assert_eq!(n.node_score(), report.score);
        assert_eq!(report.digest, report.metrics.digest());

        let again = n.report();
        assert_eq!(again.metrics.access_count, 0);
        assert_eq!(again.score, 0.0);
    }

    #[test]
    fn receive_block_appends_and_adopts_scores() {
        let mut n = node(1);
        let data = BlockData {
            coordinator: Some(id(2)),
            data_scores: BTreeMap::from([(id(42), 1.5)]),
            ..BlockData::default()
        };
        let block = n.ledger().package(data).unwrap();
        n.receive_block(&block).unwrap();
        assert_eq!(n.ledger().len(), 2);
        assert_eq!(n.data_scores()[&id(42)], 1.5);

        // Same block again no longer extends the tip.
        assert!(n.receive_block(&block).is_err());
        assert_eq!(n.ledger().len(), 2);
    }

    #[test]
    fn tampered_block_leaves_ledger_unchanged() {
        let mut n = node(1);
        let mut block = n.ledger().package(BlockData::default()).unwrap();
        block.data.node_scores.insert(id(9), 99.0);
        assert!(matches!(
            n.receive_block(&block),
            Err(LedgerError::HashMismatch { .. })
        ));
        assert_eq!(n.ledger().len(), 1);
        assert!(n.data_scores().is_empty());
    }

    #[test]
    fn sync_adopts_longer_ledger_and_its_scores() {
        let mut leader = node(1);
        let data = BlockData {
            data_scores: BTreeMap::from([(id(7), 2.0)]),
            ..BlockData::default()
        };
        let block = leader.ledger().package(data).unwrap();
        leader.receive_block(&block).unwrap();

        let mut follower = node(2);
        assert!(follower.sync_ledger(leader.ledger()));
        assert_eq!(follower.ledger(), leader.ledger());
        assert_eq!(follower.data_scores()[&id(7)], 2.0);
        assert!(!follower.sync_ledger(leader.ledger()), "equal length is not adopted");
    }
}
