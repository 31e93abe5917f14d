//! # Coordinator Election
//!
//! One round, run by the current coordinator:
//!
//! 1. **Collect**: pull a [`NodeReport`] from every peer in identifier
//!    order, which clears each peer's telemetry.
//! 2. **Shortlist**: sort by score (descending, ties by identifier), keep the
//!    top `shortlist_size`, then shuffle with the round seed.
//! 3. **Elect**: [`Elector::select_one`] over the shuffled shortlist.
//! 4. **Score**: data activity scores over the merged network aggregate.
//! 5. **Commit**: Merkle root of the per-node digests, package a block on the
//!    coordinator's tip, append it there and deliver it to every other node.
//! 6. **Handoff**: when the winner differs from the coordinator, activate the
//!    winner's slot for the next cycle and clear the coordinator's current slot.
//!
//! Score only decides shortlist membership; the shuffle discards its order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::identity::Identifier;
use crate::ledger::{Block, BlockData, LedgerError};
use crate::merkle::{merkle_root, Digest};
use crate::node::NodeReport;
use crate::protocols::{NoopSink, ObservabilitySink, PeerDirectory};
use crate::scoring::{data_activity_score, ScoringError};
use crate::telemetry::NodeMetrics;
use crate::vrf::{round_seed, shuffle_candidates, Elector, HashElector};

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("coordinator {0} is not in the peer directory")]
    UnknownCoordinator(Identifier),
    #[error("no candidates to elect from")]
    EmptyShortlist,
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Network-wide result of the collection step.
#[derive(Debug, Default, Clone)]
pub struct Collection {
    pub node_scores: BTreeMap<Identifier, f64>,
    pub node_metrics: BTreeMap<Identifier, NodeMetrics>,
    /// Merkle leaves, in identifier order.
    pub digests: Vec<Digest>,
    pub data_access_counts: BTreeMap<Identifier, u64>,
    pub data_access_nodes: BTreeMap<Identifier, BTreeSet<Identifier>>,
}

impl Collection {
    fn merge(&mut self, report: NodeReport) {
        self.node_scores.insert(report.id, report.score);
        self.digests.push(report.digest);
        for (data_id, count) in report.telemetry.data_access_counts() {
            *self.data_access_counts.entry(*data_id).or_insert(0) += count;
        }
        for (data_id, peers) in report.telemetry.data_access_nodes() {
            self.data_access_nodes
                .entry(*data_id)
                .or_default()
                .extend(peers.iter().copied());
        }
        self.node_metrics.insert(report.id, report.metrics);
    }

    /// Top `size` node ids by score, highest first; ties broken by id.
    pub fn shortlist(&self, size: usize) -> Vec<Identifier> {
        let mut ranked: Vec<(&Identifier, &f64)> = self.node_scores.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(size).map(|(id, _)| *id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ElectionOutcome {
    pub winner: Identifier,
    /// Shortlist in the order the elector saw it.
    pub candidates: Vec<Identifier>,
    pub block: Block,
    /// Peers that rejected the block.
    pub rejected_by: Vec<Identifier>,
    pub handed_off: bool,
}

#[derive(Clone)]
pub struct CoordinatorElection {
    config: Arc<Config>,
    elector: Arc<dyn Elector>,
    sink: Arc<dyn ObservabilitySink>,
}

impl std::fmt::Debug for CoordinatorElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorElection")
            .field("shortlist_size", &self.config.shortlist_size)
            .field("election_seed", &self.config.election_seed)
            .finish()
    }
}

impl CoordinatorElection {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            elector: Arc::new(HashElector),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_elector(mut self, elector: Arc<dyn Elector>) -> Self {
        self.elector = elector;
        self
    }

    /// Pull reports from every peer. Each peer's telemetry is cleared.
    pub fn collect(&self, directory: &mut dyn PeerDirectory) -> Collection {
        let mut collection = Collection::default();
        for id in directory.peer_ids() {
            let Some(node) = directory.resolve_mut(&id) else {
                debug!(peer = %id.short(), "peer vanished during collection");
                continue;
            };
            let report = node.report();
            self.sink.record_score(report.score);
            collection.merge(report);
        }
        collection
    }

    /// Run one full round on behalf of `coordinator` during `cycle`.
    pub fn run(
        &self,
        directory: &mut dyn PeerDirectory,
        coordinator: Identifier,
        cycle: u64,
    ) -> Result<ElectionOutcome, ElectionError> {
        let tip_hash = directory
            .resolve(&coordinator)
            .map(|node| node.ledger().tip_hash())
            .ok_or(ElectionError::UnknownCoordinator(coordinator))?;

        let collection = self.collect(directory);

        let seed = round_seed(self.config.election_seed, &tip_hash);
        let mut candidates = collection.shortlist(self.config.shortlist_size);
        shuffle_candidates(&mut candidates, &seed);
        let Some(winner) = self.elector.select_one(&candidates, &seed) else {
            warn!(
                coordinator = %coordinator.short(),
                cycle,
                "empty shortlist, skipping election"
            );
            return Err(ElectionError::EmptyShortlist);
        };

        let data_scores = data_activity_score(
            &collection.data_access_counts,
            &collection.data_access_nodes,
            self.config.data_weights,
        )?;

        let data = BlockData {
            merkle_root: merkle_root(&collection.digests),
            coordinator: Some(winner),
            candidates: candidates.clone(),
            data_scores,
            data_access_counts: collection.data_access_counts,
            data_access_nodes: collection.data_access_nodes,
            node_scores: collection.node_scores,
            node_metrics: collection.node_metrics,
        };

        let block = {
            let node = directory
                .resolve_mut(&coordinator)
                .ok_or(ElectionError::UnknownCoordinator(coordinator))?;
            let block = node.ledger().package(data)?;
            node.receive_block(&block)?;
            block
        };

        let mut rejected_by = Vec::new();
        for id in directory.peer_ids() {
            if id == coordinator {
                continue;
            }
            match directory.resolve_mut(&id) {
                Some(node) => {
                    if node.receive_block(&block).is_err() {
                        rejected_by.push(id);
                    }
                }
                None => debug!(peer = %id.short(), "cannot deliver block, peer unknown"),
            }
        }

        let handed_off = winner != coordinator;
        if handed_off {
            if let Some(next) = directory.resolve_mut(&winner) {
                next.set_coordinator(cycle + 1, true);
            }
            if let Some(current) = directory.resolve_mut(&coordinator) {
                current.set_coordinator(cycle, false);
            }
            self.sink.record_coordinator_switch();
        }

        info!(
            cycle,
            coordinator = %coordinator.short(),
            winner = %winner.short(),
            candidates = candidates.len(),
            height = block_height(directory, &coordinator),
            handed_off,
            "election complete"
        );

        Ok(ElectionOutcome {
            winner,
            candidates,
            block,
            rejected_by,
            handed_off,
        })
    }
}

fn block_height(directory: &dyn PeerDirectory, id: &Identifier) -> usize {
    directory
        .resolve(id)
        .map_or(0, |node| node.ledger().len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, LookupMessage};
    use crate::node::Node;

    struct Directory {
        nodes: BTreeMap<Identifier, Node>,
    }

    impl PeerDirectory for Directory {
        fn peer_ids(&self) -> Vec<Identifier> {
            self.nodes.keys().copied().collect()
        }

        fn resolve(&self, id: &Identifier) -> Option<&Node> {
            self.nodes.get(id)
        }

        fn resolve_mut(&mut self, id: &Identifier) -> Option<&mut Node> {
            self.nodes.get_mut(id)
        }
    }

    fn id(value: u64) -> Identifier {
        Identifier::from_u64(value)
    }

    fn config() -> Arc<Config> {
        Arc::new(Config {
            bits: 64,
            shortlist_size: 3,
            ..Config::default()
        })
    }

    fn directory(count: u64) -> Directory {
        let config = config();
        let nodes = (1..=count)
            .map(|value| (id(value), Node::new(id(value), config.clone()).unwrap()))
            .collect();
        Directory { nodes }
    }

    /// Node `value` serves `lookups` lookups, each for its own data id from its own peer.
    fn add_traffic(dir: &mut Directory, value: u64, lookups: u64) {
        let node = dir.nodes.get_mut(&id(value)).unwrap();
        let mut out: Vec<Envelope> = Vec::new();
        for peer in 0..lookups {
            let data_id = id(10_000 + value * 100 + peer);
            node.deliver(LookupMessage::new(data_id, id(500 + peer)).into());
        }
        node.advance(0, &mut out);
    }

    #[test]
    fn shortlist_orders_by_score_then_id() {
        let collection = Collection {
            node_scores: BTreeMap::from([(id(1), 1.0), (id(2), 3.0), (id(3), 3.0), (id(4), 0.5)]),
            ..Collection::default()
        };
        assert_eq!(collection.shortlist(3), vec![id(2), id(3), id(1)]);
        assert_eq!(collection.shortlist(10).len(), 4);
    }

    #[test]
    fn collection_sums_counts_and_unions_peers() {
        let mut dir = directory(2);
        for value in [1u64, 2] {
            let node = dir.nodes.get_mut(&id(value)).unwrap();
            node.deliver(LookupMessage::new(id(42), id(9)).into());
            node.advance(0, &mut Vec::<Envelope>::new());
        }
        let election = CoordinatorElection::new(config());
        let collection = election.collect(&mut dir);

        assert_eq!(collection.data_access_counts[&id(42)], 2);
        assert_eq!(collection.data_access_nodes[&id(42)].len(), 1);
        assert_eq!(collection.digests.len(), 2);
        assert!(dir.nodes.values().all(|n| n.router().telemetry().is_empty()));
    }

    #[test]
    fn election_commits_block_everywhere_and_hands_off() {
        let mut dir = directory(6);
        for value in 1..=6u64 {
            add_traffic(&mut dir, value, value);
        }
        let coordinator = id(1);
        dir.nodes.get_mut(&coordinator).unwrap().set_coordinator(0, true);

        let election = CoordinatorElection::new(config());
        let outcome = election.run(&mut dir, coordinator, 0).unwrap();

        assert_eq!(outcome.candidates.len(), 3);
        assert!(outcome.candidates.contains(&outcome.winner));
        // The three busiest nodes are 4, 5 and 6.
        let mut sorted = outcome.candidates.clone();
        sorted.sort();
        assert_eq!(sorted, vec![id(4), id(5), id(6)]);
        assert!(outcome.rejected_by.is_empty());

        for node in dir.nodes.values() {
            assert_eq!(node.ledger().len(), 2);
            assert_eq!(node.ledger().tip_hash(), outcome.block.hash);
            assert!(node.router().telemetry().is_empty());
        }
        assert_eq!(outcome.block.data.node_scores.len(), 6);
        assert_eq!(outcome.block.data.coordinator, Some(outcome.winner));

        assert!(outcome.handed_off, "winner comes from nodes 4..=6");
        assert!(dir.nodes[&outcome.winner].is_coordinator(1));
        assert!(!dir.nodes[&coordinator].is_coordinator(0));
    }

    #[test]
    fn identical_inputs_elect_identical_winners() {
        let run = || {
            let mut dir = directory(6);
            for value in 1..=6u64 {
                add_traffic(&mut dir, value, 7 - value);
            }
            CoordinatorElection::new(config())
                .run(&mut dir, id(3), 0)
                .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.winner, second.winner);
        assert_eq!(first.candidates, second.candidates);
        assert_eq!(first.block.hash, second.block.hash);
    }

    #[test]
    fn unknown_coordinator_is_an_error() {
        let mut dir = directory(2);
        let err = CoordinatorElection::new(config())
            .run(&mut dir, id(99), 0)
            .unwrap_err();
        assert!(matches!(err, ElectionError::UnknownCoordinator(_)));
    }

    #[test]
    fn empty_shortlist_emits_nothing() {
        /// Resolves nodes but enumerates none of them.
        struct Hidden(Directory);

        impl PeerDirectory for Hidden {
            fn peer_ids(&self) -> Vec<Identifier> {
                Vec::new()
            }

            fn resolve(&self, id: &Identifier) -> Option<&Node> {
                self.0.resolve(id)
            }

            fn resolve_mut(&mut self, id: &Identifier) -> Option<&mut Node> {
                self.0.resolve_mut(id)
            }
        }

        let mut hidden = Hidden(directory(3));
        let err = CoordinatorElection::new(config())
            .run(&mut hidden, id(1), 0)
            .unwrap_err();
        assert!(matches!(err, ElectionError::EmptyShortlist));
        assert!(hidden.0.nodes.values().all(|n| n.ledger().len() == 1));
    }

    #[test]
    fn single_node_re_elects_itself_without_handoff() {
        let mut dir = directory(1);
        dir.nodes.get_mut(&id(1)).unwrap().set_coordinator(0, true);
        let outcome = CoordinatorElection::new(config())
            .run(&mut dir, id(1), 0)
            .unwrap();
        assert_eq!(outcome.winner, id(1));
        assert!(!outcome.handed_off);
        assert!(dir.nodes[&id(1)].is_coordinator(0));
        assert!(!dir.nodes[&id(1)].is_coordinator(1));
    }
}
