//! # Discrete-Cycle Simulation Driver
//!
//! [`Network`] owns every [`Node`] and advances them in lock-step:
//!
//! ```text
//! for each cycle:
//!     for each node in identifier order:
//!         drain its inbound queues, delivering outbound messages immediately
//!         if it holds the coordinator slot for this cycle, run one election
//!     every `ledger_sync_interval` cycles: longest-chain sync
//! ```
//!
//! Messages sent to a node later in identifier order are handled in the same
//! cycle; messages to earlier nodes wait for the next one. Queues are
//! unbounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::election::{CoordinatorElection, ElectionError, ElectionOutcome};
use crate::identity::Identifier;
use crate::messages::Envelope;
use crate::node::Node;
use crate::protocols::{ObservabilitySink, PeerDirectory};
use crate::telemetry::NetworkStats;

/// What happened during one call to [`Network::step`].
#[derive(Debug, Default)]
pub struct StepSummary {
    pub cycle: u64,
    pub processed: usize,
    pub elections: Vec<ElectionOutcome>,
    pub ledgers_synced: usize,
}

pub struct Network {
    config: Arc<Config>,
    nodes: BTreeMap<Identifier, Node>,
    cycle: u64,
    stats: Arc<NetworkStats>,
    election: CoordinatorElection,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.nodes.len())
            .field("cycle", &self.cycle)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Network {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        config.validate().context("invalid network configuration")?;
        let stats = Arc::new(NetworkStats::new());
        let sink: Arc<dyn ObservabilitySink> = stats.clone();
        let election = CoordinatorElection::new(config.clone()).with_sink(sink);
        Ok(Self {
            config,
            nodes: BTreeMap::new(),
            cycle: 0,
            stats,
            election,
        })
    }

    /// A network of `count` nodes with distinct random identifiers.
    pub fn with_random_nodes<R: Rng + ?Sized>(
        config: Arc<Config>,
        count: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let mut network = Self::new(config)?;
        while network.nodes.len() < count {
            let id = Identifier::random(rng, network.config.bits);
            if !network.nodes.contains_key(&id) {
                network.add_node(id)?;
            }
        }
        Ok(network)
    }

    pub fn add_node(&mut self, id: Identifier) -> Result<()> {
        if self.nodes.contains_key(&id) {
            bail!("node {} already exists", id.short());
        }
        let sink: Arc<dyn ObservabilitySink> = self.stats.clone();
        let node = Node::with_sink(id, self.config.clone(), sink)
            .with_context(|| format!("failed to create node {}", id.short()))?;
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Every node learns every other node, subject to bucket capacity.
    pub fn bootstrap_mesh(&mut self) {
        let ids: Vec<Identifier> = self.nodes.keys().copied().collect();
        for node in self.nodes.values_mut() {
            for peer in &ids {
                node.add_neighbour(*peer);
            }
        }
        debug!(nodes = ids.len(), "bootstrapped full mesh");
    }

    /// Give `id` the coordinator slot for the current cycle.
    pub fn designate_coordinator(&mut self, id: Identifier) -> Result<()> {
        let cycle = self.cycle;
        self.node_mut(&id)?.set_coordinator(cycle, true);
        info!(coordinator = %id.short(), cycle, "designated coordinator");
        Ok(())
    }

    pub fn store(&mut self, owner: Identifier, data_id: Identifier) -> Result<()> {
        let mut out: Vec<Envelope> = Vec::new();
        self.node_mut(&owner)?.store_data(data_id, &mut out);
        self.route(out);
        Ok(())
    }

    pub fn lookup(&mut self, origin: Identifier, data_id: Identifier) -> Result<()> {
        self.node_mut(&origin)?.start_lookup(data_id);
        Ok(())
    }

    fn node_mut(&mut self, id: &Identifier) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .with_context(|| format!("unknown node {}", id.short()))
    }

    fn route(&mut self, out: Vec<Envelope>) {
        for envelope in out {
            match self.nodes.get_mut(&envelope.to) {
                Some(node) => node.deliver(envelope.message),
                None => debug!(
                    from = %envelope.message.sender().short(),
                    to = %envelope.to.short(),
                    data = %envelope.message.data_id().short(),
                    "dropping message for unknown peer"
                ),
            }
        }
    }

    /// Run one cycle.
    pub fn step(&mut self) -> Result<StepSummary> {
        let cycle = self.cycle;
        let mut summary = StepSummary {
            cycle,
            ..StepSummary::default()
        };

        let ids: Vec<Identifier> = self.nodes.keys().copied().collect();
        for id in ids {
            let mut out: Vec<Envelope> = Vec::new();
            let elect = match self.nodes.get_mut(&id) {
                Some(node) => {
                    summary.processed += node.advance(cycle, &mut out);
                    node.begin_election(cycle)
                }
                None => false,
            };
            self.route(out);

            if elect {
                let election = self.election.clone();
                match election.run(self, id, cycle) {
                    Ok(outcome) => summary.elections.push(outcome),
                    Err(ElectionError::EmptyShortlist) => {
                        warn!(cycle, coordinator = %id.short(), "election skipped");
                    }
                    Err(err) => {
                        return Err(err).with_context(|| format!("election failed in cycle {cycle}"));
                    }
                }
            }
        }

        let interval = self.config.ledger_sync_interval;
        if interval > 0 && (cycle + 1) % interval == 0 {
            summary.ledgers_synced = self.sync_ledgers();
        }

        self.cycle += 1;
        Ok(summary)
    }

    pub fn run(&mut self, cycles: u64) -> Result<Vec<StepSummary>> {
        (0..cycles).map(|_| self.step()).collect()
    }

    /// Step until no message is queued anywhere, at most `max_cycles` times.
    /// Returns the number of cycles run.
    pub fn run_until_quiet(&mut self, max_cycles: u64) -> Result<u64> {
        let mut ran = 0;
        while ran < max_cycles && self.pending() > 0 {
            self.step()?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Replace every shorter ledger with the longest valid one.
    pub fn sync_ledgers(&mut self) -> usize {
        let Some(longest) = self
            .nodes
            .values()
            .map(Node::ledger)
            .filter(|ledger| ledger.verify().is_ok())
            .max_by_key(|ledger| ledger.len())
            .cloned()
        else {
            return 0;
        };
        let mut adopted = 0;
        for node in self.nodes.values_mut() {
            if node.sync_ledger(&longest) {
                adopted += 1;
            }
        }
        if adopted > 0 {
            info!(adopted, len = longest.len(), "ledger sync");
        }
        adopted
    }

    pub fn pending(&self) -> usize {
        self.nodes.values().map(Node::pending).sum()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn stats(&self) -> &Arc<NetworkStats> {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &Identifier) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes holding the coordinator slot for the current cycle.
    pub fn coordinators(&self) -> Vec<Identifier> {
        self.nodes
            .values()
            .filter(|node| node.is_coordinator(self.cycle))
            .map(Node::id)
            .collect()
    }
}

impl PeerDirectory for Network {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::HopKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> Arc<Config> {
        Arc::new(Config {
            bits: 64,
            ..Config::default()
        })
    }

    #[test]
    fn random_network_has_distinct_nodes() {
        let mut rng = StdRng::seed_from_u64(1);
        let network = Network::with_random_nodes(small_config(), 30, &mut rng).unwrap();
        assert_eq!(network.len(), 30);
    }

    #[test]
    fn duplicate_node_is_refused() {
        let mut network = Network::new(small_config()).unwrap();
        network.add_node(Identifier::from_u64(1)).unwrap();
        assert!(network.add_node(Identifier::from_u64(1)).is_err());
    }

    #[test]
    fn unknown_origin_is_an_error() {
        let mut network = Network::new(small_config()).unwrap();
        assert!(network.lookup(Identifier::from_u64(5), Identifier::from_u64(42)).is_err());
        assert!(network.designate_coordinator(Identifier::from_u64(5)).is_err());
    }

    #[test]
    fn messages_to_unknown_peers_are_dropped() {
        let mut network = Network::new(small_config()).unwrap();
        let owner = Identifier::from_u64(100);
        network.add_node(owner).unwrap();
        // Known to the owner's routing table, but not part of the network.
        network.nodes.get_mut(&owner).unwrap().add_neighbour(Identifier::from_u64(1));
        network.store(owner, Identifier::from_u64(0)).unwrap();
        assert_eq!(network.pending(), 0);
    }

    #[test]
    fn step_advances_cycle_and_quiesces() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut network = Network::with_random_nodes(small_config(), 20, &mut rng).unwrap();
        network.bootstrap_mesh();
        // The largest identifier is never the closest to a small data id.
        let owner = *network.nodes.keys().next_back().unwrap();
        network.store(owner, Identifier::from_u64(42)).unwrap();

        let ran = network.run_until_quiet(50).unwrap();
        assert!(ran >= 1);
        assert_eq!(network.pending(), 0);
        assert_eq!(network.cycle(), ran);
    }

    #[test]
    fn single_slot_rotation_is_refused() {
        let config = Arc::new(Config {
            bits: 64,
            rotation_window: 1,
            ..Config::default()
        });
        assert!(Network::new(config).is_err());
    }

    #[test]
    fn at_most_one_election_per_cycle() {
        let mut rng = StdRng::seed_from_u64(4);
        let config = Arc::new(Config {
            bits: 64,
            rotation_window: 2,
            ..Config::default()
        });
        let mut network = Network::with_random_nodes(config, 10, &mut rng).unwrap();
        network.bootstrap_mesh();
        let first = *network.nodes.keys().next().unwrap();
        network.designate_coordinator(first).unwrap();

        let mut total = 0;
        for _ in 0..10 {
            let summary = network.step().unwrap();
            assert!(
                summary.elections.len() <= 1,
                "cycle {} ran {} elections",
                summary.cycle,
                summary.elections.len()
            );
            total += summary.elections.len();
            if let Some(outcome) = summary.elections.first() {
                if outcome.handed_off {
                    let winner = &network.nodes[&outcome.winner];
                    assert!(!winner.is_coordinator(summary.cycle));
                    assert!(winner.is_coordinator(summary.cycle + 1));
                }
            }
            assert!(network.coordinators().len() <= 1);
        }
        assert!(total >= 1);
    }

    #[test]
    fn index_hop_count_matches_relay_chain() {
        // 8 -> 4 -> 2 -> 1 toward data id 0; each node only knows the next one.
        let mut network = Network::new(small_config()).unwrap();
        let chain = [8u64, 4, 2, 1].map(Identifier::from_u64);
        for id in chain {
            network.add_node(id).unwrap();
        }
        for pair in chain.windows(2) {
            network.nodes.get_mut(&pair[0]).unwrap().add_neighbour(pair[1]);
        }

        let before = network.stats().hop_stats(HopKind::IndexTerminal).n;
        network.store(chain[0], Identifier::ZERO).unwrap();
        network.run_until_quiet(20).unwrap();

        let terminal = network.stats().hop_stats(HopKind::IndexTerminal);
        assert_eq!(terminal.n, before + 1);
        assert_eq!(terminal.max, 3.0, "three relays from owner to closest node");
        assert!(network.nodes[&chain[3]].router().has_handled_index(&Identifier::ZERO));
    }

    #[test]
    fn coordinator_runs_election_and_hands_off() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut network = Network::with_random_nodes(small_config(), 10, &mut rng).unwrap();
        network.bootstrap_mesh();
        let first = *network.nodes.keys().next().unwrap();
        network.designate_coordinator(first).unwrap();

        let summary = network.step().unwrap();
        assert_eq!(summary.elections.len(), 1);
        let outcome = &summary.elections[0];
        assert!(network.nodes().all(|node| node.ledger().len() == 2));
        if outcome.handed_off {
            assert_eq!(network.coordinators(), vec![outcome.winner]);
            assert_eq!(network.stats().coordinator_switches(), 1);
        }
    }
}
