//! # Access Telemetry and Network Statistics
//!
//! Two unrelated kinds of bookkeeping live here:
//!
//! | Type | Owner | Lifetime |
//! |------|-------|----------|
//! | [`AccessTelemetry`] | one per node | accumulated every cycle, extracted once per election round |
//! | [`NetworkStats`] | the driver | whole run; an [`ObservabilitySink`] shared by every node |
//!
//! Telemetry feeds scoring and ends up in ledger blocks. Network statistics
//! never influence protocol behaviour.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::identity::Identifier;
use crate::merkle::Digest;
use crate::protocols::{HopKind, ObservabilitySink, TrafficKind};

/// Lookup traffic seen by one node since the last extraction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccessTelemetry {
    access_count: u64,
    accessing_nodes: BTreeSet<Identifier>,
    data_access_counts: BTreeMap<Identifier, u64>,
    data_access_nodes: BTreeMap<Identifier, BTreeSet<Identifier>>,
}

impl AccessTelemetry {
    pub fn record(&mut self, data_id: Identifier, from: Identifier) {
        self.access_count += 1;
        self.accessing_nodes.insert(from);
        *self.data_access_counts.entry(data_id).or_insert(0) += 1;
        self.data_access_nodes.entry(data_id).or_default().insert(from);
    }

    /// Hand back everything recorded so far and start from empty.
    pub fn take(&mut self) -> AccessTelemetry {
        std::mem::take(self)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn unique_access_nodes(&self) -> usize {
        self.accessing_nodes.len()
    }

    pub fn data_access_counts(&self) -> &BTreeMap<Identifier, u64> {
        &self.data_access_counts
    }

    pub fn data_access_nodes(&self) -> &BTreeMap<Identifier, BTreeSet<Identifier>> {
        &self.data_access_nodes
    }

    pub fn is_empty(&self) -> bool {
        self.access_count == 0
    }

    pub fn metrics(&self) -> NodeMetrics {
        NodeMetrics {
            access_count: self.access_count,
            unique_access_nodes: self.accessing_nodes.len() as u64,
            data_access_counts: self.data_access_counts.clone(),
        }
    }
}

/// Raw per-node metrics committed into a block.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub access_count: u64,
    pub unique_access_nodes: u64,
    pub data_access_counts: BTreeMap<Identifier, u64>,
}

impl NodeMetrics {
    /// Content digest used as a Merkle leaf.
    pub fn digest(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.access_count.to_le_bytes());
        hasher.update(&self.unique_access_nodes.to_le_bytes());
        hasher.update(&(self.data_access_counts.len() as u64).to_le_bytes());
        for (data_id, count) in &self.data_access_counts {
            hasher.update(data_id.as_bytes());
            hasher.update(&count.to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }
}

/// Count, sum, min and max of a stream of observations.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunningStats {
    pub n: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStats {
    pub fn add(&mut self, value: f64) {
        if self.n == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.n += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    hops: BTreeMap<HopKind, RunningStats>,
    scores: RunningStats,
    traffic: BTreeMap<TrafficKind, u64>,
    data_traffic: BTreeMap<Identifier, u64>,
    filters_created: u64,
    coordinator_switches: u64,
}

/// Aggregating [`ObservabilitySink`] for a whole simulated network.
#[derive(Debug, Default)]
pub struct NetworkStats {
    inner: Mutex<StatsInner>,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hop_stats(&self, kind: HopKind) -> RunningStats {
        self.inner.lock().hops.get(&kind).copied().unwrap_or_default()
    }

    pub fn score_stats(&self) -> RunningStats {
        self.inner.lock().scores
    }

    pub fn traffic(&self, kind: TrafficKind) -> u64 {
        self.inner.lock().traffic.get(&kind).copied().unwrap_or(0)
    }

    pub fn data_traffic(&self, data_id: &Identifier) -> u64 {
        self.inner.lock().data_traffic.get(data_id).copied().unwrap_or(0)
    }

    pub fn filters_created(&self) -> u64 {
        self.inner.lock().filters_created
    }

    pub fn coordinator_switches(&self) -> u64 {
        self.inner.lock().coordinator_switches
    }
}

impl ObservabilitySink for NetworkStats {
    fn record_hop(&self, kind: HopKind, count: u32) {
        self.inner.lock().hops.entry(kind).or_default().add(count as f64);
    }

    fn record_score(&self, value: f64) {
        self.inner.lock().scores.add(value);
    }

    fn record_traffic(&self, kind: TrafficKind, data_id: Identifier) {
        let mut inner = self.inner.lock();
        *inner.traffic.entry(kind).or_insert(0) += 1;
        *inner.data_traffic.entry(data_id).or_insert(0) += 1;
    }

    fn record_filter_created(&self) {
        self.inner.lock().filters_created += 1;
    }

    fn record_coordinator_switch(&self) {
        self.inner.lock().coordinator_switches += 1;
    }
}
