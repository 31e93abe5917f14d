//! Activity scoring.
//!
//! Pure functions of their inputs: every node that sees the same telemetry
//! computes bit-identical scores, which the election relies on.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::ActivityWeights;
use crate::identity::Identifier;
use crate::telemetry::AccessTelemetry;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("{which} weight must be finite and non-negative, got {value}")]
    InvalidWeight { which: &'static str, value: f64 },
}

fn check_weights(weights: ActivityWeights) -> Result<(), ScoringError> {
    for (which, value) in [
        ("access count", weights.access_count),
        ("unique nodes", weights.unique_nodes),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(ScoringError::InvalidWeight { which, value });
        }
    }
    Ok(())
}

/// `access_count * count + unique_nodes * |accessing peers|` for every data id
/// present in either map.
pub fn data_activity_score(
    access_counts: &BTreeMap<Identifier, u64>,
    access_nodes: &BTreeMap<Identifier, BTreeSet<Identifier>>,
    weights: ActivityWeights,
) -> Result<BTreeMap<Identifier, f64>, ScoringError> {
    check_weights(weights)?;
    let ids: BTreeSet<&Identifier> = access_counts.keys().chain(access_nodes.keys()).collect();
    Ok(ids
        .into_iter()
        .map(|data_id| {
            let count = access_counts.get(data_id).copied().unwrap_or(0) as f64;
            let unique = access_nodes.get(data_id).map_or(0, BTreeSet::len) as f64;
            (
                *data_id,
                weights.access_count * count + weights.unique_nodes * unique,
            )
        })
        .collect())
}

/// Policy turning one node's round telemetry into its election score.
///
/// Implementations must be deterministic and non-decreasing in both access
/// volume and distinct-peer breadth.
pub trait NodeScoring: Send + Sync {
    fn score(&self, telemetry: &AccessTelemetry) -> f64;
}

/// Linear combination of access count and distinct accessing peers.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WeightedNodeScore {
    weights: ActivityWeights,
}

impl WeightedNodeScore {
    pub fn new(weights: ActivityWeights) -> Result<Self, ScoringError> {
        check_weights(weights)?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> ActivityWeights {
        self.weights
    }
}

impl NodeScoring for WeightedNodeScore {
    fn score(&self, telemetry: &AccessTelemetry) -> f64 {
        self.weights.access_count * telemetry.access_count() as f64
            + self.weights.unique_nodes * telemetry.unique_access_nodes() as f64
    }
}
