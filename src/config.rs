//! Protocol configuration.
//!
//! One [`Config`] is built by the driver and shared read-only by every node
//! (usually as `Arc<Config>`). Nothing in the crate mutates it after
//! construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::MAX_BITS;

/// Default identifier width in bits.
pub const DEFAULT_BITS: usize = MAX_BITS;

/// Default Kademlia bucket size.
pub const DEFAULT_K: usize = 20;

/// Default relay fan-out.
pub const DEFAULT_ALPHA: usize = 3;

/// Default expected elements per bloom filter.
pub const DEFAULT_BLOOM_EXPECTED_ELEMENTS: usize = 1000;

/// Default bloom filter false-positive rate.
pub const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Default election shortlist size.
pub const DEFAULT_SHORTLIST_SIZE: usize = 5;

/// Default number of coordinator rotation slots.
pub const DEFAULT_ROTATION_WINDOW: usize = 5;

/// Linear weights over an access count and a distinct-peer count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityWeights {
    pub access_count: f64,
    pub unique_nodes: f64,
}

impl ActivityWeights {
    pub const fn new(access_count: f64, unique_nodes: f64) -> Self {
        Self {
            access_count,
            unique_nodes,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.access_count >= 0.0
            && self.unique_nodes >= 0.0
            && self.access_count.is_finite()
            && self.unique_nodes.is_finite()
    }
}

impl Default for ActivityWeights {
    fn default() -> Self {
        Self::new(0.6, 0.4)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier width in bits (1..=160).
    pub bits: usize,
    /// Bucket capacity.
    pub k: usize,
    /// Relay fan-out for index and lookup messages.
    pub alpha: usize,
    pub bloom_expected_elements: usize,
    pub bloom_false_positive_rate: f64,
    /// Number of top-scored nodes that enter the election.
    pub shortlist_size: usize,
    /// Length of the coordinator slot array, indexed by `cycle % rotation_window`.
    /// At least 2.
    pub rotation_window: usize,
    pub data_weights: ActivityWeights,
    pub node_weights: ActivityWeights,
    /// Seed shared by every node for the election selector.
    pub election_seed: u64,
    /// Cycles between longest-chain syncs run by the driver; 0 disables.
    pub ledger_sync_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bits: DEFAULT_BITS,
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            bloom_expected_elements: DEFAULT_BLOOM_EXPECTED_ELEMENTS,
            bloom_false_positive_rate: DEFAULT_BLOOM_FALSE_POSITIVE_RATE,
            shortlist_size: DEFAULT_SHORTLIST_SIZE,
            rotation_window: DEFAULT_ROTATION_WINDOW,
            data_weights: ActivityWeights::default(),
            node_weights: ActivityWeights::default(),
            election_seed: 0,
            ledger_sync_interval: DEFAULT_ROTATION_WINDOW as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("identifier width {0} is outside 1..=160")]
    BitsOutOfRange(usize),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("bloom false-positive rate {0} must lie strictly between 0 and 1")]
    FalsePositiveRate(f64),
    #[error("{0} weights must be finite and non-negative")]
    NegativeWeights(&'static str),
    #[error("rotation window {0} must hold at least 2 slots")]
    RotationWindowTooSmall(usize),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bits == 0 || self.bits > MAX_BITS {
            return Err(ConfigError::BitsOutOfRange(self.bits));
        }
        for (name, value) in [
            ("k", self.k),
            ("alpha", self.alpha),
            ("bloom_expected_elements", self.bloom_expected_elements),
            ("shortlist_size", self.shortlist_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        // A handoff activates the slot for the next cycle, which must differ
        // from the current one.
        if self.rotation_window < 2 {
            return Err(ConfigError::RotationWindowTooSmall(self.rotation_window));
        }
        let fpr = self.bloom_false_positive_rate;
        if !(fpr > 0.0 && fpr < 1.0) {
            return Err(ConfigError::FalsePositiveRate(fpr));
        }
        if !self.data_weights.is_valid() {
            return Err(ConfigError::NegativeWeights("data"));
        }
        if !self.node_weights.is_valid() {
            return Err(ConfigError::NegativeWeights("node"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.bits, 160);
        assert_eq!(config.k, 20);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.bloom_expected_elements, 1000);
        assert_eq!(config.shortlist_size, 5);
        assert_eq!(config.rotation_window, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config {
            bits: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::BitsOutOfRange(0)));

        config.bits = 64;
        config.alpha = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("alpha")));

        config.alpha = 3;
        config.bloom_false_positive_rate = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FalsePositiveRate(_))
        ));

        config.bloom_false_positive_rate = 0.05;
        config.data_weights = ActivityWeights::new(-0.1, 0.4);
        assert_eq!(config.validate(), Err(ConfigError::NegativeWeights("data")));
    }

    #[test]
    fn rotation_window_needs_two_slots() {
        for window in [0usize, 1] {
            let config = Config {
                rotation_window: window,
                ..Config::default()
            };
            assert_eq!(
                config.validate(),
                Err(ConfigError::RotationWindowTooSmall(window))
            );
        }
        let config = Config {
            rotation_window: 2,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
