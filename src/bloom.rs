//! # Bloom Filter Index
//!
//! Reverse-path index: for every remote peer that forwarded an index message
//! through this node, remember which data identifiers that peer has (directly
//! or transitively) indexed.
//!
//! Each peer owns an append-only chain of probabilistic filters. A data id is
//! contained for the peer if any filter in the chain reports positive. A new
//! filter is appended only once every existing filter has reached its
//! expected capacity; filters are never removed or reset.
//!
//! Membership is one-sided: false positives cost an extra backward probe,
//! false negatives never happen.

use std::collections::BTreeMap;

use crate::identity::Identifier;

/// Probabilistic set membership with no false negatives.
pub trait ProbabilisticSet {
    fn with_rate(expected_elements: usize, false_positive_rate: f64) -> Self
    where
        Self: Sized;

    fn insert(&mut self, id: &Identifier);

    fn contains(&self, id: &Identifier) -> bool;

    fn estimated_population(&self) -> usize;

    fn expected_elements(&self) -> usize;
}

/// Classic bit-array bloom filter using blake3 double hashing.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
    expected_elements: usize,
}

impl BloomFilter {
    fn bit_positions(&self, id: &Identifier) -> impl Iterator<Item = usize> + '_ {
        let digest = blake3::hash(id.as_bytes());
        let bytes = digest.as_bytes();
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[0..8]);
        hi.copy_from_slice(&bytes[8..16]);
        let h1 = u64::from_le_bytes(lo);
        // Odd step so successive probes never collapse onto one bit.
        let h2 = u64::from_le_bytes(hi) | 1;
        let m = self.num_bits as u64;
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    fn set_bits(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}

impl ProbabilisticSet for BloomFilter {
    fn with_rate(expected_elements: usize, false_positive_rate: f64) -> Self {
        let n = expected_elements.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as usize;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
            expected_elements: expected_elements.max(1),
        }
    }

    fn insert(&mut self, id: &Identifier) {
        let positions: Vec<usize> = self.bit_positions(id).collect();
        for pos in positions {
            self.bits[pos / 64] |= 1u64 << (pos % 64);
        }
    }

    fn contains(&self, id: &Identifier) -> bool {
        self.bit_positions(id)
            .all(|pos| self.bits[pos / 64] & (1u64 << (pos % 64)) != 0)
    }

    /// Swamidass-Baldi estimate from the fraction of set bits.
    fn estimated_population(&self) -> usize {
        let m = self.num_bits as f64;
        let x = self.set_bits() as f64;
        if x >= m {
            return usize::MAX;
        }
        let k = self.num_hashes as f64;
        (-(m / k) * (1.0 - x / m).ln()).round() as usize
    }

    fn expected_elements(&self) -> usize {
        self.expected_elements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Already contained; nothing written.
    Duplicate,
    Added,
    /// Every existing filter was at capacity, so a fresh one was appended.
    AddedNewFilter,
}

/// Per-peer filter chains, iterated in identifier order.
#[derive(Debug, Clone)]
pub struct BloomIndex<F: ProbabilisticSet = BloomFilter> {
    expected_elements: usize,
    false_positive_rate: f64,
    peers: BTreeMap<Identifier, Vec<F>>,
}

impl<F: ProbabilisticSet> BloomIndex<F> {
    pub fn new(expected_elements: usize, false_positive_rate: f64) -> Self {
        Self {
            expected_elements,
            false_positive_rate,
            peers: BTreeMap::new(),
        }
    }

    /// Remember that `peer` indexed `data_id`. Idempotent.
    pub fn record(&mut self, peer: Identifier, data_id: &Identifier) -> RecordOutcome {
        let chain = self.peers.entry(peer).or_default();
        if chain.iter().any(|f| f.contains(data_id)) {
            return RecordOutcome::Duplicate;
        }
        if let Some(filter) = chain
            .iter_mut()
            .find(|f| f.estimated_population() < f.expected_elements())
        {
            filter.insert(data_id);
            return RecordOutcome::Added;
        }
        let mut filter = F::with_rate(self.expected_elements, self.false_positive_rate);
        filter.insert(data_id);
        chain.push(filter);
        RecordOutcome::AddedNewFilter
    }

    pub fn contains(&self, peer: &Identifier, data_id: &Identifier) -> bool {
        self.peers
            .get(peer)
            .is_some_and(|chain| chain.iter().any(|f| f.contains(data_id)))
    }

    /// Every known peer whose filter chain reports `data_id`.
    pub fn match_all(&self, data_id: &Identifier) -> Vec<Identifier> {
        self.peers
            .iter()
            .filter(|(_, chain)| chain.iter().any(|f| f.contains(data_id)))
            .map(|(peer, _)| *peer)
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn filter_count(&self, peer: &Identifier) -> usize {
        self.peers.get(peer).map_or(0, Vec::len)
    }

    pub fn total_filters(&self) -> usize {
        self.peers.values().map(Vec::len).sum()
    }
}
