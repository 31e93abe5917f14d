//! # Hash-Chained Ledger
//!
//! Every node keeps its own replica. Blocks commit one election round:
//!
//! ```text
//! hash(block) = blake3(previous_hash ‖ bincode(data))
//! ```
//!
//! | Rule | Where |
//! |------|-------|
//! | stored hash must recompute | [`Ledger::validate_incoming`], [`Ledger::verify`] |
//! | `previous_hash` must equal the tip | [`Ledger::validate_incoming`] |
//! | a longer valid chain replaces ours wholesale | [`Ledger::replace_if_longer`] |
//!
//! All maps in [`BlockData`] are ordered, so two nodes encoding the same
//! round produce the same bytes and the same hash.

use std::collections::{BTreeMap, BTreeSet};

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identifier;
use crate::merkle::{hash_parts, Digest, ZERO_DIGEST};
use crate::telemetry::NodeMetrics;

/// Upper bound on an encoded block accepted from a peer.
pub const MAX_BLOCK_BYTES: u64 = 16 * 1024 * 1024;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_BLOCK_BYTES)
        .with_fixint_encoding()
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("block encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("block hash mismatch: stored {}, computed {}", hex::encode(.stored), hex::encode(.computed))]
    HashMismatch { stored: Digest, computed: Digest },
    #[error("block does not extend the tip: previous {}, tip {}", hex::encode(.previous), hex::encode(.tip))]
    BrokenLink { previous: Digest, tip: Digest },
    #[error("block {index} is invalid: {source}")]
    InvalidChain {
        index: usize,
        #[source]
        source: Box<LedgerError>,
    },
}

/// Snapshot of one election round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub merkle_root: Digest,
    /// `None` only in the genesis block.
    pub coordinator: Option<Identifier>,
    pub candidates: Vec<Identifier>,
    pub data_scores: BTreeMap<Identifier, f64>,
    pub data_access_counts: BTreeMap<Identifier, u64>,
    pub data_access_nodes: BTreeMap<Identifier, BTreeSet<Identifier>>,
    pub node_scores: BTreeMap<Identifier, f64>,
    pub node_metrics: BTreeMap<Identifier, NodeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub previous_hash: Digest,
    pub data: BlockData,
    pub hash: Digest,
}

impl Block {
    /// Seal `data` on top of `previous_hash`.
    pub fn new(previous_hash: Digest, data: BlockData) -> Result<Self, LedgerError> {
        let hash = Self::compute_hash(&previous_hash, &data)?;
        Ok(Self {
            previous_hash,
            data,
            hash,
        })
    }

    pub fn genesis() -> Result<Self, LedgerError> {
        Self::new(ZERO_DIGEST, BlockData::default())
    }

    pub fn compute_hash(previous_hash: &Digest, data: &BlockData) -> Result<Digest, LedgerError> {
        let payload = bincode_options().serialize(data)?;
        Ok(hash_parts(&[previous_hash.as_slice(), payload.as_slice()]))
    }

    /// Recompute the hash and compare it with the stored one.
    pub fn check_hash(&self) -> Result<(), LedgerError> {
        let computed = Self::compute_hash(&self.previous_hash, &self.data)?;
        if computed != self.hash {
            return Err(LedgerError::HashMismatch {
                stored: self.hash,
                computed,
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(bincode_options().serialize(self)?)
    }

    /// Decode a block, refusing anything larger than [`MAX_BLOCK_BYTES`].
    /// The hash is not checked here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        Ok(bincode_options().deserialize(bytes)?)
    }
}

/// Ordered chain of blocks, genesis first. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    blocks: Vec<Block>,
}

#[allow(clippy::len_without_is_empty)]
impl Ledger {
    pub fn new() -> Result<Self, LedgerError> {
        Ok(Self {
            blocks: vec![Block::genesis()?],
        })
    }

    /// Wrap blocks received from elsewhere without checking them.
    /// Returns `None` for an empty list.
    pub fn from_blocks(blocks: Vec<Block>) -> Option<Self> {
        if blocks.is_empty() {
            None
        } else {
            Some(Self { blocks })
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tip(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_hash(&self) -> Digest {
        self.tip().hash
    }

    /// Build a block extending the current tip. Does not append it.
    pub fn package(&self, data: BlockData) -> Result<Block, LedgerError> {
        Block::new(self.tip_hash(), data)
    }

    pub fn validate_incoming(&self, block: &Block) -> Result<(), LedgerError> {
        block.check_hash()?;
        let tip = self.tip_hash();
        if block.previous_hash != tip {
            return Err(LedgerError::BrokenLink {
                previous: block.previous_hash,
                tip,
            });
        }
        Ok(())
    }

    /// Validate `block` against the tip and append it.
    pub fn append(&mut self, block: Block) -> Result<(), LedgerError> {
        self.validate_incoming(&block)?;
        self.blocks.push(block);
        Ok(())
    }

    /// Index of the first block whose hash or link is wrong. Every block from
    /// that index on is considered invalid.
    pub fn first_invalid(&self) -> Option<usize> {
        self.check_chain().err().map(|(index, _)| index)
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        self.check_chain()
            .map_err(|(index, source)| LedgerError::InvalidChain {
                index,
                source: Box::new(source),
            })
    }

    fn check_chain(&self) -> Result<(), (usize, LedgerError)> {
        let mut expected_previous = ZERO_DIGEST;
        for (index, block) in self.blocks.iter().enumerate() {
            if block.previous_hash != expected_previous {
                return Err((
                    index,
                    LedgerError::BrokenLink {
                        previous: block.previous_hash,
                        tip: expected_previous,
                    },
                ));
            }
            block.check_hash().map_err(|err| (index, err))?;
            expected_previous = block.hash;
        }
        Ok(())
    }

    /// Adopt `other` if it is strictly longer and verifies end to end.
    pub fn replace_if_longer(&mut self, other: &Ledger) -> bool {
        if other.len() <= self.len() || other.verify().is_err() {
            return false;
        }
        self.blocks = other.blocks.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(n: u64) -> BlockData {
        let coordinator = Identifier::from_u64(n);
        BlockData {
            merkle_root: crate::merkle::hash_bytes(&n.to_le_bytes()),
            coordinator: Some(coordinator),
            candidates: vec![coordinator, Identifier::from_u64(n + 100)],
            data_scores: BTreeMap::from([(Identifier::from_u64(42), n as f64 * 0.6)]),
            data_access_counts: BTreeMap::from([(Identifier::from_u64(42), n)]),
            ..BlockData::default()
        }
    }

    fn chain(rounds: u64) -> Ledger {
        let mut ledger = Ledger::new().unwrap();
        for n in 1..=rounds {
            let block = ledger.package(round(n)).unwrap();
            ledger.append(block).unwrap();
        }
        ledger
    }

    #[test]
    fn genesis_is_shared_by_independent_ledgers() {
        let a = Ledger::new().unwrap();
        let b = Ledger::new().unwrap();
        assert_eq!(a.tip_hash(), b.tip_hash());
        assert_eq!(a.len(), 1);
        assert_eq!(a.tip().previous_hash, ZERO_DIGEST);
    }

    #[test]
    fn appended_blocks_link_to_predecessors() {
        let ledger = chain(4);
        assert_eq!(ledger.len(), 5);
        for pair in ledger.blocks().windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
        }
        assert!(ledger.verify().is_ok());
        assert_eq!(ledger.first_invalid(), None);
    }

    #[test]
    fn mutated_payload_is_rejected() {
        let mut ledger = chain(1);
        let mut block = ledger.package(round(2)).unwrap();
        block.data.candidates.push(Identifier::from_u64(999));

        let err = ledger.append(block).unwrap_err();
        assert!(matches!(err, LedgerError::HashMismatch { .. }), "got {err}");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn block_not_on_tip_is_rejected() {
        let mut ledger = chain(2);
        let stale = Block::new(ledger.blocks()[1].previous_hash, round(9)).unwrap();
        let err = ledger.append(stale).unwrap_err();
        assert!(matches!(err, LedgerError::BrokenLink { .. }), "got {err}");
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn corrupted_byte_invalidates_block_and_descendants() {
        let ledger = chain(4);
        let mut bytes = ledger.blocks()[2].to_bytes().unwrap();
        // previous_hash is the first 32 bytes, the merkle root the next 32.
        bytes[32 + 5] ^= 0x01;
        let corrupted = Block::from_bytes(&bytes).unwrap();

        let mut blocks = ledger.blocks().to_vec();
        blocks[2] = corrupted.clone();
        let tampered = Ledger::from_blocks(blocks.clone()).unwrap();

        assert_eq!(tampered.first_invalid(), Some(2));
        let err = tampered.verify().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidChain { index: 2, .. }), "got {err}");

        // Every chain ending in a descendant of the corrupted block fails too.
        for end in 3..blocks.len() {
            let prefix = Ledger::from_blocks(blocks[..=end].to_vec()).unwrap();
            assert_eq!(prefix.first_invalid(), Some(2), "chain ending at {end}");
            assert!(prefix.verify().is_err());
        }

        // A replica replaying the blocks in order accepts none from index 2 on.
        let mut replica = Ledger::from_blocks(blocks[..2].to_vec()).unwrap();
        assert!(replica.append(corrupted).is_err());
        for block in &blocks[3..] {
            assert!(replica.append(block.clone()).is_err());
        }
        assert_eq!(replica.len(), 2);
    }

    #[test]
    fn longer_valid_chain_replaces_shorter() {
        let mut short = chain(1);
        let long = chain(3);
        assert!(short.replace_if_longer(&long));
        assert_eq!(short, long);

        let mut same = chain(3);
        assert!(!same.replace_if_longer(&long), "equal length must not replace");
        assert!(!long.clone().replace_if_longer(&chain(2)));
    }

    #[test]
    fn longer_but_broken_chain_is_ignored() {
        let mut ours = chain(1);
        let mut blocks = chain(3).blocks().to_vec();
        blocks[3].data.candidates.clear();
        let broken = Ledger::from_blocks(blocks).unwrap();
        assert!(!ours.replace_if_longer(&broken));
        assert_eq!(ours.len(), 2);
    }

    #[test]
    fn truncated_input_is_refused() {
        let mut bytes = Ledger::new().unwrap().tip().to_bytes().unwrap();
        bytes.truncate(10);
        assert!(Block::from_bytes(&bytes).is_err());
        assert!(Ledger::from_blocks(Vec::new()).is_none());
    }
}
