//! Verifiable selection of the next coordinator.
//!
//! Every input is public and shared: the configured election seed, the
//! ledger tip and the ordered shortlist. Any node can therefore recompute
//! and check the choice recorded in a block.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::identity::Identifier;
use crate::merkle::{hash_parts, Digest};

/// Deterministic one-of-N selection given a shared seed.
pub trait Elector: Send + Sync {
    fn select_one(&self, candidates: &[Identifier], seed: &Digest) -> Option<Identifier>;
}

/// blake3-based selector: output = H(seed ‖ candidates), index = output mod len.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashElector;

impl HashElector {
    pub fn output(candidates: &[Identifier], seed: &Digest) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(seed);
        for candidate in candidates {
            hasher.update(candidate.as_bytes());
        }
        *hasher.finalize().as_bytes()
    }
}

/// Reduce a big-endian digest modulo `len`.
fn digest_mod(digest: &Digest, len: usize) -> usize {
    let len = len as u128;
    let rem = digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + *byte as u128) % len);
    rem as usize
}

impl Elector for HashElector {
    fn select_one(&self, candidates: &[Identifier], seed: &Digest) -> Option<Identifier> {
        if candidates.is_empty() {
            return None;
        }
        let output = Self::output(candidates, seed);
        candidates.get(digest_mod(&output, candidates.len())).copied()
    }
}

/// Seed for one election round, bound to the chain it extends.
pub fn round_seed(election_seed: u64, tip_hash: &Digest) -> Digest {
    hash_parts(&[election_seed.to_le_bytes().as_slice(), tip_hash.as_slice()])
}

/// Uniform shuffle driven entirely by `seed`.
pub fn shuffle_candidates(candidates: &mut [Identifier], seed: &Digest) {
    let mut rng = StdRng::from_seed(*seed);
    candidates.shuffle(&mut rng);
}
