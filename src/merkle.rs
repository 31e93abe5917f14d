//! Digests and Merkle roots.
//!
//! All hashing in the crate is blake3 with a 256-bit output. The Merkle tree
//! pairs adjacent nodes left to right and duplicates the last node of an odd
//! level, so the root depends on leaf order.

/// 256-bit blake3 digest.
pub type Digest = [u8; 32];

/// The all-zero digest; previous hash of the genesis block and root of an empty tree.
pub const ZERO_DIGEST: Digest = [0u8; 32];

pub fn hash_bytes(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}

/// Hash of the concatenation of `parts`, without allocating the concatenation.
pub fn hash_parts(parts: &[&[u8]]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

pub fn merkle_root(leaves: &[Digest]) -> Digest {
    match leaves {
        [] => ZERO_DIGEST,
        [single] => *single,
        _ => {
            let mut level: Vec<Digest> = leaves.to_vec();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| {
                        let left = &pair[0];
                        let right = pair.get(1).unwrap_or(left);
                        hash_parts(&[left.as_slice(), right.as_slice()])
                    })
                    .collect();
            }
            level[0]
        }
    }
}
