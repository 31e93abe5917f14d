//! # Identifiers and the XOR Metric
//!
//! Nodes and data items share one fixed-width identifier space. Identifiers
//! are stored big-endian in 20 bytes (160 bits), which is also the widest
//! space a [`crate::Config`] may ask for; narrower spaces simply keep the
//! high bits zero.
//!
//! ## Distance
//!
//! `distance(a, b) = a XOR b`, compared as an unsigned big-endian integer.
//! The metric is symmetric, zero iff `a == b`, and composes exactly:
//! `d(a, b) XOR d(b, c) == d(a, c)`.

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Width of an identifier in bytes.
pub const ID_BYTES: usize = 20;

/// Widest identifier space supported, in bits.
pub const MAX_BITS: usize = ID_BYTES * 8;

/// XOR distance between two identifiers, big-endian.
pub type Distance = [u8; ID_BYTES];

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier([u8; ID_BYTES]);

impl Identifier {
    pub const ZERO: Identifier = Identifier([0u8; ID_BYTES]);

    #[inline]
    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Place `value` in the low 64 bits of the identifier.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Draw a uniformly random identifier below `2^bits`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, bits: usize) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rng.fill(&mut bytes[..]);
        mask_to_bits(&mut bytes, bits);
        Self(bytes)
    }

    /// Derive an identifier from arbitrary bytes (blake3, truncated and masked).
    pub fn from_content(content: &[u8], bits: usize) -> Self {
        let digest = blake3::hash(content);
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest.as_bytes()[..ID_BYTES]);
        mask_to_bits(&mut bytes, bits);
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    #[inline]
    pub fn xor_distance(&self, other: &Identifier) -> Distance {
        let mut out = [0u8; ID_BYTES];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    /// True if `self` is strictly closer to `target` than `other` is.
    #[inline]
    pub fn is_closer_than(&self, other: &Identifier, target: &Identifier) -> bool {
        distance_cmp(&self.xor_distance(target), &other.xor_distance(target)) == Ordering::Less
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != ID_BYTES {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; ID_BYTES];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// First 8 bytes as hex, for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

fn mask_to_bits(bytes: &mut [u8; ID_BYTES], bits: usize) {
    let bits = bits.min(MAX_BITS);
    let zero_bits = MAX_BITS - bits;
    let full_bytes = zero_bits / 8;
    for byte in bytes.iter_mut().take(full_bytes) {
        *byte = 0;
    }
    let partial = zero_bits % 8;
    if partial > 0 && full_bytes < ID_BYTES {
        bytes[full_bytes] &= 0xFFu8 >> partial;
    }
}

/// Compare two XOR distances as unsigned integers.
#[inline]
pub fn distance_cmp(a: &Distance, b: &Distance) -> Ordering {
    for i in 0..ID_BYTES {
        if a[i] < b[i] {
            return Ordering::Less;
        } else if a[i] > b[i] {
            return Ordering::Greater;
        }
    }
    Ordering::Equal
}

/// Number of significant bits in a distance; zero for the zero distance.
pub fn bit_length(distance: &Distance) -> usize {
    for (byte_idx, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            return (ID_BYTES - byte_idx) * 8 - byte.leading_zeros() as usize;
        }
    }
    0
}

impl std::fmt::Debug for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identifier({})", self.short())
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; ID_BYTES]> for Identifier {
    fn from(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}
