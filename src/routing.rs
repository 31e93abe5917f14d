//! # Routing Table (XOR-Metric)
//!
//! Kademlia routing table keyed by XOR distance to the owning node.
//!
//! - Bucket index: bit-length of `distance(self, peer)` minus one, so bucket 0
//!   holds the single closest possible peer and bucket `bits - 1` covers half
//!   of the keyspace.
//! - Each bucket holds at most `k` peers. Re-observing a peer refreshes it;
//!   inserting into a full bucket evicts the least-recently-seen peer.
//! - The owning node never appears in its own table.
//!
//! Buckets are allocated on first use so sparse tables stay small.

use std::collections::BinaryHeap;
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::trace;

use crate::identity::{bit_length, distance_cmp, Distance, Identifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketTouchOutcome {
    Inserted,
    Refreshed,
    /// Bucket was full; the least-recently-seen peer made room.
    Evicted(Identifier),
    Ignored,
}

#[derive(Debug)]
struct RoutingBucket {
    peers: LruCache<Identifier, ()>,
}

impl RoutingBucket {
    fn new(k: NonZeroUsize) -> Self {
        Self {
            peers: LruCache::new(k),
        }
    }

    fn touch(&mut self, peer: Identifier) -> BucketTouchOutcome {
        if self.peers.contains(&peer) {
            self.peers.promote(&peer);
            return BucketTouchOutcome::Refreshed;
        }
        match self.peers.push(peer, ()) {
            Some((evicted, ())) => BucketTouchOutcome::Evicted(evicted),
            None => BucketTouchOutcome::Inserted,
        }
    }
}

/// Bucket for `other` relative to `self_id`, or `None` when they are equal.
pub fn bucket_index(self_id: &Identifier, other: &Identifier) -> Option<usize> {
    match bit_length(&self_id.xor_distance(other)) {
        0 => None,
        len => Some(len - 1),
    }
}

#[derive(Debug)]
pub struct RoutingTable {
    self_id: Identifier,
    k: NonZeroUsize,
    buckets: Vec<Option<RoutingBucket>>,
}

impl RoutingTable {
    pub fn new(self_id: Identifier, k: usize, bits: usize) -> Self {
        let k = NonZeroUsize::new(k).unwrap_or(NonZeroUsize::MIN);
        let mut buckets = Vec::with_capacity(bits);
        buckets.resize_with(bits.max(1), || None);
        Self {
            self_id,
            k,
            buckets,
        }
    }

    /// Insert or refresh `peer`.
    pub fn add_neighbour(&mut self, peer: Identifier) -> BucketTouchOutcome {
        let Some(idx) = bucket_index(&self.self_id, &peer) else {
            return BucketTouchOutcome::Ignored;
        };
        // Identifiers wider than the configured space share the farthest bucket.
        let idx = idx.min(self.buckets.len() - 1);
        let k = self.k;
        let bucket = self.buckets[idx].get_or_insert_with(|| RoutingBucket::new(k));
        let outcome = bucket.touch(peer);
        if let BucketTouchOutcome::Evicted(evicted) = outcome {
            trace!(
                bucket = idx,
                evicted = %evicted.short(),
                inserted = %peer.short(),
                "bucket full, evicted least-recently-seen peer"
            );
        }
        outcome
    }

    pub fn contains(&self, peer: &Identifier) -> bool {
        self.peers().any(|p| p == peer)
    }

    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .map(|bucket| bucket.peers.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, idx: usize) -> usize {
        self.buckets
            .get(idx)
            .and_then(|b| b.as_ref())
            .map_or(0, |bucket| bucket.peers.len())
    }

    fn peers(&self) -> impl Iterator<Item = &Identifier> {
        self.buckets
            .iter()
            .flatten()
            .flat_map(|bucket| bucket.peers.iter().map(|(id, _)| id))
    }

    /// Up to `limit` known peers ordered by ascending distance to `target`.
    pub fn neighbours(&self, target: &Identifier, limit: usize) -> Vec<Identifier> {
        if limit == 0 {
            return Vec::new();
        }

        #[derive(Eq, PartialEq)]
        struct DistPeer {
            dist: Distance,
            peer: Identifier,
        }

        impl Ord for DistPeer {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                distance_cmp(&self.dist, &other.dist)
            }
        }

        impl PartialOrd for DistPeer {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut heap: BinaryHeap<DistPeer> = BinaryHeap::with_capacity(limit + 1);

        for peer in self.peers() {
            let dist = peer.xor_distance(target);
            if heap.len() < limit {
                heap.push(DistPeer { dist, peer: *peer });
            } else if let Some(max_entry) = heap.peek() {
                if distance_cmp(&dist, &max_entry.dist) == std::cmp::Ordering::Less {
                    heap.push(DistPeer { dist, peer: *peer });
                    heap.pop();
                }
            }
        }

        heap.into_sorted_vec().into_iter().map(|dp| dp.peer).collect()
    }
}
