//! # vrouter - Bloom-Indexed Kademlia with a Rotating Coordinator
//!
//! vrouter simulates a content-index overlay built from:
//!
//! - **Routing**: 160-bit identifiers, XOR metric, k-buckets with least-recently-seen eviction
//! - **Indexing**: stored data is announced toward its identifier; every hop remembers who
//!   announced what in a per-peer bloom filter chain
//! - **Lookup**: forward toward the identifier, and jump backward along recorded index trails
//!   as soon as a bloom filter matches
//! - **Coordination**: a rotating coordinator scores nodes and data from access telemetry,
//!   elects its successor and commits the round to a hash-chained ledger
//!
//! ## Execution Model
//!
//! Everything is synchronous. A driver ([`Network`]) advances discrete
//! cycles; inside a cycle each node drains its queues in identifier order and
//! hands outbound messages back through an [`Outbox`]. Nodes share no mutable
//! state; elections reach other nodes only through a [`PeerDirectory`].
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `identity` | Identifiers and the XOR metric |
//! | `config` | Protocol parameters and validation |
//! | `routing` | k-bucket routing table |
//! | `bloom` | Bloom filters and the per-peer reverse-path index |
//! | `messages` | Index and lookup messages |
//! | `protocols` | Outbox, peer directory and observability traits |
//! | `router` | Index propagation and bidirectional lookup |
//! | `telemetry` | Access telemetry and network statistics |
//! | `scoring` | Data and node activity scores |
//! | `merkle` | Digests and Merkle roots |
//! | `vrf` | Seeded shortlist shuffle and coordinator selection |
//! | `ledger` | Hash-chained blocks, validation, longest-chain sync |
//! | `election` | One coordinator round: collect, elect, commit, hand off |
//! | `node` | Per-participant facade |
//! | `sim` | Discrete-cycle network driver |

mod bloom;
mod config;
mod election;
mod identity;
mod ledger;
mod merkle;
mod messages;
mod node;
mod protocols;
mod router;
mod routing;
mod scoring;
mod sim;
mod telemetry;
mod vrf;

pub use bloom::{BloomFilter, BloomIndex, ProbabilisticSet, RecordOutcome};
pub use config::{ActivityWeights, Config, ConfigError};
pub use election::{Collection, CoordinatorElection, ElectionError, ElectionOutcome};
pub use identity::{bit_length, distance_cmp, Distance, Identifier, ID_BYTES, MAX_BITS};
pub use ledger::{Block, BlockData, Ledger, LedgerError};
pub use merkle::{hash_bytes, merkle_root, Digest, ZERO_DIGEST};
pub use messages::{Direction, Envelope, IndexMessage, LookupMessage, Message};
pub use node::{Node, NodeError, NodeReport};
pub use protocols::{HopKind, NoopSink, ObservabilitySink, Outbox, PeerDirectory, TrafficKind};
pub use router::Router;
pub use routing::{bucket_index, BucketTouchOutcome, RoutingTable};
pub use scoring::{data_activity_score, NodeScoring, ScoringError, WeightedNodeScore};
pub use sim::{Network, StepSummary};
pub use telemetry::{AccessTelemetry, NetworkStats, NodeMetrics, RunningStats};
pub use vrf::{round_seed, shuffle_candidates, Elector, HashElector};
