//! A replicated, integer-keyed key-value store kept in agreement by a three-phase Paxos
//! proposal protocol (prepare / accept / commit) run across a fixed, statically configured
//! cluster of peers.
//!
//! The consensus engine and its replication pipeline are the core of this crate: `acceptor`,
//! `learner` and `proposer` implement the three phases and the quorum logic that ties them
//! together, `store` holds the presence bits they agree on, and `replica` wires one of each into
//! a single node that exposes both the peer RPC surface and the client-facing `get`/`put`/
//! `delete` operations.
//!
//! Transport bootstrap in the sense of service discovery, CLI drivers and metrics display are
//! left to whatever hosts a `Replica`; this crate's `rpc` module does provide the concrete
//! request/response transport the Proposer's fanout needs, since that is part of the replication
//! pipeline itself, not the bootstrap around it.

pub mod acceptor;
pub mod config;
pub mod error;
pub mod learner;
pub mod metrics;
pub mod proposer;
pub mod replica;
pub mod rpc;
pub mod store;
pub mod types;

pub use config::{load_cluster_config, ClusterConfig};
pub use error::{PeerError, ReplicaError};
pub use replica::{Replica, ReplicaState};
pub use types::{Action, Key, Outcome, ProposalId};
