//! The error taxonomy used at the two boundaries that actually need typed errors: peer RPC
//! fanout (`PeerError`, always absorbed inside the Proposer) and replica-level faults
//! (`ReplicaError`, which can reach a caller of the library as a generic error sentinel).

use thiserror::Error;

/// A transient failure talking to one peer during a phase. Always counted as a negative vote;
/// never propagated to a client (see §7's propagation policy).
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("RPC to peer {peer} timed out")]
    Timeout { peer: String },

    #[error("peer {peer} is not reachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("peer {peer} returned a remote error: {message}")]
    Remote { peer: String, message: String },
}

/// A fault at the Replica boundary: either it wasn't running, or something inside a phase broke
/// in a way that isn't one of the expected sentinel outcomes.
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("replica is not running")]
    NotRunning,

    #[error("failed to load cluster configuration: {0}")]
    Config(#[from] anyhow::Error),

    #[error("internal fault: {0}")]
    Internal(String),
}
