//! Reads and parses the cluster configuration from a TOML file: peer addresses, cluster size,
//! the per-call RPC timeout, and the failure-injection settings.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, File};
use serde::Deserialize;

use crate::error::ReplicaError;

/// One peer's stable identifier and its (host, port) address.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: SocketAddr,
}

/// The recognized failure-injection settings (§9): disabled by default, or a rate in `[0, 1]`
/// plus a maximum stall in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailureInjectionConfig {
    Disabled,
    Enabled { rate: f64, max_delay_ms: u64 },
}

impl Default for FailureInjectionConfig {
    fn default() -> Self {
        FailureInjectionConfig::Disabled
    }
}

/// The fixed, ordered list of peers that make up this cluster, plus the derived quorum and the
/// timing knobs every component reads from.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// This node's own identifier; must match one entry in `peers`.
    pub self_id: String,

    /// The ordered list of peer identifiers and addresses. Immutable after startup (§3).
    pub peers: Vec<PeerConfig>,

    /// Per-call RPC timeout bounding every peer invocation within a phase.
    pub rpc_timeout: Duration,

    /// The Acceptor's failure-injection gate.
    pub failure_injection: FailureInjectionConfig,
}

impl ClusterConfig {
    /// Cluster size N.
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Quorum size Q = floor(N/2) + 1.
    pub fn quorum(&self) -> usize {
        self.size() / 2 + 1
    }

    pub fn peer(&self, id: &str) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Deserialize)]
struct RawClusterConfig {
    self_id: String,
    peers: Vec<PeerConfig>,
    rpc_timeout_ms: Option<u64>,
    #[serde(default)]
    failure_injection: Option<FailureInjectionConfig>,
}

/// Loads a `ClusterConfig` from the named TOML file into a typed struct.
pub fn load_cluster_config(file_name: &str) -> Result<ClusterConfig, ReplicaError> {
    let c = Config::builder()
        .add_source(File::with_name(file_name))
        .build()
        .map_err(|err| anyhow::anyhow!("reading configuration file {file_name}: {err}"))?;

    let raw: RawClusterConfig = c
        .try_deserialize()
        .map_err(|err| anyhow::anyhow!("deserializing cluster configuration: {err}"))?;

    if !raw.peers.iter().any(|p| p.id == raw.self_id) {
        return Err(anyhow::anyhow!(
            "self_id {:?} does not match any entry in the peer list",
            raw.self_id
        )
        .into());
    }

    Ok(ClusterConfig {
        self_id: raw.self_id,
        peers: raw.peers,
        rpc_timeout: Duration::from_millis(raw.rpc_timeout_ms.unwrap_or(2_000)),
        failure_injection: raw.failure_injection.unwrap_or_default(),
    })
}

/// Builds a `ClusterConfig` directly from in-memory peers, bypassing the TOML file. Used by
/// tests and by callers that already have their membership list (e.g. from an external
/// discovery/bootstrap mechanism, which is out of scope for this crate).
pub fn cluster_config_from_peers(
    self_id: impl Into<String>,
    peers: Vec<PeerConfig>,
    rpc_timeout: Duration,
    failure_injection: FailureInjectionConfig,
) -> ClusterConfig {
    ClusterConfig {
        self_id: self_id.into(),
        peers,
        rpc_timeout,
        failure_injection,
    }
}

/// Convenience map from peer id to address, used by the RPC layer to resolve a `PeerHandle`.
pub fn peer_addresses(config: &ClusterConfig) -> HashMap<String, SocketAddr> {
    config
        .peers
        .iter()
        .map(|p| (p.id.clone(), p.address))
        .collect()
}
