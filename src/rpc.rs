//! The peer RPC surface (§6): a typed async service trait carrying `prepare`/`accept`/`commit`
//! between Replicas, plus a small client-side cache that resolves a peer identifier to a
//! lazily-connected stub.
//!
//! Grounded directly in `single-decree-paxos-rs`'s `AcceptorService` (`#[tarpc::service]` trait
//! returning `bool`/typed responses) and its `get_or_init_client` pattern for reusing
//! connections across calls. The wire format is JSON over TCP, matching that crate's
//! `serde_transport::tcp` + `Json` codec -- "wire format is not bit-significant" per §6, so any
//! portable encoding of the three integers and a bool/string reply suffices, and this is the one
//! the closest real-world precedent in the pack uses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tarpc::client::Config as ClientConfig;
use tarpc::context;
use tarpc::tokio_serde::formats::Json;
use tokio::sync::Mutex;

use crate::error::PeerError;
use crate::types::{Key, ProposalId};

/// The RPC surface a Replica exposes to its peers. `prepare`/`accept` answer `bool`; `commit`
/// answers the rendered `Outcome` string, matching §6's external interface exactly.
#[tarpc::service]
pub trait ReplicaRpc {
    async fn prepare(proposal_id: ProposalId, key: Key, action_code: u8) -> bool;
    async fn accept(proposal_id: ProposalId, key: Key, action_code: u8) -> bool;
    async fn commit(key: Key, action_code: u8) -> String;
}

/// Resolves peer identifiers to connected `ReplicaRpcClient`s, connecting lazily and reusing the
/// connection across calls within a phase and across phases.
pub struct PeerHandles {
    addresses: HashMap<String, SocketAddr>,
    clients: Mutex<HashMap<String, ReplicaRpcClient>>,
    rpc_timeout: Duration,
}

impl PeerHandles {
    pub fn new(addresses: HashMap<String, SocketAddr>, rpc_timeout: Duration) -> Self {
        PeerHandles {
            addresses,
            clients: Mutex::new(HashMap::new()),
            rpc_timeout,
        }
    }

    async fn get_or_connect(&self, peer: &str) -> Result<ReplicaRpcClient, PeerError> {
        {
            let clients = self.clients.lock().await;
            if let Some(client) = clients.get(peer) {
                return Ok(client.clone());
            }
        }

        let address = *self
            .addresses
            .get(peer)
            .ok_or_else(|| PeerError::Unreachable {
                peer: peer.to_string(),
                source: anyhow::anyhow!("no address configured for peer {peer}"),
            })?;

        let mut transport = tarpc::serde_transport::tcp::connect(address, Json::default);
        transport.config_mut().max_frame_length(usize::MAX);
        let transport = tokio::time::timeout(self.rpc_timeout, transport)
            .await
            .map_err(|_| PeerError::Timeout {
                peer: peer.to_string(),
            })?
            .with_context(|| format!("connecting to peer {peer} at {address}"))
            .map_err(|source| PeerError::Unreachable {
                peer: peer.to_string(),
                source,
            })?;

        let client = ReplicaRpcClient::new(ClientConfig::default(), transport).spawn();

        let mut clients = self.clients.lock().await;
        clients.insert(peer.to_string(), client.clone());
        Ok(client)
    }

    /// Invokes `prepare` on `peer`, folding every transport-level failure into a negative vote
    /// per §4.5's failure semantics (timeouts, unreachable peers and remote exceptions are all
    /// treated identically -- never propagated to the client).
    pub async fn prepare(&self, peer: &str, proposal_id: ProposalId, key: Key, action_code: u8) -> bool {
        self.call(peer, |client| {
            let ctx = context::current();
            async move { client.prepare(ctx, proposal_id, key, action_code).await }
        })
        .await
        .unwrap_or(false)
    }

    pub async fn accept(&self, peer: &str, proposal_id: ProposalId, key: Key, action_code: u8) -> bool {
        self.call(peer, |client| {
            let ctx = context::current();
            async move { client.accept(ctx, proposal_id, key, action_code).await }
        })
        .await
        .unwrap_or(false)
    }

    /// Invokes `commit` on `peer`. Returns `None` on any transport-level failure; the Proposer
    /// treats that the same as any other commit-phase peer failure (§4.4 step 5).
    pub async fn commit(&self, peer: &str, key: Key, action_code: u8) -> Option<String> {
        self.call(peer, |client| {
            let ctx = context::current();
            async move { client.commit(ctx, key, action_code).await }
        })
        .await
    }

    async fn call<F, Fut, T>(&self, peer: &str, f: F) -> Option<T>
    where
        F: FnOnce(ReplicaRpcClient) -> Fut,
        Fut: std::future::Future<Output = Result<T, tarpc::client::RpcError>>,
    {
        let client = match self.get_or_connect(peer).await {
            Ok(client) => client,
            Err(err) => {
                log::warn!("{err}");
                return None;
            }
        };

        match tokio::time::timeout(self.rpc_timeout, f(client)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                log::warn!("peer {peer} returned a remote error: {err}");
                None
            }
            Err(_) => {
                log::warn!("RPC to peer {peer} timed out");
                None
            }
        }
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.addresses.keys().map(String::as_str)
    }
}
