//! The Replica: hosts one Store, one Acceptor, one Learner and one Proposer, and exposes both
//! the peer RPC surface (`ReplicaRpc`) and the client-facing `get`/`put`/`delete` operations.
//!
//! A single struct owning a Proposer, Acceptor, Learner and Store together, rather than running
//! them as separate processes coordinating over multicast; the shape here is one struct owning
//! both acceptor state and the logic that drives proposals, with an explicit `start()`/`stop()`
//! lifecycle around the background maintenance tasks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tarpc::server::{BaseChannel, Channel};

use crate::acceptor::{self, Acceptor};
use crate::config::{peer_addresses, ClusterConfig};
use crate::error::ReplicaError;
use crate::learner::{self, Learner};
use crate::metrics::Snapshot;
use crate::proposer::{self, Proposer};
use crate::rpc::{PeerHandles, ReplicaRpc};
use crate::store::Store;
use crate::types::{Action, Key, Outcome};

/// `{Initialized -> Running -> Stopped}`. Transitions are idempotent; there is no transition
/// back from `Stopped` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplicaState {
    Initialized = 0,
    Running = 1,
    Stopped = 2,
}

impl From<u8> for ReplicaState {
    fn from(value: u8) -> Self {
        match value {
            1 => ReplicaState::Running,
            2 => ReplicaState::Stopped,
            _ => ReplicaState::Initialized,
        }
    }
}

struct Tasks {
    acceptor_maintenance: tokio::task::JoinHandle<()>,
    learner_maintenance: tokio::task::JoinHandle<()>,
    proposer_maintenance: tokio::task::JoinHandle<()>,
}

/// A single node in the cluster. Owns its components exclusively; peers are reached only through
/// `PeerHandles`, never by sharing memory (§3's ownership rule, §9's "no cycles").
pub struct Replica {
    state: AtomicU8,
    running: Arc<AtomicBool>,
    store: Arc<Store>,
    acceptor: Arc<Acceptor>,
    learner: Arc<Learner>,
    proposer: Arc<Proposer>,
    tasks: tokio::sync::Mutex<Option<Tasks>>,
}

impl Replica {
    /// Builds a Replica from a `ClusterConfig`. Does not start any background task or bind any
    /// socket -- call `start()` for that.
    pub fn new(config: &ClusterConfig) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let store = Arc::new(Store::new());
        let acceptor = Arc::new(Acceptor::new(
            Arc::clone(&store),
            Arc::clone(&running),
            config.failure_injection,
        ));
        let learner = Arc::new(Learner::new(Arc::clone(&store), Arc::clone(&running)));

        let mut addresses = peer_addresses(config);
        addresses.remove(&config.self_id);
        let peers = Arc::new(PeerHandles::new(addresses, config.rpc_timeout));

        let proposer = Arc::new(Proposer::new(
            config.self_id.clone(),
            config.quorum(),
            Arc::clone(&running),
            Arc::clone(&acceptor),
            Arc::clone(&learner),
            peers,
        ));

        Replica {
            state: AtomicU8::new(ReplicaState::Initialized as u8),
            running,
            store,
            acceptor,
            learner,
            proposer,
            tasks: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ReplicaState {
        ReplicaState::from(self.state.load(Ordering::SeqCst))
    }

    /// Starts all inner components' background maintenance tasks and flips the Replica into
    /// `Running`. Idempotent: calling `start()` again while already running is a no-op.
    pub async fn start(&self) {
        if self
            .state
            .compare_exchange(
                ReplicaState::Initialized as u8,
                ReplicaState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        self.running.store(true, Ordering::SeqCst);

        let tasks = Tasks {
            acceptor_maintenance: acceptor::spawn_maintenance(Arc::clone(&self.acceptor)),
            learner_maintenance: learner::spawn_maintenance(Arc::clone(&self.learner)),
            proposer_maintenance: proposer::spawn_maintenance(Arc::clone(&self.proposer)),
        };
        *self.tasks.lock().await = Some(tasks);
    }

    /// Tears everything down: flips to `Stopped` (no transition back), stops accepting peer and
    /// client operations, and cancels the background maintenance tasks. Idempotent.
    pub async fn stop(&self) {
        self.state.store(ReplicaState::Stopped as u8, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.acceptor_maintenance.abort();
            tasks.learner_maintenance.abort();
            tasks.proposer_maintenance.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.state() == ReplicaState::Running
    }

    // Client-facing operations (§6), delegating to the local Proposer.

    pub async fn get(&self, key: Key) -> String {
        self.client_op(key, Action::Read).await
    }

    pub async fn put(&self, key: Key) -> String {
        self.client_op(key, Action::Insert).await
    }

    pub async fn delete(&self, key: Key) -> String {
        self.client_op(key, Action::Remove).await
    }

    async fn client_op(&self, key: Key, action: Action) -> String {
        if !self.is_running() {
            return Outcome::NotRunning.to_string();
        }
        self.proposer.propose(key, action).await.to_string()
    }

    pub fn metrics(&self) -> Snapshot {
        self.proposer.metrics()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// The tarpc-facing handler for one connection: a thin clone-able wrapper around a
/// `Arc<Replica>` that implements the generated `ReplicaRpc` trait.
#[derive(Clone)]
pub struct ReplicaRpcServer {
    replica: Arc<Replica>,
}

impl ReplicaRpcServer {
    pub fn new(replica: Arc<Replica>) -> Self {
        ReplicaRpcServer { replica }
    }
}

impl ReplicaRpc for ReplicaRpcServer {
    async fn prepare(self, _: tarpc::context::Context, proposal_id: u64, key: Key, action_code: u8) -> bool {
        if !self.replica.is_running() {
            return false;
        }
        let Some(action) = Action::from_code(action_code) else {
            return false;
        };
        self.replica.acceptor.prepare(proposal_id, key, action).await
    }

    async fn accept(self, _: tarpc::context::Context, proposal_id: u64, key: Key, action_code: u8) -> bool {
        if !self.replica.is_running() {
            return false;
        }
        let Some(action) = Action::from_code(action_code) else {
            return false;
        };
        self.replica.acceptor.accept(proposal_id, key, action).await
    }

    async fn commit(self, _: tarpc::context::Context, key: Key, action_code: u8) -> String {
        if !self.replica.is_running() {
            return Outcome::NotRunning.to_string();
        }
        self.replica.learner.commit(key, action_code).to_string()
    }
}

/// Binds `addr` and serves the RPC surface for `replica` until the listener is dropped. This is
/// the one piece of literal socket creation this crate performs; the discovery of *which*
/// address each peer lives at is handled by `ClusterConfig` and is out of this crate's scope.
pub async fn serve(
    replica: Arc<Replica>,
    addr: SocketAddr,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), ReplicaError> {
    if !replica.is_running() {
        return Err(ReplicaError::NotRunning);
    }

    let mut listener = tarpc::serde_transport::tcp::listen(addr, tarpc::tokio_serde::formats::Json::default)
        .await
        .map_err(|err| ReplicaError::Internal(format!("binding RPC listener on {addr}: {err}")))?;
    listener.config_mut().max_frame_length(usize::MAX);
    let bound_addr = listener
        .local_addr();

    let handle = tokio::spawn(async move {
        listener
            .filter_map(|r| async { r.ok() })
            .map(BaseChannel::with_defaults)
            .map(|channel| {
                let server = ReplicaRpcServer::new(Arc::clone(&replica));
                channel.execute(server.serve()).for_each(|fut| {
                    tokio::spawn(fut);
                    futures::future::ready(())
                })
            })
            .buffer_unordered(MAX_CONCURRENT_CONNECTIONS)
            .for_each(|()| futures::future::ready(()))
            .await;
    });

    Ok((handle, bound_addr))
}

const MAX_CONCURRENT_CONNECTIONS: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{cluster_config_from_peers, FailureInjectionConfig, PeerConfig};
    use std::time::Duration;

    fn single_node_config() -> ClusterConfig {
        cluster_config_from_peers(
            "n0",
            vec![PeerConfig {
                id: "n0".to_string(),
                address: "127.0.0.1:0".parse().unwrap(),
            }],
            Duration::from_secs(1),
            FailureInjectionConfig::Disabled,
        )
    }

    #[tokio::test]
    async fn not_running_before_start_returns_not_running_sentinel() {
        let replica = Arc::new(Replica::new(&single_node_config()));
        assert_eq!(replica.get(7).await, "not running");
    }

    #[tokio::test]
    async fn single_node_put_then_get_round_trips() {
        let replica = Arc::new(Replica::new(&single_node_config()));
        replica.start().await;

        assert_eq!(replica.put(7).await, "success");
        assert_eq!(replica.get(7).await, "success");

        replica.stop().await;
        assert_eq!(replica.get(7).await, "not running");
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let replica = Arc::new(Replica::new(&single_node_config()));
        replica.start().await;
        replica.start().await;
        assert_eq!(replica.state(), ReplicaState::Running);
    }

    #[tokio::test]
    async fn stop_does_not_transition_back_to_running() {
        let replica = Arc::new(Replica::new(&single_node_config()));
        replica.start().await;
        replica.stop().await;
        replica.start().await;
        assert_eq!(replica.state(), ReplicaState::Stopped);
    }

    #[tokio::test]
    async fn serve_before_start_returns_not_running_error() {
        let replica = Arc::new(Replica::new(&single_node_config()));
        let err = serve(replica, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::NotRunning));
    }
}
