//! The Proposer: originates proposals, runs the three-phase protocol against every peer,
//! measures quorum, and returns the client-visible result.
//!
//! Same majority-counting discipline a Multi-Paxos proposer applies to its round/value-round
//! tallies, reshaped from "wait indefinitely for more promise/acceptance messages to trickle in
//! over an event loop" into "fan out to every peer and await the bounded set of responses", using
//! `futures::future::join_all` to drive the fanout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, log_enabled, warn, Level};

use crate::acceptor::Acceptor;
use crate::learner::Learner;
use crate::metrics::{ProposerMetrics, Snapshot};
use crate::rpc::PeerHandles;
use crate::types::{Action, Key, Outcome, ProposalId};

const IN_FLIGHT_TTL: Duration = Duration::from_secs(30);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
/// Target size of the bounded work pool backing concurrent `propose` calls (§4.4).
pub const MAX_CONCURRENT_PROPOSALS: usize = 1000;

struct InFlight {
    #[allow(dead_code)]
    key: Key,
    #[allow(dead_code)]
    action: Action,
    submitted_at: Instant,
}

pub struct Proposer {
    self_id: String,
    quorum: usize,
    next_id: AtomicU64,
    in_flight: DashMap<ProposalId, InFlight>,
    metrics: ProposerMetrics,
    permits: Arc<tokio::sync::Semaphore>,
    running: Arc<AtomicBool>,
    local_acceptor: Arc<Acceptor>,
    local_learner: Arc<Learner>,
    peers: Arc<PeerHandles>,
}

impl Proposer {
    pub fn new(
        self_id: String,
        quorum: usize,
        running: Arc<AtomicBool>,
        local_acceptor: Arc<Acceptor>,
        local_learner: Arc<Learner>,
        peers: Arc<PeerHandles>,
    ) -> Self {
        Proposer {
            self_id,
            quorum,
            next_id: AtomicU64::new(0),
            in_flight: DashMap::new(),
            metrics: ProposerMetrics::default(),
            permits: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_PROPOSALS)),
            running,
            local_acceptor,
            local_learner,
            peers,
        }
    }

    fn next_proposal_number(&self) -> ProposalId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drives the full three-phase protocol for `(key, action)` and returns the client-visible
    /// result (§4.4).
    pub async fn propose(&self, key: Key, action: Action) -> Outcome {
        if !self.running.load(Ordering::SeqCst) {
            return Outcome::NotRunning;
        }

        // Bounded work pool: a caller beyond MAX_CONCURRENT_PROPOSALS worth of in-flight work
        // awaits a permit here rather than being rejected outright.
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                error!("[proposer={}] internal fault acquiring a proposal permit: {err}", self.self_id);
                return Outcome::InternalError;
            }
        };

        let start = Instant::now();
        let id = self.next_proposal_number();
        self.in_flight.insert(
            id,
            InFlight {
                key,
                action,
                submitted_at: start,
            },
        );
        self.metrics.record_started();
        if log_enabled!(Level::Debug) {
            debug!(
                "[proposer={}] starting proposal {id} for key {key} action {action:?}",
                self.self_id
            );
        }

        let outcome = self.run_phases(id, key, action).await;

        self.in_flight.remove(&id);
        match outcome {
            Outcome::Present | Outcome::AlreadyPresent | Outcome::NotFound => {
                self.metrics.record_succeeded(start.elapsed());
            }
            Outcome::FailedInPreparePhase => self.metrics.record_failed_prepare(),
            Outcome::FailedInAcceptPhase => self.metrics.record_failed_accept(),
            Outcome::CommitFailed => self.metrics.record_failed_commit(),
            _ => {}
        }
        if log_enabled!(Level::Debug) {
            debug!(
                "[proposer={}] proposal {id} for key {key} finished with {outcome}",
                self.self_id
            );
        }

        outcome
    }

    async fn run_phases(&self, id: ProposalId, key: Key, action: Action) -> Outcome {
        let prepare_votes = self.fanout_prepare(id, key, action).await;
        if prepare_votes < self.quorum {
            warn!(
                "[proposer={}] proposal {id} failed in prepare phase: {prepare_votes}/{} votes, quorum {}",
                self.self_id,
                self.peers.peer_ids().count() + 1,
                self.quorum
            );
            return Outcome::FailedInPreparePhase;
        }

        let accept_votes = self.fanout_accept(id, key, action).await;
        if accept_votes < self.quorum {
            warn!(
                "[proposer={}] proposal {id} failed in accept phase: {accept_votes}/{} votes, quorum {}",
                self.self_id,
                self.peers.peer_ids().count() + 1,
                self.quorum
            );
            return Outcome::FailedInAcceptPhase;
        }

        self.fanout_commit(key, action).await
    }

    async fn fanout_prepare(&self, id: ProposalId, key: Key, action: Action) -> usize {
        let local = self.local_acceptor.prepare(id, key, action);
        let remotes = self
            .peers
            .peer_ids()
            .map(|peer| {
                let peers = Arc::clone(&self.peers);
                let peer = peer.to_string();
                async move { peers.prepare(&peer, id, key, action.code()).await }
            })
            .collect::<Vec<_>>();

        let (local_ok, remote_results) = futures::join!(local, join_all(remotes));
        let votes = remote_results.into_iter().filter(|ok| *ok).count() + if local_ok { 1 } else { 0 };
        if log_enabled!(Level::Debug) {
            debug!("[proposer={}] prepare phase for proposal {id}: {votes} votes", self.self_id);
        }
        votes
    }

    async fn fanout_accept(&self, id: ProposalId, key: Key, action: Action) -> usize {
        let local = self.local_acceptor.accept(id, key, action);
        let remotes = self
            .peers
            .peer_ids()
            .map(|peer| {
                let peers = Arc::clone(&self.peers);
                let peer = peer.to_string();
                async move { peers.accept(&peer, id, key, action.code()).await }
            })
            .collect::<Vec<_>>();

        let (local_ok, remote_results) = futures::join!(local, join_all(remotes));
        let votes = remote_results.into_iter().filter(|ok| *ok).count() + if local_ok { 1 } else { 0 };
        if log_enabled!(Level::Debug) {
            debug!("[proposer={}] accept phase for proposal {id}: {votes} votes", self.self_id);
        }
        votes
    }

    /// Broadcasts commit to every peer and returns the first non-empty response as the
    /// canonical result. No quorum is required at commit (§4.4 step 5, §7's "commit partial
    /// failure" is not surfaced as an error).
    async fn fanout_commit(&self, key: Key, action: Action) -> Outcome {
        let local_result = self.local_learner.commit(key, action.code());
        if log_enabled!(Level::Debug) {
            debug!(
                "[proposer={}] commit phase for key {key} action {action:?}: {local_result}",
                self.self_id
            );
        }
        if matches!(local_result, Outcome::InternalError) {
            error!(
                "[proposer={}] commit phase internal fault for key {key} action {action:?}",
                self.self_id
            );
        }

        let remotes = self
            .peers
            .peer_ids()
            .map(|peer| {
                let peers = Arc::clone(&self.peers);
                let peer = peer.to_string();
                async move { peers.commit(&peer, key, action.code()).await }
            })
            .collect::<Vec<_>>();
        // The local result is always present and is what the client sees; remote responses are
        // still awaited so the broadcast actually reaches every peer, but nothing here blocks on
        // them agreeing (§4.4 step 5, §7's "commit partial failure" is not surfaced as an error).
        join_all(remotes).await;

        local_result
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn metrics(&self) -> Snapshot {
        self.metrics.snapshot(self.in_flight.len() as u64)
    }

    /// Evicts in-flight records older than 30s. Garbage collection only -- an expired record
    /// whose owning task is still driving the proposal is not cancelled, only removed from the
    /// lookup table once that task has already finished and removed it itself (§9's Open
    /// Question resolution, see DESIGN.md).
    fn evict_expired(&self) {
        let now = Instant::now();
        self.in_flight
            .retain(|_, record| now.duration_since(record.submitted_at) < IN_FLIGHT_TTL);
    }
}

/// Spawns the Proposer's in-flight-table eviction task.
pub fn spawn_maintenance(proposer: Arc<Proposer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            proposer.evict_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailureInjectionConfig;
    use crate::store::Store;
    use std::collections::HashMap;

    fn single_node_proposer() -> Proposer {
        let running = Arc::new(AtomicBool::new(true));
        let store = Arc::new(Store::new());
        let acceptor = Arc::new(Acceptor::new(
            Arc::clone(&store),
            Arc::clone(&running),
            FailureInjectionConfig::Disabled,
        ));
        let learner = Arc::new(Learner::new(store, Arc::clone(&running)));
        let peers = Arc::new(PeerHandles::new(HashMap::new(), Duration::from_secs(1)));
        Proposer::new("n0".to_string(), 1, running, acceptor, learner, peers)
    }

    #[tokio::test]
    async fn single_node_put_succeeds() {
        let proposer = single_node_proposer();
        assert_eq!(proposer.propose(7, Action::Insert).await, Outcome::Present);
        let snapshot = proposer.metrics();
        assert_eq!(snapshot.started, 1);
        assert_eq!(snapshot.succeeded, 1);
    }

    #[tokio::test]
    async fn second_put_on_same_key_is_already_present() {
        let proposer = single_node_proposer();
        assert_eq!(proposer.propose(7, Action::Insert).await, Outcome::Present);
        assert_eq!(
            proposer.propose(7, Action::Insert).await,
            Outcome::AlreadyPresent
        );
    }

    #[tokio::test]
    async fn delete_on_never_inserted_key_is_not_found() {
        let proposer = single_node_proposer();
        assert_eq!(
            proposer.propose(99, Action::Remove).await,
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn not_running_yields_not_running_sentinel() {
        let proposer = single_node_proposer();
        proposer.running.store(false, Ordering::SeqCst);
        assert_eq!(proposer.propose(1, Action::Read).await, Outcome::NotRunning);
    }
}
