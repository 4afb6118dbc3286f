//! The Acceptor: the per-node state machine that decides whether to promise and whether to
//! accept, based on a single monotone counter -- the highest proposal number it has seen.
//!
//! Same two-field promise/accept shape a Multi-Paxos acceptor keeps per log instance, collapsed
//! down to one state per proposal since there is no log here, just single-decree agreement on one
//! key at a time -- plus a failure-injection gate and a Store-backed `validate` precondition that
//! a generic Paxos acceptor has no reason to know about.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, log_enabled, Level};
use parking_lot::Mutex;
use rand::Rng;

use crate::config::FailureInjectionConfig;
use crate::store::Store;
use crate::types::{Action, Key, ProposalId};

const PREPARED_TTL: Duration = Duration::from_secs(60);
const ACCEPTED_TTL: Duration = Duration::from_secs(120);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(2);
const MIN_INJECTED_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Copy)]
struct Entry {
    key: Key,
    action: Action,
    recorded_at: Instant,
}

/// `highest_seen`, `prepared` and `accepted` all live behind one lock, so "check id against
/// highest_seen, then record and advance highest_seen" is a single atomic step -- a prepare or
/// accept handler either fully records its entry and advances `highest_seen`, or does neither
/// (§5's interrupt-safety requirement).
struct Inner {
    highest_seen: ProposalId,
    prepared: HashMap<ProposalId, Entry>,
    accepted: HashMap<ProposalId, Entry>,
}

pub struct Acceptor {
    inner: Mutex<Inner>,
    store: Arc<Store>,
    running: Arc<AtomicBool>,
    failure_injection: FailureInjectionConfig,
}

impl Acceptor {
    pub fn new(
        store: Arc<Store>,
        running: Arc<AtomicBool>,
        failure_injection: FailureInjectionConfig,
    ) -> Self {
        Acceptor {
            inner: Mutex::new(Inner {
                highest_seen: 0,
                prepared: HashMap::new(),
                accepted: HashMap::new(),
            }),
            store,
            running,
            failure_injection,
        }
    }

    /// Rolls the failure-injection dice and, on a hit, suspends the caller for a random duration
    /// before the handler proceeds. This is a testing affordance (§9), never on by default.
    async fn maybe_inject_delay(&self) {
        if let FailureInjectionConfig::Enabled { rate, max_delay_ms } = self.failure_injection {
            let (roll, delay_ms) = {
                let mut rng = rand::thread_rng();
                let roll: f64 = rng.gen();
                let delay_ms = rng.gen_range(MIN_INJECTED_DELAY.as_millis() as u64..=max_delay_ms.max(MIN_INJECTED_DELAY.as_millis() as u64));
                (roll, delay_ms)
            };
            if roll < rate {
                debug!("acceptor: failure injection hit, stalling {delay_ms}ms before handler");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    /// Decides whether to promise `id` for `(key, action)`. See §4.2 for the full contract.
    pub async fn prepare(&self, id: ProposalId, key: Key, action: Action) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }

        self.maybe_inject_delay().await;

        if !self.store.validate(key, action) {
            if log_enabled!(Level::Debug) {
                debug!("acceptor: prepare {id} for key {key} action {action:?} refused, fails local validation");
            }
            return false;
        }

        let mut inner = self.inner.lock();
        if id < inner.highest_seen {
            if log_enabled!(Level::Debug) {
                debug!(
                    "acceptor: prepare {id} for key {key} refused, below highest seen {}",
                    inner.highest_seen
                );
            }
            return false;
        }

        inner.prepared.insert(
            id,
            Entry {
                key,
                action,
                recorded_at: Instant::now(),
            },
        );
        inner.highest_seen = id;
        if log_enabled!(Level::Debug) {
            debug!("acceptor: promised prepare {id} for key {key} action {action:?}");
        }
        true
    }

    /// Decides whether to accept `id` for `(key, action)`. See §4.2 for the full contract.
    pub async fn accept(&self, id: ProposalId, key: Key, action: Action) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }

        self.maybe_inject_delay().await;

        let mut inner = self.inner.lock();
        if id < inner.highest_seen {
            if log_enabled!(Level::Debug) {
                debug!(
                    "acceptor: accept {id} for key {key} refused, below highest seen {}",
                    inner.highest_seen
                );
            }
            return false;
        }
        if !inner.prepared.contains_key(&id) {
            if log_enabled!(Level::Debug) {
                debug!("acceptor: accept {id} for key {key} refused, no matching prepare");
            }
            return false;
        }

        inner.accepted.insert(
            id,
            Entry {
                key,
                action,
                recorded_at: Instant::now(),
            },
        );
        inner.highest_seen = id;
        if log_enabled!(Level::Debug) {
            debug!("acceptor: accepted {id} for key {key} action {action:?}");
        }
        true
    }

    /// Evicts prepared entries older than 60s and accepted entries older than 120s. Run every
    /// ~2s by a background task the Replica owns (§4.2).
    fn evict_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner
            .prepared
            .retain(|_, entry| now.duration_since(entry.recorded_at) < PREPARED_TTL);
        inner
            .accepted
            .retain(|_, entry| now.duration_since(entry.recorded_at) < ACCEPTED_TTL);
    }
}

/// Spawns the Acceptor's background maintenance task. Cancelled by dropping the returned handle
/// (the Replica does this on `stop()`).
pub fn spawn_maintenance(acceptor: Arc<Acceptor>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            acceptor.evict_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acceptor() -> Acceptor {
        Acceptor::new(
            Arc::new(Store::new()),
            Arc::new(AtomicBool::new(true)),
            FailureInjectionConfig::Disabled,
        )
    }

    #[tokio::test]
    async fn prepare_advances_highest_seen_and_rejects_lower_ids() {
        let a = acceptor();
        assert!(a.prepare(5, 1, Action::Read).await);
        assert!(!a.prepare(3, 1, Action::Read).await);
        assert!(a.prepare(5, 1, Action::Read).await, "equal id is not rejected");
    }

    #[tokio::test]
    async fn accept_requires_a_prior_prepare_for_the_same_id() {
        let a = acceptor();
        assert!(!a.accept(5, 1, Action::Insert).await);
        assert!(a.prepare(5, 1, Action::Insert).await);
        assert!(a.accept(5, 1, Action::Insert).await);
    }

    #[tokio::test]
    async fn accept_rejects_ids_below_highest_seen() {
        let a = acceptor();
        assert!(a.prepare(10, 1, Action::Insert).await);
        assert!(a.accept(10, 1, Action::Insert).await);
        assert!(!a.accept(5, 1, Action::Insert).await);
    }

    #[tokio::test]
    async fn not_running_rejects_everything() {
        let running = Arc::new(AtomicBool::new(false));
        let a = Acceptor::new(Arc::new(Store::new()), running, FailureInjectionConfig::Disabled);
        assert!(!a.prepare(1, 1, Action::Read).await);
        assert!(!a.accept(1, 1, Action::Read).await);
    }

    #[tokio::test]
    async fn prepare_consults_store_validate() {
        let store = Arc::new(Store::new());
        store.insert(1);
        let a = Acceptor::new(store, Arc::new(AtomicBool::new(true)), FailureInjectionConfig::Disabled);
        // INSERT on an already-present key fails validation, so prepare is refused.
        assert!(!a.prepare(1, 1, Action::Insert).await);
        assert!(a.prepare(2, 1, Action::Remove).await);
    }
}
