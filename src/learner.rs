//! The Learner: executes a committed `(key, action)` pair against the Store and returns a
//! human-readable result, keeping basic success/failure counters.
//!
//! Where a totally-ordered Multi-Paxos learner would maintain a log and deliver learned values in
//! instance order, this one has no ordering to maintain: it *applies* the learned operation to a
//! key-value Store directly, so `commit` folds "record the decision" and "act on it" into one
//! call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, log_enabled, warn, Level};

use crate::store::Store;
use crate::types::{Action, Key, Outcome};

const RETENTION_WINDOW: Duration = Duration::from_secs(5 * 60);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// A retained record of one applied commit, kept only for introspection (§3: "not part of
/// correctness").
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub key: Key,
    pub action: Action,
    pub result: Outcome,
    pub applied_at: Instant,
}

pub struct Learner {
    store: Arc<Store>,
    running: Arc<AtomicBool>,
    records: DashMap<u64, CommitRecord>,
    next_record_id: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Learner {
    pub fn new(store: Arc<Store>, running: Arc<AtomicBool>) -> Self {
        Learner {
            store,
            running,
            records: DashMap::new(),
            next_record_id: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Dispatches `action` against the Store and records the outcome. Re-delivery of a commit
    /// for an already-applied `(key, action)` is permitted: the Learner never consults proposal
    /// numbers, so it simply re-runs the Store operation and reports whatever that yields (§4.3).
    ///
    /// A Learner that never received a commit for some instance is not repaired by anything in
    /// this crate -- state divergence across Replicas is tolerated, per the open question in the
    /// design notes.
    pub fn commit(&self, key: Key, action_code: u8) -> Outcome {
        if !self.running.load(Ordering::SeqCst) {
            return Outcome::NotRunning;
        }

        let (action, result) = match Action::from_code(action_code) {
            None => {
                warn!("learner: commit for key {key} carried invalid action code {action_code}");
                (None, Outcome::InvalidAction)
            }
            Some(action) => {
                let result = match action {
                    Action::Read => self.store.read(key),
                    Action::Insert => self.store.insert(key),
                    Action::Remove => self.store.remove(key),
                };
                if log_enabled!(Level::Debug) {
                    debug!("learner: committed key {key} action {action:?}: {result}");
                }
                (Some(action), result)
            }
        };

        if result.is_success() {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(action) = action {
            let id = self.next_record_id.fetch_add(1, Ordering::Relaxed);
            self.records.insert(
                id,
                CommitRecord {
                    key,
                    action,
                    result,
                    applied_at: Instant::now(),
                },
            );
        }

        result
    }

    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn evict_expired_records(&self) {
        let now = Instant::now();
        self.records
            .retain(|_, record| now.duration_since(record.applied_at) < RETENTION_WINDOW);
    }
}

/// Spawns the Learner's commit-record retention task, in the same style as the Acceptor's
/// maintenance task.
pub fn spawn_maintenance(learner: Arc<Learner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            learner.evict_expired_records();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner() -> Learner {
        Learner::new(Arc::new(Store::new()), Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn commit_insert_then_commit_insert_again_is_already_present() {
        let l = learner();
        assert_eq!(l.commit(7, Action::Insert.code()), Outcome::Present);
        assert_eq!(l.commit(7, Action::Insert.code()), Outcome::AlreadyPresent);
        assert_eq!(l.success_count(), 1);
        assert_eq!(l.failure_count(), 1);
    }

    #[test]
    fn commit_remove_on_absent_key_is_not_found() {
        let l = learner();
        assert_eq!(l.commit(99, Action::Remove.code()), Outcome::NotFound);
        assert_eq!(l.failure_count(), 1);
    }

    #[test]
    fn commit_with_invalid_action_code_is_invalid_action_and_counted_as_failure() {
        let l = learner();
        assert_eq!(l.commit(1, 4), Outcome::InvalidAction);
        assert_eq!(l.failure_count(), 1);
        assert_eq!(l.store.read(1), Outcome::NotFound);
    }

    #[test]
    fn not_running_yields_not_running_sentinel() {
        let l = Learner::new(Arc::new(Store::new()), Arc::new(AtomicBool::new(false)));
        assert_eq!(l.commit(1, Action::Read.code()), Outcome::NotRunning);
    }
}
