//! The Store: an in-memory mapping from integer key to a presence bit. The value of a key *is*
//! its presence in the set -- there is nothing else to store.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::types::{Action, Key, Outcome};

/// Holds the presence set and answers the three primitive operations plus the advisory
/// `validate` precondition check.
///
/// All four operations take the same single lock, so a read observing state S always observes
/// either the pre- or post-state of any concurrent insert/remove, never a torn state (§4.1,
/// §8's concurrent-read invariant).
#[derive(Default)]
pub struct Store {
    present: RwLock<HashSet<Key>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            present: RwLock::new(HashSet::new()),
        }
    }

    /// Returns `Present` if `key` is present, `NotFound` otherwise. Never mutates.
    pub fn read(&self, key: Key) -> Outcome {
        if self.present.read().contains(&key) {
            Outcome::Present
        } else {
            Outcome::NotFound
        }
    }

    /// Inserts `key` if absent. Returns `Present` on success, `AlreadyPresent` if it was already
    /// there (in which case the set is left unchanged).
    pub fn insert(&self, key: Key) -> Outcome {
        let mut present = self.present.write();
        if present.insert(key) {
            Outcome::Present
        } else {
            Outcome::AlreadyPresent
        }
    }

    /// Removes `key` if present. Returns `Present` on success, `NotFound` if it wasn't there (in
    /// which case the set is left unchanged).
    pub fn remove(&self, key: Key) -> Outcome {
        let mut present = self.present.write();
        if present.remove(&key) {
            Outcome::Present
        } else {
            Outcome::NotFound
        }
    }

    /// A cheap precondition check used by the Acceptor's prepare handler to short-circuit
    /// obviously impossible operations before running them through consensus: INSERT is valid
    /// iff the key is absent, REMOVE iff it is present, READ is always valid.
    ///
    /// This is advisory only -- the authoritative outcome is still produced by
    /// `read`/`insert`/`remove` at commit time, since the local store consulted here may be
    /// stale relative to the quorum that eventually decides the operation (see the open question
    /// on this in the design notes).
    pub fn validate(&self, key: Key, action: Action) -> bool {
        let present = self.present.read();
        match action {
            Action::Read => true,
            Action::Insert => !present.contains(&key),
            Action::Remove => present.contains(&key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_absent_key_is_not_found() {
        let store = Store::new();
        assert_eq!(store.read(7), Outcome::NotFound);
    }

    #[test]
    fn insert_then_read_is_present() {
        let store = Store::new();
        assert_eq!(store.insert(7), Outcome::Present);
        assert_eq!(store.read(7), Outcome::Present);
    }

    #[test]
    fn second_insert_is_already_present_and_state_unchanged() {
        let store = Store::new();
        assert_eq!(store.insert(7), Outcome::Present);
        assert_eq!(store.insert(7), Outcome::AlreadyPresent);
        assert_eq!(store.read(7), Outcome::Present);
    }

    #[test]
    fn remove_absent_key_is_not_found() {
        let store = Store::new();
        assert_eq!(store.remove(99), Outcome::NotFound);
    }

    #[test]
    fn remove_present_key_then_second_remove_is_not_found() {
        let store = Store::new();
        store.insert(7);
        assert_eq!(store.remove(7), Outcome::Present);
        assert_eq!(store.remove(7), Outcome::NotFound);
        assert_eq!(store.read(7), Outcome::NotFound);
    }

    #[test]
    fn validate_matches_store_state() {
        let store = Store::new();
        assert!(store.validate(1, Action::Read));
        assert!(store.validate(1, Action::Insert));
        assert!(!store.validate(1, Action::Remove));

        store.insert(1);
        assert!(!store.validate(1, Action::Insert));
        assert!(store.validate(1, Action::Remove));
    }
}
