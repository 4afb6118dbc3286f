//! The data types shared across the consensus pipeline: the key-value pair a client asks to
//! mutate, the three actions it can request, and the sentinel outcomes every component answers
//! with.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A bounded non-negative integer identifying a store slot.
pub type Key = u64;

/// A monotonically increasing integer drawn from a process-wide counter on the originating node.
/// Uniqueness across nodes is not guaranteed; see the design notes on proposal-number collisions.
pub type ProposalId = u64;

/// The three operations a client may request against a single key.
///
/// The wire-level codes (1 = Read, 2 = Insert, 3 = Remove) are fixed by the external RPC contract,
/// so `Action` round-trips through `u8` rather than relying on serde's enum tagging.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Insert,
    Remove,
}

impl Action {
    /// Decodes the wire-level action code. Any code outside `{1, 2, 3}` has no `Action` and must
    /// be handled by the caller as an invalid action.
    pub fn from_code(code: u8) -> Option<Action> {
        match code {
            1 => Some(Action::Read),
            2 => Some(Action::Insert),
            3 => Some(Action::Remove),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Action::Read => 1,
            Action::Insert => 2,
            Action::Remove => 3,
        }
    }
}

/// The sentinel outcome of a Store/Learner operation, rendered to the literal strings the
/// external RPC and client-facing interfaces call for.
///
/// Components match on this enum internally; only at the RPC/client boundary is it turned into
/// the literal `String` callers see.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The key is present after the operation completed (the result of a successful read or
    /// insert).
    Present,
    /// INSERT was attempted on a key that was already present.
    AlreadyPresent,
    /// READ or REMOVE was attempted on a key that is absent.
    NotFound,
    /// The action code did not decode to a known `Action`.
    InvalidAction,
    /// The prepare phase did not gather a quorum of positive responses.
    FailedInPreparePhase,
    /// The accept phase did not gather a quorum of positive responses.
    FailedInAcceptPhase,
    /// Every peer failed during the commit phase.
    CommitFailed,
    /// The operation was submitted to a Replica that is not running.
    NotRunning,
    /// An unexpected fault occurred inside a phase.
    InternalError,
}

impl Outcome {
    /// True iff the Store reported the operation as having succeeded at the business level
    /// (`Present` for read/insert, `NotFound` is the expected outcome for a successful remove's
    /// precondition check -- see `Learner::commit` for where this is actually consulted).
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Present)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Present => "success",
            Outcome::AlreadyPresent => "already present",
            Outcome::NotFound => "not found",
            Outcome::InvalidAction => "invalid action",
            Outcome::FailedInPreparePhase => "failed in prepare phase",
            Outcome::FailedInAcceptPhase => "failed in accept phase",
            Outcome::CommitFailed => "commit failed",
            Outcome::NotRunning => "not running",
            Outcome::InternalError => "internal error",
        };
        f.write_str(s)
    }
}
