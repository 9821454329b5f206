//! Result of applying one gateway-reported change.

use crate::ports::CallbackEvent;

/// How an incoming change related to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// State changed and was committed.
    Applied,
    /// Already reflected in the stored state.
    Unchanged,
    /// Older than the state already applied; discarded.
    Stale,
    /// Contradicts the stored state; logged, nothing written.
    Inconsistent,
}

/// A committed (or refused) change and the callbacks it owes.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub callbacks: Vec<CallbackEvent>,
}

impl Change {
    pub fn applied(callbacks: Vec<CallbackEvent>) -> Self {
        Self {
            kind: ChangeKind::Applied,
            callbacks,
        }
    }

    pub fn of(kind: ChangeKind) -> Self {
        Self {
            kind,
            callbacks: Vec::new(),
        }
    }
}
