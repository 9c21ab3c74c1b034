//! At-most-one-in-flight tracking per identity.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use kith_graph::IdentityKey;

/// Set of identities with a request currently running.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<IdentityKey>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`. Returns `None` if a request for it is already running.
    ///
    /// The claim is released when the guard drops, including when the
    /// owning task is aborted.
    pub fn try_begin(&self, id: &IdentityKey) -> Option<InFlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.insert(id.clone()) {
            Some(InFlightGuard {
                set: self.clone(),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &IdentityKey) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its identity on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlight,
    id: IdentityKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Result of a keyed fetch that may be skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Completed(T),
    /// A request for the same identity was already running.
    AlreadyInFlight,
    /// The identity was fetched recently enough to skip.
    RecentlyFetched,
}

impl<T> FetchOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}
