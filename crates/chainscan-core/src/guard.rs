//! Single-flight tick guards.
//!
//! A [`TickGuard`] admits at most one tick at a time. A tick that finds the
//! guard held is skipped, never queued.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The tracked operations, each with its own guard per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickKind {
    /// Height Tracker tick.
    Height,
    /// Scan Executor tick.
    Scan,
}

impl fmt::Display for TickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Height => write!(f, "height"),
            Self::Scan => write!(f, "scan"),
        }
    }
}

/// Non-blocking try-lock backed by a single-slot semaphore.
#[derive(Debug, Clone)]
pub struct TickGuard {
    slot: Arc<Semaphore>,
}

/// Held for the duration of a tick; releases the guard on drop.
#[derive(Debug)]
pub struct TickPermit {
    _permit: OwnedSemaphorePermit,
}

impl TickGuard {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the guard, or `None` if a tick is already running.
    pub fn try_enter(&self) -> Option<TickPermit> {
        self.slot
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| TickPermit { _permit: permit })
    }

    /// Returns `true` while a tick holds the guard.
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

impl Default for TickGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_release() {
        let guard = TickGuard::new();
        let first = guard.try_enter().expect("free guard");
        assert!(guard.is_busy());
        assert!(guard.try_enter().is_none());
        drop(first);
        assert!(!guard.is_busy());
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn clones_share_the_slot() {
        let guard = TickGuard::new();
        let other = guard.clone();
        let _held = guard.try_enter().unwrap();
        assert!(other.try_enter().is_none());
    }
}
