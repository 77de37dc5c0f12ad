//! Generation tokens for invalidating work scheduled under an old selection.
//!
//! Every selection change advances the counter. Asynchronous work (snapshot
//! fetches, feed connections, reconnect timers) captures the epoch it was
//! started under and compares it with the live value before touching shared
//! state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// The epoch before any selection has been made.
    pub const ZERO: Epoch = Epoch(0);
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpochCounter {
    live: Arc<AtomicU64>,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn current(&self) -> Epoch {
        Epoch(self.live.load(Ordering::Acquire))
    }

    /// Invalidate every outstanding guard and return the new epoch.
    pub fn advance(&self) -> Epoch {
        Epoch(self.live.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn guard(&self, epoch: Epoch) -> EpochGuard {
        EpochGuard {
            live: Arc::clone(&self.live),
            epoch,
        }
    }
}

/// An epoch captured by a worker, checkable against the live counter.
#[derive(Debug, Clone)]
pub struct EpochGuard {
    live: Arc<AtomicU64>,
    epoch: Epoch,
}

impl EpochGuard {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.epoch.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let counter = EpochCounter::new();
        assert_eq!(counter.current(), Epoch::ZERO);
        let first = counter.advance();
        let second = counter.advance();
        assert!(second > first);
        assert_eq!(counter.current(), second);
    }

    #[test]
    fn guard_goes_stale_after_advance() {
        let counter = EpochCounter::new();
        let epoch = counter.advance();
        let guard = counter.guard(epoch);
        assert!(guard.is_current());

        counter.advance();
        assert!(!guard.is_current());
        assert_eq!(guard.epoch(), epoch);
    }

    #[test]
    fn cloned_counter_shares_state() {
        let counter = EpochCounter::new();
        let clone = counter.clone();
        let guard = counter.guard(counter.advance());
        clone.advance();
        assert!(!guard.is_current());
    }
}
