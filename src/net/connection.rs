//! Connection accounting.
//!
//! # Responsibilities
//! - Count current, accepted and rejected connections
//! - Release a connection's slot in the counters when it closes

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::observability::metrics;

/// Shared counters for one listener.
#[derive(Debug)]
pub struct ConnectionCounters {
    current: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    max: u64,
}

impl ConnectionCounters {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            max: max as u64,
        }
    }

    /// Record an accepted connection. The returned guard closes it on drop.
    pub fn open(self: &Arc<Self>) -> ConnectionGuard {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_accepted();
        metrics::record_active_connections(current as usize);
        ConnectionGuard {
            counters: Arc::clone(self),
        }
    }

    /// Record a connection shed at capacity.
    pub fn reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_rejected();
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            current: self.current(),
            max: self.max,
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot for the stats endpoint.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    pub current: u64,
    pub max: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Held for a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<ConnectionCounters>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let previous = self
            .counters
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        metrics::record_active_connections(previous.saturating_sub(1) as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_current() {
        let counters = Arc::new(ConnectionCounters::new(4));
        let a = counters.open();
        let b = counters.open();
        counters.reject();
        assert_eq!(counters.current(), 2);

        drop(a);
        drop(b);
        assert_eq!(
            counters.stats(),
            ConnectionStats {
                current: 0,
                max: 4,
                accepted: 2,
                rejected: 1,
            }
        );
    }
}
