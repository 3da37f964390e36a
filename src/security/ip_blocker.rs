//! Violation-based IP blocking.
//!
//! # Responsibilities
//! - Count rate-limit violations per client IP within a violation window
//! - Block an IP for `block_duration` once it reaches `max_violations`
//! - Reject requests from blocked IPs before any other work is done
//!
//! # Design Decisions
//! - An IP is either counting violations or blocked, never both
//! - An elapsed window restarts the count instead of accumulating history
//! - Expiry is checked on read; sweeps only reclaim memory

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::IpBlockerConfig;
use crate::http::response::Rejection;
use crate::lifecycle::{spawn_periodic, BackgroundTasks, Shutdown};
use crate::observability::metrics;
use crate::security::headers::client_ip;

#[derive(Debug, Clone)]
struct ViolationRecord {
    count: u32,
    first_seen: Instant,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct BlockerState {
    violations: HashMap<IpAddr, ViolationRecord>,
    /// IP → block expiry.
    blocklist: HashMap<IpAddr, Instant>,
}

/// Tracks violations and the active blocklist.
#[derive(Debug)]
pub struct IpBlocker {
    state: RwLock<BlockerState>,
    max_violations: u32,
    block_duration: Duration,
    violation_window: Duration,
}

impl IpBlocker {
    pub fn new(max_violations: u32, block_duration: Duration, violation_window: Duration) -> Self {
        tracing::info!(
            max_violations,
            block_duration = ?block_duration,
            violation_window = ?violation_window,
            "IP blocker configured"
        );

        Self {
            state: RwLock::new(BlockerState::default()),
            max_violations,
            block_duration,
            violation_window,
        }
    }

    pub fn from_config(config: &IpBlockerConfig) -> Self {
        Self::new(
            config.max_violations,
            Duration::from_secs(config.block_duration_secs),
            Duration::from_secs(config.violation_window_secs),
        )
    }

    /// Record one violation. Returns true if this call blocked the IP.
    pub fn record_violation(&self, ip: IpAddr) -> bool {
        let mut state = self.state.write();
        let now = Instant::now();

        match state.blocklist.get(&ip) {
            Some(expiry) if *expiry > now => return false,
            Some(_) => {
                state.blocklist.remove(&ip);
            }
            None => {}
        }

        let Some(record) = state.violations.get_mut(&ip) else {
            if self.max_violations <= 1 {
                self.block(&mut state, ip, now, 1);
                return true;
            }
            state.violations.insert(
                ip,
                ViolationRecord {
                    count: 1,
                    first_seen: now,
                    last_seen: now,
                },
            );
            return false;
        };

        if now.saturating_duration_since(record.first_seen) > self.violation_window {
            record.count = 1;
            record.first_seen = now;
            record.last_seen = now;
            return false;
        }

        record.count += 1;
        record.last_seen = now;

        if record.count >= self.max_violations {
            let count = record.count;
            state.violations.remove(&ip);
            self.block(&mut state, ip, now, count);
            return true;
        }

        false
    }

    /// Whether `ip` is on the blocklist and its block has not expired.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.block_expiry(ip).is_some()
    }

    /// Expiry of an active block, if any.
    pub fn block_expiry(&self, ip: IpAddr) -> Option<Instant> {
        let state = self.state.read();
        state
            .blocklist
            .get(&ip)
            .copied()
            .filter(|expiry| *expiry > Instant::now())
    }

    /// Manual override: drop any block and violation history for `ip`.
    pub fn unblock(&self, ip: IpAddr) -> bool {
        let mut state = self.state.write();
        let was_blocked = state.blocklist.remove(&ip).is_some();
        state.violations.remove(&ip);
        tracing::info!(ip = %ip, was_blocked, "IP manually unblocked");
        was_blocked
    }

    /// Active blocks with their remaining duration.
    pub fn blocked_ips(&self) -> Vec<(IpAddr, Duration)> {
        let state = self.state.read();
        let now = Instant::now();
        state
            .blocklist
            .iter()
            .filter(|(_, expiry)| **expiry > now)
            .map(|(ip, expiry)| (*ip, expiry.saturating_duration_since(now)))
            .collect()
    }

    pub fn stats(&self) -> IpBlockerStats {
        let state = self.state.read();
        let now = Instant::now();
        IpBlockerStats {
            blocked_ips: state.blocklist.values().filter(|e| **e > now).count(),
            pending_violations: state.violations.len(),
        }
    }

    /// Remove expired blocklist entries. Returns how many were removed.
    pub fn sweep_expired_blocks(&self) -> usize {
        let mut state = self.state.write();
        let now = Instant::now();
        let before = state.blocklist.len();
        state.blocklist.retain(|ip, expiry| {
            let live = *expiry > now;
            if !live {
                tracing::debug!(ip = %ip, "IP block expired, removed from blocklist");
            }
            live
        });
        let removed = before - state.blocklist.len();
        metrics::record_blocked_ips(state.blocklist.len());
        removed
    }

    /// Remove violation records idle for more than twice the violation window.
    pub fn sweep_stale_violations(&self) -> usize {
        let mut state = self.state.write();
        let now = Instant::now();
        let max_idle = self.violation_window * 2;
        let before = state.violations.len();
        state
            .violations
            .retain(|_, record| now.saturating_duration_since(record.last_seen) <= max_idle);
        before - state.violations.len()
    }

    /// Spawn the blocklist sweep (every minute) and the violation sweep (every 5 minutes).
    pub fn start(self: &Arc<Self>, shutdown: &Shutdown) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let blocker = Arc::clone(self);
        tasks.push(spawn_periodic(
            "ip-block-expiry",
            Duration::from_secs(60),
            shutdown,
            move || {
                blocker.sweep_expired_blocks();
            },
        ));

        let blocker = Arc::clone(self);
        tasks.push(spawn_periodic(
            "ip-violation-sweep",
            Duration::from_secs(300),
            shutdown,
            move || {
                let removed = blocker.sweep_stale_violations();
                if removed > 0 {
                    tracing::debug!(removed, "Stale violation records removed");
                }
            },
        ));

        tasks
    }

    fn block(&self, state: &mut BlockerState, ip: IpAddr, now: Instant, violations: u32) {
        state.blocklist.insert(ip, now + self.block_duration);
        metrics::record_ip_blocked();
        tracing::warn!(
            ip = %ip,
            violations,
            block_duration = ?self.block_duration,
            "IP blocked"
        );
    }
}

/// Snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IpBlockerStats {
    pub blocked_ips: usize,
    pub pending_violations: usize,
}

/// Middleware: reject requests from blocked IPs with 403.
pub async fn ip_block_middleware(
    State(blocker): State<Arc<IpBlocker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);

    if let Some(expiry) = blocker.block_expiry(ip) {
        let rejection = Rejection::Blocked {
            retry_after: expiry.saturating_duration_since(Instant::now()),
        };
        metrics::record_rejection(rejection.reason());
        tracing::debug!(ip = %ip, "Request from blocked IP rejected");
        return rejection.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn third_violation_blocks() {
        let blocker = IpBlocker::new(3, Duration::from_secs(60), Duration::from_secs(60));
        let client = ip("192.0.2.1");

        assert!(!blocker.record_violation(client));
        assert!(!blocker.record_violation(client));
        assert!(!blocker.is_blocked(client));

        assert!(blocker.record_violation(client));
        assert!(blocker.is_blocked(client));
        assert_eq!(
            blocker.stats(),
            IpBlockerStats {
                blocked_ips: 1,
                pending_violations: 0
            }
        );
    }

    #[test]
    fn single_violation_threshold_blocks_immediately() {
        let blocker = IpBlocker::new(1, Duration::from_secs(60), Duration::from_secs(60));
        assert!(blocker.record_violation(ip("192.0.2.2")));
        assert!(blocker.is_blocked(ip("192.0.2.2")));
    }

    #[test]
    fn violations_while_blocked_are_ignored() {
        let blocker = IpBlocker::new(2, Duration::from_secs(60), Duration::from_secs(60));
        let client = ip("192.0.2.3");
        blocker.record_violation(client);
        assert!(blocker.record_violation(client));

        assert!(!blocker.record_violation(client));
        assert_eq!(blocker.stats().pending_violations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_window_restarts_count() {
        let blocker = IpBlocker::new(3, Duration::from_secs(60), Duration::from_secs(60));
        let client = ip("192.0.2.4");

        blocker.record_violation(client);
        blocker.record_violation(client);
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!blocker.record_violation(client));
        assert!(!blocker.is_blocked(client));
        assert!(!blocker.record_violation(client));
        assert!(blocker.record_violation(client));
    }

    #[tokio::test(start_paused = true)]
    async fn block_expires_lazily_then_sweeps() {
        let blocker = IpBlocker::new(1, Duration::from_secs(30), Duration::from_secs(60));
        let client = ip("192.0.2.5");
        blocker.record_violation(client);
        assert!(blocker.block_expiry(client).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!blocker.is_blocked(client));
        assert!(blocker.block_expiry(client).is_none());
        assert_eq!(blocker.stats().blocked_ips, 0);
        assert!(blocker.blocked_ips().is_empty());

        assert_eq!(blocker.sweep_expired_blocks(), 1);
        assert_eq!(blocker.sweep_expired_blocks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_violations_swept_after_twice_window() {
        let blocker = IpBlocker::new(5, Duration::from_secs(60), Duration::from_secs(10));
        blocker.record_violation(ip("192.0.2.6"));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(blocker.sweep_stale_violations(), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(blocker.sweep_stale_violations(), 1);
        assert_eq!(blocker.stats().pending_violations, 0);
    }

    #[test]
    fn unblock_clears_block_and_history() {
        let blocker = IpBlocker::new(2, Duration::from_secs(60), Duration::from_secs(60));
        let client = ip("2001:db8::1");
        blocker.record_violation(client);
        blocker.record_violation(client);
        assert!(blocker.is_blocked(client));

        assert!(blocker.unblock(client));
        assert!(!blocker.is_blocked(client));
        assert!(!blocker.record_violation(client));
    }

    #[test]
    fn blocked_ips_lists_remaining_time() {
        let blocker = IpBlocker::new(1, Duration::from_secs(900), Duration::from_secs(60));
        blocker.record_violation(ip("192.0.2.7"));
        blocker.record_violation(ip("192.0.2.8"));

        let blocked = blocker.blocked_ips();
        assert_eq!(blocked.len(), 2);
        assert!(blocked.iter().all(|(_, left)| *left <= Duration::from_secs(900)));
    }
}
