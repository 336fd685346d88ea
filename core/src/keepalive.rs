//! Keepalive and stall-detection primitives (§4.5).
//!
//! These track the timestamps the two periodic monitors compare against;
//! the periodic loop itself (sleep on a `Clock`, decide an action, repeat)
//! lives in the entry orchestrator, since only it knows what "trigger
//! reconnect" or "shut down" means at the process level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Clock;

/// Tracks `last_keepalive_ack` (§4.5). The entry side calls `tick` once per
/// `ping_interval`; a `Timeout` result means the carrier is declared dead
/// and reconnect must fire with source `"keepalive-timeout"`, an `Emit`
/// result means a KEEPALIVE control packet should be sent upstream.
pub struct KeepaliveMonitor {
    clock: Arc<dyn Clock>,
    last_ack: Mutex<Instant>,
    ack_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveTick {
    Emit,
    Timeout,
}

impl KeepaliveMonitor {
    pub fn new(clock: Arc<dyn Clock>, ack_timeout: Duration) -> Self {
        let now = clock.now();
        KeepaliveMonitor {
            clock,
            last_ack: Mutex::new(now),
            ack_timeout,
        }
    }

    /// Call when a `KEEPALIVE|ACK` arrives from the peer.
    pub fn note_ack(&self) {
        *self.last_ack.lock() = self.clock.now();
    }

    pub fn tick(&self) -> KeepaliveTick {
        let elapsed = self.clock.now().saturating_duration_since(*self.last_ack.lock());
        if elapsed > self.ack_timeout {
            KeepaliveTick::Timeout
        } else {
            KeepaliveTick::Emit
        }
    }
}

/// Tracks the last send/receive of *data* (non-control) payload (§4.5). A
/// stall can only be declared once at least one data event has occurred.
pub struct StallMonitor {
    clock: Arc<dyn Clock>,
    last_data: Mutex<Instant>,
    seen_data: AtomicBool,
    threshold: Duration,
}

impl StallMonitor {
    pub fn new(clock: Arc<dyn Clock>, threshold: Duration) -> Self {
        let now = clock.now();
        StallMonitor {
            clock,
            last_data: Mutex::new(now),
            seen_data: AtomicBool::new(false),
            threshold,
        }
    }

    pub fn note_data(&self) {
        *self.last_data.lock() = self.clock.now();
        self.seen_data.store(true, Ordering::SeqCst);
    }

    pub fn is_stalled(&self) -> bool {
        if !self.seen_data.load(Ordering::SeqCst) {
            return false;
        }
        self.clock.now().saturating_duration_since(*self.last_data.lock()) > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn keepalive_emits_until_ack_timeout_elapses() {
        let clock = FakeClock::new();
        let mon = KeepaliveMonitor::new(Arc::new(clock.clone()), Duration::from_secs(60));

        assert_eq!(mon.tick(), KeepaliveTick::Emit);
        clock.advance(Duration::from_secs(61));
        assert_eq!(mon.tick(), KeepaliveTick::Timeout);

        mon.note_ack();
        assert_eq!(mon.tick(), KeepaliveTick::Emit);
    }

    #[test]
    fn stall_requires_at_least_one_data_event() {
        let clock = FakeClock::new();
        let mon = StallMonitor::new(Arc::new(clock.clone()), Duration::from_millis(150));

        clock.advance(Duration::from_secs(10));
        assert!(!mon.is_stalled(), "no data has ever flowed yet");

        mon.note_data();
        assert!(!mon.is_stalled());

        clock.advance(Duration::from_millis(200));
        assert!(mon.is_stalled());
    }
}
