//! Logical clock abstraction (§1, §4.5, §4.6).
//!
//! Every periodic task (keepalive, stall monitor, session eviction,
//! reconnect backoff) reads time and sleeps through a `Clock` instead of
//! calling `std::time` directly, so tests can drive them with a fake clock
//! instead of racing real wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, dur: Duration);
}

/// Real wall-clock time, backed by `std::time`/`std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// Deterministic clock for tests: `now()` is a fixed epoch plus an
/// atomically-advanced offset; `sleep` advances the offset instead of
/// blocking the thread.
#[derive(Clone)]
pub struct FakeClock {
    epoch: Instant,
    offset_millis: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock {
            epoch: Instant::now(),
            offset_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, dur: Duration) {
        self.offset_millis
            .fetch_add(dur.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_sleep() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_millis(500));
        assert_eq!(clock.now() - t0, Duration::from_millis(500));
    }
}
