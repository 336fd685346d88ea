//! Reconnect controller (§4.6): `Connected` / `Disconnected` / `Reconnecting`
//! guarded by an atomic flag so at most one reconnection runs at a time, plus
//! the exponential-backoff-with-jitter schedule used between dial attempts.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use halftunnel_core::config::ReconnectConfig;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connected = 0,
    Disconnected = 1,
    Reconnecting = 2,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Disconnected,
            _ => ConnectionState::Reconnecting,
        }
    }
}

/// Atomic guard ensuring at most one reconnection task runs at a time (§5,
/// "Reconnect flag").
pub struct ReconnectGuard {
    state: AtomicU8,
}

impl ReconnectGuard {
    pub fn new() -> Self {
        ReconnectGuard {
            state: AtomicU8::new(ConnectionState::Connected as u8),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    /// Transition `Connected -> Reconnecting`. Returns `true` if this call
    /// won the race and should drive the reconnect loop; a concurrent
    /// caller observing `Reconnecting` already in progress gets `false`.
    pub fn begin_reconnect(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Reconnecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn mark_connected(&self) {
        self.state.store(ConnectionState::Connected as u8, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        self.state.store(ConnectionState::Disconnected as u8, Ordering::SeqCst);
    }
}

impl Default for ReconnectGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff with jitter (§4.6):
/// `delay_n = clamp(initial * multiplier^n, initial, max) * uniform(1-jitter, 1+jitter)`.
pub struct Backoff {
    cfg: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(cfg: ReconnectConfig) -> Self {
        Backoff { cfg, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The delay for the current attempt, then advances to the next.
    pub fn next_delay(&mut self) -> Duration {
        let n = self.attempt;
        self.attempt += 1;

        let raw = self.cfg.initial_delay_secs * self.cfg.multiplier.powi(n as i32);
        let clamped = raw.clamp(self.cfg.initial_delay_secs, self.cfg.max_delay_secs);

        let jitter = self.cfg.jitter;
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        let secs = (clamped * factor).max(0.0);

        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_caller_wins_begin_reconnect() {
        let guard = ReconnectGuard::new();
        assert!(guard.begin_reconnect());
        assert!(!guard.begin_reconnect());
        assert_eq!(guard.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn mark_connected_resets_the_guard() {
        let guard = ReconnectGuard::new();
        guard.begin_reconnect();
        guard.mark_connected();
        assert!(guard.begin_reconnect());
    }

    #[test]
    fn backoff_stays_within_jittered_bounds() {
        let cfg = ReconnectConfig {
            enabled: true,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            multiplier: 2.0,
            jitter: 0.1,
        };
        let mut backoff = Backoff::new(cfg.clone());

        for n in 0..10 {
            let delay = backoff.next_delay().as_secs_f64();
            let ideal = (cfg.initial_delay_secs * cfg.multiplier.powi(n)).clamp(cfg.initial_delay_secs, cfg.max_delay_secs);
            let lo = ideal * (1.0 - cfg.jitter);
            let hi = ideal * (1.0 + cfg.jitter);
            assert!(delay >= lo - 1e-9 && delay <= hi + 1e-9, "delay {delay} out of [{lo}, {hi}] at n={n}");
        }
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let cfg = ReconnectConfig {
            enabled: true,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            multiplier: 2.0,
            jitter: 0.0,
        };
        let mut backoff = Backoff::new(cfg);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(1.0));
    }
}
