//! Logical stream state (§3, stream lifecycle).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::reassembly::ReassemblyBuffer;

/// Stream lifecycle (§3): `Open` on allocation, `Active` once a handshake
/// or first outbound byte arrives, `HalfClosed` on one-side FIN, `Closed`
/// on both-side FIN or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Active,
    HalfClosed,
    Closed,
}

pub struct Stream {
    pub id: u32,
    state: RwLock<StreamState>,
    next_send_seq: AtomicU32,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
    local_fin_seen: Mutex<bool>,
    remote_fin_seen: Mutex<bool>,
    reassembly: Mutex<ReassemblyBuffer>,
}

impl Stream {
    pub fn new(id: u32, reassembly_budget: usize) -> Self {
        Stream {
            id,
            state: RwLock::new(StreamState::Open),
            next_send_seq: AtomicU32::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_recv: AtomicU64::new(0),
            local_fin_seen: Mutex::new(false),
            remote_fin_seen: Mutex::new(false),
            reassembly: Mutex::new(ReassemblyBuffer::new(reassembly_budget)),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    pub fn set_state(&self, state: StreamState) {
        *self.state.write() = state;
    }

    /// First handshake/outbound byte: `Open -> Active`, otherwise a no-op.
    pub fn activate(&self) {
        let mut guard = self.state.write();
        if *guard == StreamState::Open {
            *guard = StreamState::Active;
        }
    }

    /// Record a FIN from `local` (this process) or the peer. Idempotent
    /// (§8): a repeated FIN from the same side does not re-trigger a
    /// transition. `Active -> HalfClosed` on the first side, `-> Closed`
    /// once both sides have been seen.
    pub fn note_fin(&self, from_peer: bool) {
        let mut seen = if from_peer {
            self.remote_fin_seen.lock()
        } else {
            self.local_fin_seen.lock()
        };
        if *seen {
            return;
        }
        *seen = true;
        drop(seen);

        let both = *self.local_fin_seen.lock() && *self.remote_fin_seen.lock();
        let mut state = self.state.write();
        *state = if both {
            StreamState::Closed
        } else {
            StreamState::HalfClosed
        };
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// Assign the next outbound sequence number.
    pub fn next_send_seq(&self) -> u32 {
        self.next_send_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn record_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_recv(&self, n: usize) {
        self.bytes_recv.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv.load(Ordering::Relaxed)
    }

    pub fn write_recv(&self, seq: u32, bytes: Vec<u8>) -> crate::error::Result<()> {
        self.reassembly.lock().write(seq, bytes)
    }

    pub fn read_all(&self) -> Vec<u8> {
        self.reassembly.lock().read_all()
    }

    pub fn buffered_len(&self) -> usize {
        self.reassembly.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_is_a_one_way_door() {
        let s = Stream::new(1, 1024);
        assert_eq!(s.state(), StreamState::Open);
        s.activate();
        assert_eq!(s.state(), StreamState::Active);
        s.set_state(StreamState::HalfClosed);
        s.activate();
        assert_eq!(s.state(), StreamState::HalfClosed);
    }

    #[test]
    fn fin_from_both_sides_closes_once() {
        let s = Stream::new(1, 1024);
        s.activate();
        s.note_fin(false);
        assert_eq!(s.state(), StreamState::HalfClosed);

        // Idempotent: repeating the same side's FIN doesn't reopen logic.
        s.note_fin(false);
        assert_eq!(s.state(), StreamState::HalfClosed);

        s.note_fin(true);
        assert_eq!(s.state(), StreamState::Closed);
        assert!(s.is_closed());
    }

    #[test]
    fn send_seq_is_monotonic_from_zero() {
        let s = Stream::new(1, 1024);
        assert_eq!(s.next_send_seq(), 0);
        assert_eq!(s.next_send_seq(), 1);
        assert_eq!(s.next_send_seq(), 2);
    }
}
