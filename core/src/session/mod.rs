//! Session and stream registry (§4.2).
//!
//! A `Session` is the server-side (or client-side) state object correlated
//! by `SessionID` across both carrier halves. It owns a map of its streams;
//! the `SessionStore` owns the map of all sessions and evicts idle ones.

pub mod stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::packet::SessionId;

pub use stream::{Stream, StreamState};

/// A correlated pair of carriers identified by a `SessionID` (§3).
pub struct Session {
    pub id: SessionId,
    clock: Arc<dyn Clock>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
    streams: RwLock<HashMap<u32, Arc<Stream>>>,
    reassembly_budget: usize,
}

impl Session {
    fn new(id: SessionId, clock: Arc<dyn Clock>, reassembly_budget: usize) -> Self {
        let now = clock.now();
        Session {
            id,
            clock,
            created_at: now,
            last_activity: RwLock::new(now),
            streams: RwLock::new(HashMap::new()),
            reassembly_budget,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn touch(&self) {
        *self.last_activity.write() = self.clock.now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.clock.now().saturating_duration_since(self.last_activity()) > ttl
    }

    pub fn get_or_create_stream(&self, stream_id: u32) -> Arc<Stream> {
        if let Some(s) = self.streams.read().get(&stream_id) {
            return s.clone();
        }
        let mut streams = self.streams.write();
        streams
            .entry(stream_id)
            .or_insert_with(|| Arc::new(Stream::new(stream_id, self.reassembly_budget)))
            .clone()
    }

    pub fn get_stream(&self, stream_id: u32) -> Option<Arc<Stream>> {
        self.streams.read().get(&stream_id).cloned()
    }

    pub fn remove_stream(&self, stream_id: u32) -> Option<Arc<Stream>> {
        self.streams.write().remove(&stream_id)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.streams.read().keys().copied().collect()
    }
}

/// Thread-safe registry of active sessions, with idle eviction (§4.2).
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    clock: Arc<dyn Clock>,
    reassembly_budget: usize,
    closed: Arc<AtomicBool>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, reassembly_budget: usize) -> Self {
        SessionStore {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clock,
            reassembly_budget,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Touches last-activity on hit; creates a new `Session` on miss.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        if let Some(s) = self.sessions.read().get(&id) {
            s.touch();
            return s.clone();
        }
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Session::new(id, self.clock.clone(), self.reassembly_budget)))
            .clone();
        session.touch();
        let total = sessions.len();
        drop(sessions);
        tracing::debug!(session_id = %id, total_sessions = total, "session created or touched");
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(&id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session removed");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Evicts every session whose idle time exceeds `ttl`, returning the
    /// evicted ids so the caller can clean up dependent state (NAT entries,
    /// muxes, registered carriers — §4.2). Ordering across sessions is
    /// unspecified; callers must not rely on it.
    pub fn evict_expired(&self, ttl: Duration) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.is_expired(ttl))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.sessions.write().remove(id);
            tracing::info!(session_id = %id, "session evicted (idle timeout)");
        }

        expired
    }

    /// Stops the eviction task (via the shared flag; the spawning caller
    /// owns the actual thread) and drops all sessions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sessions.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn store() -> (SessionStore, FakeClock) {
        let clock = FakeClock::new();
        (SessionStore::new(Arc::new(clock.clone()), 1 << 20), clock)
    }

    #[test]
    fn get_or_create_reuses_existing_session() {
        let (store, _clock) = store();
        let id = SessionId::random();
        let a = store.get_or_create(id);
        let b = store.get_or_create(id);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn eviction_drops_idle_sessions_only() {
        let (store, clock) = store();
        let stale = SessionId::random();
        store.get_or_create(stale);

        clock.advance(Duration::from_secs(10));
        let fresh = SessionId::random();
        store.get_or_create(fresh);

        let evicted = store.evict_expired(Duration::from_secs(5));
        assert_eq!(evicted, vec![stale]);
        assert!(store.get(stale).is_none());
        assert!(store.get(fresh).is_some());
    }

    #[test]
    fn stream_ids_are_not_reused_within_a_session() {
        let (store, _clock) = store();
        let session = store.get_or_create(SessionId::random());
        let a = session.get_or_create_stream(1);
        session.remove_stream(1);
        let b = session.get_or_create_stream(1);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(session.stream_count(), 1);
    }

    #[test]
    fn close_clears_sessions_and_marks_closed() {
        let (store, _clock) = store();
        store.get_or_create(SessionId::random());
        store.close();
        assert!(store.is_closed());
        assert_eq!(store.count(), 0);
    }
}
