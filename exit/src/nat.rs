//! NAT table (exit side only, §3, §4.8): keyed by `(SessionID, StreamID)`,
//! maps to the destination socket dialed for that stream.

use std::collections::HashMap;
use std::net::TcpStream;
use std::time::Instant;

use halftunnel_core::packet::SessionId;
use parking_lot::RwLock;

pub struct NatEntry {
    pub destination: TcpStream,
    pub dest_addr: String,
    pub created_at: Instant,
}

#[derive(Default)]
pub struct NatTable {
    entries: RwLock<HashMap<(SessionId, u32), NatEntry>>,
}

impl NatTable {
    pub fn new() -> Self {
        NatTable {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, session_id: SessionId, stream_id: u32, destination: TcpStream, dest_addr: String) {
        self.entries.write().insert(
            (session_id, stream_id),
            NatEntry {
                destination,
                dest_addr,
                created_at: Instant::now(),
            },
        );
    }

    pub fn get_destination_clone(&self, session_id: SessionId, stream_id: u32) -> Option<TcpStream> {
        self.entries
            .read()
            .get(&(session_id, stream_id))
            .and_then(|e| e.destination.try_clone().ok())
    }

    pub fn contains(&self, session_id: SessionId, stream_id: u32) -> bool {
        self.entries.read().contains_key(&(session_id, stream_id))
    }

    /// Destroy the entry (FIN from either direction, destination socket
    /// error, or session eviction — §3).
    pub fn remove(&self, session_id: SessionId, stream_id: u32) {
        if let Some(entry) = self.entries.write().remove(&(session_id, stream_id)) {
            let _ = entry.destination.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Remove every entry belonging to `session_id` (session eviction).
    pub fn remove_session(&self, session_id: SessionId) -> usize {
        let mut entries = self.entries.write();
        let keys: Vec<_> = entries
            .keys()
            .filter(|(sid, _)| *sid == session_id)
            .copied()
            .collect();
        for key in &keys {
            if let Some(entry) = entries.remove(key) {
                let _ = entry.destination.shutdown(std::net::Shutdown::Both);
            }
        }
        keys.len()
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn dummy_stream() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        listener.accept().unwrap().0
    }

    #[test]
    fn insert_and_remove_round_trips() {
        let table = NatTable::new();
        let sid = SessionId::random();
        table.insert(sid, 1, dummy_stream(), "127.0.0.1:7".to_string());
        assert!(table.contains(sid, 1));
        table.remove(sid, 1);
        assert!(!table.contains(sid, 1));
    }

    #[test]
    fn remove_session_clears_only_that_session() {
        let table = NatTable::new();
        let a = SessionId::random();
        let b = SessionId::random();
        table.insert(a, 1, dummy_stream(), "x".to_string());
        table.insert(a, 2, dummy_stream(), "x".to_string());
        table.insert(b, 1, dummy_stream(), "x".to_string());

        let removed = table.remove_session(a);
        assert_eq!(removed, 2);
        assert!(table.contains(b, 1));
        assert_eq!(table.count(), 1);
    }
}
