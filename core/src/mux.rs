//! Stream multiplexer (§4.4).
//!
//! One `Multiplexer` exists per active `Session`. It allocates stream ids
//! on the entry side, routes inbound packets to the right stream, and
//! assigns outbound sequence numbers — all independent of the carrier,
//! which it never touches directly. Outbound packets are instead handed to
//! an injected packet handler (§4.4, §9 "Cyclic references"): the
//! orchestrator that owns the carrier registers the handler, and clears it
//! on teardown so the mux and carrier don't hold a reference cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{HtError, Result};
use crate::packet::{flag, Packet, CONTROL_STREAM_ID};
use crate::session::{Session, StreamState};

pub type PacketHandler = Arc<dyn Fn(Packet) -> Result<()> + Send + Sync>;

pub struct Multiplexer {
    session: Arc<Session>,
    next_stream_id: AtomicU32,
    handler: RwLock<Option<PacketHandler>>,
    closed: AtomicBool,
}

impl Multiplexer {
    pub fn new(session: Arc<Session>) -> Self {
        Multiplexer {
            session,
            next_stream_id: AtomicU32::new(1),
            handler: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Register the callback that turns an outbound `Packet` into bytes on
    /// the wire. Must be called before `send_packet` succeeds.
    pub fn set_handler(&self, handler: PacketHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Break the cycle with the carrier explicitly (§9): called by the
    /// reconnect path when tearing this mux down.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HtError::MuxClosed);
        }
        Ok(())
    }

    /// Entry-side stream allocation: monotonically increasing from 1, `0`
    /// reserved for control (§4.2).
    pub fn open_stream(&self) -> Result<u32> {
        self.ensure_open()?;
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        self.session.get_or_create_stream(id);
        Ok(id)
    }

    pub fn close_stream(&self, stream_id: u32) {
        if let Some(stream) = self.session.remove_stream(stream_id) {
            stream.set_state(StreamState::Closed);
        }
    }

    /// Route an inbound packet to its stream, updating state and ack
    /// tracking, and feeding DATA payloads into the reassembly buffer.
    pub fn handle_packet(&self, packet: Packet) -> Result<()> {
        self.ensure_open()?;
        self.session.touch();

        if packet.is_control() {
            // Session-level control packets (handshake/keepalive) are
            // handled by the orchestrator, not routed to a stream.
            return Ok(());
        }

        let stream = self.session.get_or_create_stream(packet.stream_id);

        if packet.is_handshake() {
            stream.activate();
        }

        if packet.is_data() {
            stream.activate();
            if !packet.payload.is_empty() {
                stream.record_recv(packet.payload.len());
            }
            stream.write_recv(packet.seq_num, packet.payload.clone())?;
        }

        if packet.is_fin() {
            stream.note_fin(true);
        }

        Ok(())
    }

    /// Assign `seq = stream.next_send_seq()`, build the packet, and hand it
    /// to the registered packet handler.
    pub fn send_packet(&self, stream_id: u32, flags: u8, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let stream = self
            .session
            .get_stream(stream_id)
            .ok_or(HtError::StreamNotFound(stream_id))?;

        if stream.is_closed() {
            return Err(HtError::StreamClosed(stream_id));
        }

        let handler = self.handler.read().clone().ok_or(HtError::NoHandler)?;

        let seq = stream.next_send_seq();
        let payload_len = payload.len();
        let packet = Packet::new(flags, self.session.id, stream_id, seq, 0).with_payload(payload);

        handler(packet)?;
        if payload_len > 0 {
            stream.record_sent(payload_len);
        }

        if flags & flag::FIN != 0 {
            stream.note_fin(false);
        }

        Ok(())
    }

    /// Send a session-level control packet (StreamID 0), bypassing stream
    /// lookup — used for HANDSHAKE and KEEPALIVE.
    pub fn send_control(&self, flags: u8, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        let handler = self.handler.read().clone().ok_or(HtError::NoHandler)?;
        let packet = Packet::new(flags, self.session.id, CONTROL_STREAM_ID, 0, 0).with_payload(payload);
        handler(packet)
    }

    pub fn read_stream(&self, stream_id: u32) -> Result<Vec<u8>> {
        let stream = self
            .session
            .get_stream(stream_id)
            .ok_or(HtError::StreamNotFound(stream_id))?;
        Ok(stream.read_all())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear_handler();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::packet::SessionId;
    use crate::session::SessionStore;
    use parking_lot::Mutex;

    fn mux() -> Multiplexer {
        let store = SessionStore::new(Arc::new(FakeClock::new()), 1 << 20);
        let session = store.get_or_create(SessionId::random());
        Multiplexer::new(session)
    }

    #[test]
    fn open_stream_allocates_from_one() {
        let mux = mux();
        assert_eq!(mux.open_stream().unwrap(), 1);
        assert_eq!(mux.open_stream().unwrap(), 2);
    }

    #[test]
    fn send_without_handler_fails() {
        let mux = mux();
        let id = mux.open_stream().unwrap();
        assert!(matches!(
            mux.send_packet(id, flag::DATA, b"x".to_vec()),
            Err(HtError::NoHandler)
        ));
    }

    #[test]
    fn send_assigns_increasing_seq_numbers() {
        let mux = mux();
        let id = mux.open_stream().unwrap();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        mux.set_handler(Arc::new(move |p| {
            seen2.lock().push(p.seq_num);
            Ok(())
        }));

        mux.send_packet(id, flag::DATA, b"a".to_vec()).unwrap();
        mux.send_packet(id, flag::DATA, b"b".to_vec()).unwrap();

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn handle_packet_reassembles_out_of_order() {
        let mux = mux();
        let sid = mux.session().id;
        let stream_id = 3;

        let make = |seq, payload: &[u8]| Packet::new(flag::DATA, sid, stream_id, seq, 0).with_payload(payload.to_vec());

        mux.handle_packet(make(2, b"CCC")).unwrap();
        mux.handle_packet(make(0, b"AAA")).unwrap();
        mux.handle_packet(make(1, b"BBB")).unwrap();

        assert_eq!(mux.read_stream(stream_id).unwrap(), b"AAABBBCCC".to_vec());
    }

    #[test]
    fn closed_mux_rejects_operations() {
        let mux = mux();
        mux.close();
        assert!(matches!(mux.open_stream(), Err(HtError::MuxClosed)));
    }

    #[test]
    fn send_to_closed_stream_fails() {
        let mux = mux();
        let id = mux.open_stream().unwrap();
        mux.set_handler(Arc::new(|_| Ok(())));
        mux.close_stream(id);
        assert!(matches!(
            mux.send_packet(id, flag::DATA, Vec::new()),
            Err(HtError::StreamNotFound(_))
        ));
    }
}
