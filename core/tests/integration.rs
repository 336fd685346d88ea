//! Integration test: two `TcpMessageConn` carriers exchange handshake and
//! data packets end-to-end, routed through a `Multiplexer` on each side.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use halftunnel_core::carrier::{MessageConn, TcpMessageConn};
use halftunnel_core::clock::SystemClock;
use halftunnel_core::mux::Multiplexer;
use halftunnel_core::packet::{flag, Packet, SessionId};
use halftunnel_core::session::SessionStore;

fn connected_pair() -> (TcpMessageConn, TcpMessageConn) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let (server_stream, _) = listener.accept().unwrap();
    let client_stream = client.join().unwrap();

    (
        TcpMessageConn::new(client_stream).unwrap(),
        TcpMessageConn::new(server_stream).unwrap(),
    )
}

#[test]
fn handshake_then_data_round_trips_over_a_real_tcp_carrier() {
    let (client_conn, server_conn) = connected_pair();
    let client_conn = Arc::new(client_conn);
    let server_conn = Arc::new(server_conn);

    let store = SessionStore::new(Arc::new(SystemClock), 1 << 20);
    let session_id = SessionId::random();
    let client_session = store.get_or_create(session_id);
    let client_mux = Arc::new(Multiplexer::new(client_session));

    let wire = client_conn.clone();
    client_mux.set_handler(Arc::new(move |packet: Packet| {
        wire.write(&packet.serialize().unwrap())
            .map_err(Into::into)
    }));

    let stream_id = client_mux.open_stream().unwrap();
    client_mux
        .send_packet(stream_id, flag::DATA | flag::HANDSHAKE, b"hello".to_vec())
        .unwrap();

    let received = server_conn.read().unwrap();
    let packet = Packet::parse(&received).unwrap();
    assert_eq!(packet.session_id, session_id);
    assert!(packet.is_handshake());
    assert_eq!(packet.payload, b"hello".to_vec());

    let server_session = store.get_or_create(session_id);
    let server_mux = Multiplexer::new(server_session);
    server_mux.handle_packet(packet).unwrap();

    assert_eq!(server_mux.read_stream(stream_id).unwrap(), b"hello".to_vec());
}

#[test]
fn out_of_order_packets_reassemble_across_a_real_carrier() {
    let (client_conn, server_conn) = connected_pair();

    let session_id = SessionId::random();
    let stream_id = 7;

    let make = |seq, payload: &[u8]| {
        Packet::new(flag::DATA, session_id, stream_id, seq, 0)
            .with_payload(payload.to_vec())
            .serialize()
            .unwrap()
    };

    client_conn.write(&make(2, b"CCC")).unwrap();
    client_conn.write(&make(0, b"AAA")).unwrap();
    client_conn.write(&make(1, b"BBB")).unwrap();

    let store = SessionStore::new(Arc::new(SystemClock), 1 << 20);
    let session = store.get_or_create(session_id);
    let mux = Multiplexer::new(session);

    for _ in 0..3 {
        let bytes = server_conn.read().unwrap();
        mux.handle_packet(Packet::parse(&bytes).unwrap()).unwrap();
    }

    assert_eq!(mux.read_stream(stream_id).unwrap(), b"AAABBBCCC".to_vec());
}

#[test]
fn carrier_close_is_observed_by_the_peer_as_carrier_closed() {
    let (client_conn, server_conn) = connected_pair();
    let done = Arc::new(AtomicBool::new(false));
    let seen_err: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));

    let d = done.clone();
    let s = seen_err.clone();
    let reader = thread::spawn(move || {
        let result = server_conn.read();
        *s.lock().unwrap() = result.is_err();
        d.store(true, Ordering::SeqCst);
    });

    client_conn.close();
    reader.join().unwrap();
    assert!(*seen_err.lock().unwrap());
}
