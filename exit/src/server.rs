//! Exit server orchestrator (§4.8): accepts both carrier halves, correlates
//! them by SessionID, dials requested destinations, and forwards bytes in
//! both directions through the per-session stream registry and reassembly
//! buffer.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use halftunnel_core::carrier::{CarrierAcceptor, MessageConn, TcpCarrierAcceptor};
use halftunnel_core::clock::{Clock, SystemClock};
use halftunnel_core::dest::Destination;
use halftunnel_core::error::HtError;
use halftunnel_core::mux::Multiplexer;
use halftunnel_core::packet::{flag, Packet, SessionId};
use halftunnel_core::session::{Session, SessionStore};

use crate::config::ExitConfig;
use crate::error::Result;
use crate::nat::NatTable;

const DEST_READ_CHUNK: usize = 16 * 1024;

pub struct Server {
    config: ExitConfig,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    sessions: SessionStore,
    muxes: RwLock<HashMap<SessionId, Arc<Multiplexer>>>,
    downstream_conns: Arc<RwLock<HashMap<SessionId, Arc<dyn MessageConn>>>>,
    nat: Arc<NatTable>,
}

impl Server {
    pub fn new(config: ExitConfig) -> Arc<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sessions = SessionStore::new(clock.clone(), config.core.reassembly_budget_bytes);
        Arc::new(Server {
            config,
            clock,
            running: Arc::new(AtomicBool::new(false)),
            sessions,
            muxes: RwLock::new(HashMap::new()),
            downstream_conns: Arc::new(RwLock::new(HashMap::new())),
            nat: Arc::new(NatTable::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(server: &Arc<Server>) -> Result<()> {
        server.running.store(true, Ordering::SeqCst);

        let upstream_acceptor =
            TcpCarrierAcceptor::bind(&server.config.upstream_bind_addr, server.running.clone())?;
        let downstream_acceptor =
            TcpCarrierAcceptor::bind(&server.config.downstream_bind_addr, server.running.clone())?;

        spawn_upstream_accept_loop(server.clone(), upstream_acceptor);
        spawn_downstream_accept_loop(server.clone(), downstream_acceptor);
        spawn_eviction_loop(server.clone());

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.sessions.close();
        self.downstream_conns.write().clear();
    }

    fn get_or_create_mux(&self, session_id: SessionId) -> Arc<Multiplexer> {
        if let Some(mux) = self.muxes.read().get(&session_id) {
            return mux.clone();
        }

        let session: Arc<Session> = self.sessions.get_or_create(session_id);
        let mux = Arc::new(Multiplexer::new(session));

        let downstream_conns = self.downstream_conns.clone();
        mux.set_handler(Arc::new(move |packet: Packet| {
            let conn = downstream_conns
                .read()
                .get(&session_id)
                .cloned()
                .ok_or(HtError::NoDownstream)?;
            conn.write(&packet.serialize()?)
        }));

        self.muxes.write().entry(session_id).or_insert(mux).clone()
    }

    fn reply_keepalive_ack(&self, session_id: SessionId) {
        let Some(conn) = self.downstream_conns.read().get(&session_id).cloned() else {
            tracing::debug!(session_id = %session_id, "keepalive with no registered downstream, dropping");
            return;
        };
        let packet = Packet::new(
            flag::KEEPALIVE | flag::ACK,
            session_id,
            halftunnel_core::packet::CONTROL_STREAM_ID,
            0,
            0,
        );
        if let Ok(bytes) = packet.serialize() {
            let _ = conn.write(&bytes);
        }
    }

    fn forward_to_destination(&self, session_id: SessionId, stream_id: u32, mux: &Arc<Multiplexer>) {
        let Ok(deliverable) = mux.read_stream(stream_id) else {
            return;
        };
        if deliverable.is_empty() {
            return;
        }

        let Some(mut destination) = self.nat.get_destination_clone(session_id, stream_id) else {
            tracing::debug!(session_id = %session_id, stream_id, "no NAT entry, dropping data");
            return;
        };

        if destination.write_all(&deliverable).is_err() {
            self.nat.remove(session_id, stream_id);
        }
    }
}

fn handle_upstream_packet(server: &Arc<Server>, packet: Packet) {
    let session_id = packet.session_id;
    let mux = server.get_or_create_mux(session_id);

    if packet.is_control() {
        if packet.is_keepalive() && !packet.is_ack() {
            server.reply_keepalive_ack(session_id);
        }
        return;
    }

    let stream_id = packet.stream_id;
    let is_handshake = packet.is_handshake();
    let is_data = packet.is_data();
    let is_fin = packet.is_fin();
    let payload = packet.payload.clone();

    if let Err(e) = mux.handle_packet(packet) {
        tracing::warn!(error = %e, stream_id, "failed to route upstream packet, tearing down stream");
        server.nat.remove(session_id, stream_id);
        return;
    }

    if is_handshake && is_data && !payload.is_empty() {
        handle_connect(server, session_id, stream_id, mux, &payload);
        return;
    }

    if is_fin {
        server.nat.remove(session_id, stream_id);
        return;
    }

    if is_data && !payload.is_empty() {
        server.forward_to_destination(session_id, stream_id, &mux);
    }
}

fn handle_connect(server: &Arc<Server>, session_id: SessionId, stream_id: u32, mux: Arc<Multiplexer>, payload: &[u8]) {
    let dest = match Destination::decode(payload) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, session_id = %session_id, stream_id, "bad CONNECT destination");
            let _ = mux.send_packet(stream_id, flag::FIN, Vec::new());
            return;
        }
    };

    let dial_timeout = server.config.core.dial_timeout();
    let addr = dest.to_socket_string();

    let destination = dial_with_timeout(&addr, dial_timeout);

    let destination = match destination {
        Ok(d) => d,
        Err(e) => {
            tracing::info!(error = %e, addr, session_id = %session_id, stream_id, "dial failed");
            let _ = mux.send_packet(stream_id, flag::FIN, Vec::new());
            return;
        }
    };

    destination.set_nodelay(true).ok();
    let reader_handle = match destination.try_clone() {
        Ok(d) => d,
        Err(_) => return,
    };

    server.nat.insert(session_id, stream_id, destination, addr.clone());
    tracing::info!(session_id = %session_id, stream_id, addr, "destination connected");

    spawn_destination_reader(server.clone(), session_id, stream_id, mux, reader_handle);
}

/// Resolve `addr` (which may name a domain, unlike `SocketAddr::parse`) and
/// try each candidate in turn under the shared timeout.
fn dial_with_timeout(addr: &str, timeout: std::time::Duration) -> std::io::Result<TcpStream> {
    if timeout.is_zero() {
        return TcpStream::connect(addr);
    }

    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("no addresses resolved for {addr}"))
    }))
}

fn spawn_destination_reader(
    server: Arc<Server>,
    session_id: SessionId,
    stream_id: u32,
    mux: Arc<Multiplexer>,
    mut destination: TcpStream,
) {
    thread::spawn(move || {
        let mut buf = vec![0u8; DEST_READ_CHUNK];
        loop {
            match destination.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if mux.send_packet(stream_id, flag::DATA, buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = mux.send_packet(stream_id, flag::FIN, Vec::new());
        server.nat.remove(session_id, stream_id);
    });
}

fn spawn_upstream_accept_loop(server: Arc<Server>, acceptor: TcpCarrierAcceptor) {
    thread::spawn(move || {
        while let Some(conn) = acceptor.accept() {
            let server = server.clone();
            let conn: Arc<dyn MessageConn> = Arc::from(conn);
            thread::spawn(move || run_upstream_carrier(server, conn));
        }
    });
}

fn run_upstream_carrier(server: Arc<Server>, conn: Arc<dyn MessageConn>) {
    tracing::info!(peer = %conn.remote_addr(), "upstream carrier connected");
    loop {
        if !server.is_running() {
            return;
        }
        match conn.read() {
            Ok(bytes) => match Packet::parse(&bytes) {
                Ok(packet) => handle_upstream_packet(&server, packet),
                Err(e) => tracing::warn!(error = %e, "dropping malformed upstream packet"),
            },
            Err(_) => {
                tracing::info!(peer = %conn.remote_addr(), "upstream carrier closed");
                return;
            }
        }
    }
}

fn spawn_downstream_accept_loop(server: Arc<Server>, acceptor: TcpCarrierAcceptor) {
    thread::spawn(move || {
        while let Some(conn) = acceptor.accept() {
            let server = server.clone();
            let conn: Arc<dyn MessageConn> = Arc::from(conn);
            thread::spawn(move || run_downstream_carrier(server, conn));
        }
    });
}

fn run_downstream_carrier(server: Arc<Server>, conn: Arc<dyn MessageConn>) {
    tracing::info!(peer = %conn.remote_addr(), "downstream carrier connected");

    let first = match conn.read() {
        Ok(bytes) => bytes,
        Err(_) => return,
    };

    let session_id = match Packet::parse(&first) {
        Ok(packet) => packet.session_id,
        Err(e) => {
            tracing::warn!(error = %e, "first downstream packet malformed, dropping carrier");
            return;
        }
    };

    server.downstream_conns.write().insert(session_id, conn.clone());
    server.get_or_create_mux(session_id);
    tracing::debug!(session_id = %session_id, "downstream carrier registered");

    loop {
        if !server.is_running() {
            break;
        }
        match conn.read() {
            Ok(bytes) => {
                if let Ok(packet) = Packet::parse(&bytes) {
                    if packet.is_keepalive() && !packet.is_ack() {
                        server.reply_keepalive_ack(session_id);
                    }
                }
            }
            Err(_) => break,
        }
    }

    server.downstream_conns.write().remove(&session_id);
    tracing::info!(session_id = %session_id, "downstream carrier closed");
}

fn spawn_eviction_loop(server: Arc<Server>) {
    let ttl = server.config.core.session_timeout();
    thread::spawn(move || {
        while server.is_running() {
            server.clock.sleep(ttl / 2);
            let evicted = server.sessions.evict_expired(ttl);
            if evicted.is_empty() {
                continue;
            }

            for session_id in &evicted {
                server.nat.remove_session(*session_id);
                server.muxes.write().remove(session_id);
                server.downstream_conns.write().remove(session_id);
            }
            tracing::info!(evicted = evicted.len(), "evicted idle sessions");
        }
    });
}
