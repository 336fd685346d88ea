//! Entry client orchestrator (§4.7): dials both carriers, performs the
//! two-leg handshake, spawns the downstream reader plus keepalive/stall
//! monitors, and binds the configured local front ends.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use halftunnel_core::carrier::{CarrierDialer, MessageConn, TcpCarrierDialer};
use halftunnel_core::clock::{Clock, SystemClock};
use halftunnel_core::config::{PortForwardConfig, Socks5Auth, StallAction};
use halftunnel_core::dest::Destination;
use halftunnel_core::keepalive::{KeepaliveMonitor, KeepaliveTick, StallMonitor};
use halftunnel_core::mux::Multiplexer;
use halftunnel_core::packet::{flag, Packet, SessionId, CONTROL_STREAM_ID};
use halftunnel_core::session::SessionStore;

use crate::config::EntryConfig;
use crate::error::Result;
use crate::reconnect::{Backoff, ReconnectGuard};
use crate::socks5;
use crate::splice::{pump_local_to_stream, write_to_local};

/// The live pair of carriers plus the multiplexer bound to them. Replaced
/// wholesale on every reconnect (§4.6): the SessionID, mux, and both
/// carriers are all fresh.
struct Active {
    session_id: SessionId,
    mux: Arc<Multiplexer>,
    upstream: Arc<dyn MessageConn>,
    downstream: Arc<dyn MessageConn>,
    keepalive: KeepaliveMonitor,
    stall: StallMonitor,
}

pub struct Client {
    config: EntryConfig,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    active: RwLock<Option<Arc<Active>>>,
    local_streams: Arc<RwLock<HashMap<u32, TcpStream>>>,
    guard: Arc<ReconnectGuard>,
}

impl Client {
    pub fn new(config: EntryConfig) -> Arc<Self> {
        Arc::new(Client {
            config,
            clock: Arc::new(SystemClock),
            running: Arc::new(AtomicBool::new(false)),
            active: RwLock::new(None),
            local_streams: Arc::new(RwLock::new(HashMap::new())),
            guard: Arc::new(ReconnectGuard::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Option<Arc<Active>> {
        self.active.read().clone()
    }

    /// Dials both carriers, sends the handshake, and spawns the background
    /// threads. Returns once the initial handshake succeeds.
    pub fn start(client: &Arc<Client>) -> Result<()> {
        client.running.store(true, Ordering::SeqCst);

        let active = client.dial_and_handshake()?;
        *client.active.write() = Some(active);
        client.guard.mark_connected();

        spawn_downstream_reader(client.clone());
        spawn_keepalive_monitor(client.clone());
        spawn_stall_monitor(client.clone());

        if client.config.core.socks5.enabled {
            spawn_socks5_listener(client.clone())?;
        }

        for rule in client.config.port_forwards.clone() {
            spawn_port_forward_listener(client.clone(), rule)?;
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(active) = self.active.write().take() {
            active.upstream.close();
            active.downstream.close();
        }
        self.teardown_local_streams();
    }

    fn teardown_local_streams(&self) {
        let mut streams = self.local_streams.write();
        for (_, sock) in streams.drain() {
            let _ = sock.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Dial both carriers independently and send HANDSHAKE on each (§4.7).
    /// Failure of either leaves nothing half-registered — both are dropped.
    fn dial_and_handshake(&self) -> Result<Arc<Active>> {
        let session_id = SessionId::random();
        let store = SessionStore::new(self.clock.clone(), self.config.core.reassembly_budget_bytes);
        let session = store.get_or_create(session_id);
        let mux = Arc::new(Multiplexer::new(session));

        let dialer = TcpCarrierDialer;
        let handshake_timeout = self.config.core.handshake_timeout();

        let upstream: Arc<dyn MessageConn> =
            Arc::from(dialer.dial(&self.config.upstream_addr, handshake_timeout)?);
        let downstream: Arc<dyn MessageConn> =
            Arc::from(dialer.dial(&self.config.downstream_addr, handshake_timeout)?);

        let handshake = Packet::new(flag::HANDSHAKE, session_id, CONTROL_STREAM_ID, 0, 0);
        upstream.write(&handshake.serialize()?)?;
        downstream.write(&handshake.serialize()?)?;

        let wire = upstream.clone();
        mux.set_handler(Arc::new(move |packet: Packet| wire.write(&packet.serialize()?)));

        let ack_timeout = self.config.core.keepalive_ack_timeout();
        let stall_threshold = self.config.core.stall.threshold();

        Ok(Arc::new(Active {
            session_id,
            mux,
            upstream,
            downstream,
            keepalive: KeepaliveMonitor::new(self.clock.clone(), ack_timeout),
            stall: StallMonitor::new(self.clock.clone(), stall_threshold),
        }))
    }

    fn handle_downstream_message(&self, active: &Arc<Active>, bytes: &[u8]) {
        let packet = match Packet::parse(bytes) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed downstream packet");
                return;
            }
        };

        if packet.session_id != active.session_id {
            return;
        }

        if packet.is_keepalive() && packet.is_ack() {
            active.keepalive.note_ack();
            return;
        }

        if packet.is_control() {
            return;
        }

        let stream_id = packet.stream_id;
        let is_fin = packet.is_fin();
        let has_data = packet.is_data() && !packet.payload.is_empty();

        if let Err(e) = active.mux.handle_packet(packet) {
            tracing::warn!(error = %e, stream_id, "failed to route downstream packet, tearing down stream");
            self.close_local_stream(stream_id);
            return;
        }

        if has_data {
            active.stall.note_data();
        }

        if let Ok(deliverable) = active.mux.read_stream(stream_id) {
            if !deliverable.is_empty() {
                let mut streams = self.local_streams.write();
                if let Some(sock) = streams.get_mut(&stream_id) {
                    if write_to_local(sock, &deliverable).is_err() {
                        streams.remove(&stream_id);
                    }
                }
            }
        }

        if is_fin {
            self.close_local_stream(stream_id);
        }
    }

    /// Shut down and deregister the local socket spliced to `stream_id`
    /// (peer FIN, or the stream was torn down for a routing failure).
    fn close_local_stream(&self, stream_id: u32) {
        if let Some(sock) = self.local_streams.write().remove(&stream_id) {
            let _ = sock.shutdown(std::net::Shutdown::Both);
        }
    }

    fn open_stream_and_splice(&self, local: &mut TcpStream, dest: Destination) -> Result<()> {
        let Some(active) = self.snapshot() else {
            return Err(std::io::Error::other("no active session").into());
        };

        let stream_id = active.mux.open_stream()?;
        active
            .mux
            .send_packet(stream_id, flag::DATA | flag::HANDSHAKE, dest.encode())?;

        let local_clone = local.try_clone()?;
        self.local_streams.write().insert(stream_id, local_clone);

        let mux = active.mux.clone();
        let local_for_pump = local.try_clone()?;
        pump_local_to_stream(local_for_pump, mux, stream_id);

        self.local_streams.write().remove(&stream_id);
        Ok(())
    }

    fn handle_socks5_connection(&self, stream: &mut TcpStream, auth: Option<&Socks5Auth>) -> Result<()> {
        socks5::negotiate(stream, auth)?;
        let dest = socks5::read_connect_request(stream)?;
        socks5::write_success_reply(stream)?;
        self.open_stream_and_splice(stream, dest)
    }
}

/// `Connected -> Reconnecting`; a no-op if a reconnect is already underway
/// (§4.6), or if `reconnect.enabled` is `false` — in that case the carrier
/// failure just tears the session down and the client stays disconnected.
/// Runs the redial-with-backoff loop on its own thread.
fn trigger_reconnect(client: &Arc<Client>, source: &'static str) {
    if !client.config.core.reconnect.enabled {
        tracing::warn!(source, "carrier failure, reconnect disabled, shutting down session");
        if let Some(old) = client.active.write().take() {
            old.mux.close();
            old.upstream.close();
            old.downstream.close();
        }
        client.teardown_local_streams();
        client.guard.mark_disconnected();
        return;
    }

    if !client.guard.begin_reconnect() {
        return;
    }
    tracing::warn!(source, "reconnecting");

    let client = client.clone();
    thread::spawn(move || reconnect_loop(client, source));
}

fn reconnect_loop(client: Arc<Client>, source: &'static str) {
    if let Some(old) = client.active.write().take() {
        old.mux.close();
        old.upstream.close();
        old.downstream.close();
    }
    client.teardown_local_streams();

    let mut backoff = Backoff::new(client.config.core.reconnect.clone());

    while client.is_running() {
        match client.dial_and_handshake() {
            Ok(active) => {
                tracing::info!(source, session_id = %active.session_id, "reconnected");
                *client.active.write() = Some(active);
                client.guard.mark_connected();
                spawn_downstream_reader(client.clone());
                return;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %e, delay_ms = delay.as_millis(), "reconnect attempt failed");
                client.clock.sleep(delay);
            }
        }
    }
    client.guard.mark_disconnected();
}

fn spawn_downstream_reader(client: Arc<Client>) {
    let Some(active) = client.snapshot() else { return };
    thread::spawn(move || loop {
        if !client.is_running() {
            return;
        }
        match active.downstream.read() {
            Ok(bytes) => client.handle_downstream_message(&active, &bytes),
            Err(_) => {
                trigger_reconnect(&client, "downstream-read-error");
                return;
            }
        }
    });
}

fn spawn_keepalive_monitor(client: Arc<Client>) {
    let interval = client.config.core.ping_interval();
    thread::spawn(move || {
        while client.is_running() {
            client.clock.sleep(interval);
            let Some(active) = client.snapshot() else { continue };

            match active.keepalive.tick() {
                KeepaliveTick::Timeout => trigger_reconnect(&client, "keepalive-timeout"),
                KeepaliveTick::Emit => {
                    let packet = Packet::new(flag::KEEPALIVE, active.session_id, CONTROL_STREAM_ID, 0, 0);
                    let sent = packet
                        .serialize()
                        .map_err(Into::into)
                        .and_then(|bytes| active.upstream.write(&bytes));
                    if sent.is_err() {
                        trigger_reconnect(&client, "keepalive");
                    }
                }
            }
        }
    });
}

fn spawn_stall_monitor(client: Arc<Client>) {
    let interval = client.config.core.stall.check_interval();
    let action = client.config.core.stall.action;
    thread::spawn(move || {
        while client.is_running() {
            client.clock.sleep(interval);
            let Some(active) = client.snapshot() else { continue };

            if active.stall.is_stalled() {
                match action {
                    StallAction::Log => tracing::warn!("data-flow stall detected"),
                    StallAction::Restart => trigger_reconnect(&client, "dataflow-stall"),
                    StallAction::Shutdown => {
                        tracing::error!("data-flow stall detected, shutting down");
                        client.stop();
                        return;
                    }
                }
            }
        }
    });
}

fn spawn_socks5_listener(client: Arc<Client>) -> Result<()> {
    let listener = std::net::TcpListener::bind(&client.config.core.socks5.listen_addr)?;
    listener.set_nonblocking(true)?;
    let running = client.running.clone();
    let auth = client.config.core.socks5.auth.clone();

    thread::spawn(move || {
        for mut stream in poll_accept(listener, running) {
            let client = client.clone();
            let auth = auth.clone();
            thread::spawn(move || {
                if let Err(e) = client.handle_socks5_connection(&mut stream, auth.as_ref()) {
                    tracing::debug!(error = %e, "socks5 connection failed");
                }
            });
        }
    });

    Ok(())
}

fn spawn_port_forward_listener(client: Arc<Client>, rule: PortForwardConfig) -> Result<()> {
    let addr = format!("{}:{}", rule.listen_host, rule.listen_port);
    let listener = match std::net::TcpListener::bind(&addr) {
        Ok(l) => l,
        Err(e) if rule.exit_on_port_in_use => return Err(e.into()),
        Err(e) => {
            tracing::warn!(addr, error = %e, "failed to bind port-forward listener, skipping");
            return Ok(());
        }
    };
    listener.set_nonblocking(true)?;
    let running = client.running.clone();

    thread::spawn(move || {
        let dest = match rule.remote_host.parse::<std::net::IpAddr>() {
            Ok(ip) => Destination::Ip(ip, rule.remote_port),
            Err(_) => Destination::Domain(rule.remote_host.clone(), rule.remote_port),
        };

        for mut stream in poll_accept(listener, running) {
            let client = client.clone();
            let dest = dest.clone();
            thread::spawn(move || {
                if let Err(e) = client.open_stream_and_splice(&mut stream, dest) {
                    tracing::debug!(error = %e, "port-forward connection failed");
                }
            });
        }
    });

    Ok(())
}

/// Non-blocking accept loop polled every second against `running` (§6.4).
fn poll_accept(listener: std::net::TcpListener, running: Arc<AtomicBool>) -> impl Iterator<Item = TcpStream> {
    std::iter::from_fn(move || loop {
        if !running.load(Ordering::SeqCst) {
            return None;
        }
        match listener.accept() {
            Ok((stream, _)) => return Some(stream),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
            Err(_) => std::thread::sleep(std::time::Duration::from_secs(1)),
        }
    })
}
