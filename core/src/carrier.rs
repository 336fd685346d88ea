//! Carrier transport abstraction (§6.1).
//!
//! The core is written against `MessageConn`/`CarrierDialer`/
//! `CarrierAcceptor` and never touches a concrete socket type directly —
//! the real carrier (a websocket over TLS, per the reference
//! implementation) is an external collaborator. This module ships one
//! concrete implementation, length-prefixed framing over a plain
//! `std::net::TcpStream`, so the entry/exit binaries in this repository
//! are runnable end-to-end; an embedder wanting the production carrier
//! swaps in a different `MessageConn` without touching `core`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{HtError, Result};

/// One packet per carrier message (§6.1): `read`/`write` exchange exactly
/// one complete message at a time, and message boundaries are preserved.
pub trait MessageConn: Send + Sync {
    fn read(&self) -> Result<Vec<u8>>;
    fn write(&self, bytes: &[u8]) -> Result<()>;
    fn close(&self);
    fn is_closed(&self) -> bool;
    fn remote_addr(&self) -> String;
}

pub trait CarrierDialer: Send + Sync {
    fn dial(&self, addr: &str, timeout: Duration) -> Result<Box<dyn MessageConn>>;
}

pub trait CarrierAcceptor: Send + Sync {
    /// Block until a new carrier connects, or return `None` when the
    /// acceptor has been told to stop.
    fn accept(&self) -> Option<Box<dyn MessageConn>>;
}

const MAX_MESSAGE_LEN: u32 = u16::MAX as u32 + crate::packet::AUTH_TAG_LEN as u32 + crate::packet::HEADER_LEN as u32;

/// `MessageConn` over a plain TCP stream: each message is a 4-byte
/// big-endian length prefix followed by that many payload bytes. Reads and
/// writes are each serialized by their own lock so concurrent callers
/// can't interleave partial frames (§5, "Carrier write path").
pub struct TcpMessageConn {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl TcpMessageConn {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr().map_err(HtError::Io)?;
        let writer = stream.try_clone().map_err(HtError::Io)?;
        Ok(TcpMessageConn {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            peer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.lock().set_read_timeout(timeout).map_err(HtError::Io)
    }
}

impl MessageConn for TcpMessageConn {
    fn read(&self) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HtError::CarrierClosed);
        }

        let mut reader = self.reader.lock();

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(HtError::CarrierClosed)
            }
            Err(e) => return Err(HtError::CarrierReadError(e.to_string())),
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_LEN {
            return Err(HtError::CarrierReadError(format!(
                "message length {len} exceeds max {MAX_MESSAGE_LEN}"
            )));
        }

        let mut body = vec![0u8; len as usize];
        reader
            .read_exact(&mut body)
            .map_err(|e| HtError::CarrierReadError(e.to_string()))?;

        Ok(body)
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HtError::CarrierClosed);
        }

        let mut writer = self.writer.lock();
        let len = bytes.len() as u32;
        writer
            .write_all(&len.to_be_bytes())
            .and_then(|_| writer.write_all(bytes))
            .map_err(|e| HtError::CarrierWriteError(e.to_string()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.reader.lock().shutdown(std::net::Shutdown::Both);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> String {
        self.peer.to_string()
    }
}

pub struct TcpCarrierDialer;

impl CarrierDialer for TcpCarrierDialer {
    fn dial(&self, addr: &str, timeout: Duration) -> Result<Box<dyn MessageConn>> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| HtError::DialFailed(format!("bad address {addr}: {e}")))?;

        let stream = if timeout.is_zero() {
            TcpStream::connect(socket_addr).map_err(|e| HtError::DialFailed(e.to_string()))?
        } else {
            TcpStream::connect_timeout(&socket_addr, timeout)
                .map_err(|e| HtError::DialFailed(e.to_string()))?
        };

        stream.set_nodelay(true).ok();
        Ok(Box::new(TcpMessageConn::new(stream)?))
    }
}

/// Non-blocking accept loop, polled every 50ms against a `running` flag —
/// mirrors the teacher's TCP accept loop (§5 cancellation-at-suspension).
pub struct TcpCarrierAcceptor {
    listener: TcpListener,
    running: Arc<AtomicBool>,
}

impl TcpCarrierAcceptor {
    pub fn bind(addr: &str, running: Arc<AtomicBool>) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(HtError::Io)?;
        listener.set_nonblocking(true).map_err(HtError::Io)?;
        Ok(TcpCarrierAcceptor { listener, running })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(HtError::Io)
    }
}

impl CarrierAcceptor for TcpCarrierAcceptor {
    fn accept(&self) -> Option<Box<dyn MessageConn>> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return None;
            }
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nodelay(true).ok();
                    match TcpMessageConn::new(stream) {
                        Ok(conn) => return Some(Box::new(conn)),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to wrap accepted carrier");
                            continue;
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "carrier accept error");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_message_per_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            let conn = TcpMessageConn::new(stream).unwrap();
            conn.write(b"hello").unwrap();
            conn.write(b"world").unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        let conn = TcpMessageConn::new(stream).unwrap();
        assert_eq!(conn.read().unwrap(), b"hello".to_vec());
        assert_eq!(conn.read().unwrap(), b"world".to_vec());

        client.join().unwrap();
    }

    #[test]
    fn read_after_peer_close_is_carrier_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let _ = TcpStream::connect(addr).unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        let conn = TcpMessageConn::new(stream).unwrap();
        assert!(matches!(conn.read(), Err(HtError::CarrierClosed)));
    }
}
