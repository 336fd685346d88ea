//! Splice a local application socket to a multiplexed stream (§4.7):
//! local-read → `mux.send_packet(DATA)`, and the downstream reader writes
//! the stream's deliverable bytes back into the local socket. Local EOF
//! sends FIN on the stream.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use halftunnel_core::mux::Multiplexer;
use halftunnel_core::packet::flag;

const READ_CHUNK: usize = 16 * 1024;

/// Runs on its own thread for the lifetime of one local connection. Reads
/// from `local` and forwards each chunk as a DATA packet; on EOF or error,
/// emits FIN (best-effort) and returns.
pub fn pump_local_to_stream(mut local: TcpStream, mux: Arc<Multiplexer>, stream_id: u32) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match local.read(&mut buf) {
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
    let _ = local.shutdown(std::net::Shutdown::Both);
}

/// Writes `bytes` to `local`; a write error means the local peer is gone —
/// callers should deregister the stream.
pub fn write_to_local(local: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    local.write_all(bytes)
}
