//! SOCKS5 front end (RFC 1928 method negotiation, RFC 1929 username/password
//! authentication, §6.3).

use std::io::{Read, Write};
use std::net::TcpStream;

use halftunnel_core::config::Socks5Auth;
use halftunnel_core::dest::Destination;
use subtle::ConstantTimeEq;

use crate::error::{EntryError, Result};

const VER: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const REPLY_SUCCESS: u8 = 0x00;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ATYP_NOT_SUPPORTED: u8 = 0x08;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Constant-time comparison so credential-check timing doesn't leak how
/// many leading characters of the password matched (§8).
fn credentials_match(expected: &Socks5Auth, user: &str, pass: &str) -> bool {
    let user_ok: bool = expected.user.as_bytes().ct_eq(user.as_bytes()).into();
    let pass_ok: bool = expected.pass.as_bytes().ct_eq(pass.as_bytes()).into();
    user_ok & pass_ok
}

/// RFC 1928 method negotiation, followed by RFC 1929 sub-negotiation when
/// `auth` is configured. On success, the stream is ready for a request.
pub fn negotiate(stream: &mut TcpStream, auth: Option<&Socks5Auth>) -> Result<()> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;
    if header[0] != VER {
        return Err(EntryError::BadRequest(format!("bad SOCKS version {:#x}", header[0])));
    }

    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods)?;

    let chosen = if auth.is_some() && methods.contains(&METHOD_USER_PASS) {
        METHOD_USER_PASS
    } else if auth.is_none() && methods.contains(&METHOD_NO_AUTH) {
        METHOD_NO_AUTH
    } else {
        stream.write_all(&[VER, METHOD_NONE_ACCEPTABLE])?;
        return Err(EntryError::AuthFailed);
    };

    stream.write_all(&[VER, chosen])?;

    if chosen == METHOD_USER_PASS {
        sub_negotiate_user_pass(stream, auth.expect("auth required to reach this branch"))?;
    }

    Ok(())
}

fn sub_negotiate_user_pass(stream: &mut TcpStream, auth: &Socks5Auth) -> Result<()> {
    let mut ver = [0u8; 1];
    stream.read_exact(&mut ver)?;

    let mut ulen = [0u8; 1];
    stream.read_exact(&mut ulen)?;
    let mut user = vec![0u8; ulen[0] as usize];
    stream.read_exact(&mut user)?;

    let mut plen = [0u8; 1];
    stream.read_exact(&mut plen)?;
    let mut pass = vec![0u8; plen[0] as usize];
    stream.read_exact(&mut pass)?;

    let user = String::from_utf8_lossy(&user).to_string();
    let pass = String::from_utf8_lossy(&pass).to_string();

    if credentials_match(auth, &user, &pass) {
        stream.write_all(&[0x01, 0x00])?;
        Ok(())
    } else {
        stream.write_all(&[0x01, 0x01])?;
        Err(EntryError::AuthFailed)
    }
}

/// Parse the CONNECT request body. Only `CMD=0x01` is supported; anything
/// else gets reply `0x07` and a `BadRequest` error.
pub fn read_connect_request(stream: &mut TcpStream) -> Result<Destination> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let (ver, cmd, _rsv, atyp) = (header[0], header[1], header[2], header[3]);

    if ver != VER {
        return Err(EntryError::BadRequest(format!("bad SOCKS version {ver:#x}")));
    }

    if cmd != CMD_CONNECT {
        write_reply(stream, REPLY_COMMAND_NOT_SUPPORTED)?;
        return Err(EntryError::BadRequest(format!("unsupported command {cmd:#x}")));
    }

    let dest = match atyp {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr)?;
            let port = read_port(stream)?;
            Destination::Ip(std::net::Ipv4Addr::from(addr).into(), port)
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            let mut host = vec![0u8; len[0] as usize];
            stream.read_exact(&mut host)?;
            let host = String::from_utf8(host)
                .map_err(|_| EntryError::BadRequest("non-UTF8 hostname".into()))?;
            let port = read_port(stream)?;
            Destination::Domain(host, port)
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr)?;
            let port = read_port(stream)?;
            Destination::Ip(std::net::Ipv6Addr::from(addr).into(), port)
        }
        other => {
            write_reply(stream, REPLY_ATYP_NOT_SUPPORTED)?;
            return Err(EntryError::BadRequest(format!("unsupported ATYP {other:#x}")));
        }
    };

    Ok(dest)
}

fn read_port(stream: &mut TcpStream) -> Result<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Reply with `0x00 SUCCESS` and a bound address of `0.0.0.0:0` — the
/// server never reports the actual dialed source address (§4.7).
pub fn write_success_reply(stream: &mut TcpStream) -> Result<()> {
    write_reply(stream, REPLY_SUCCESS)
}

fn write_reply(stream: &mut TcpStream, code: u8) -> Result<()> {
    let mut reply = vec![VER, code, 0x00, ATYP_IPV4];
    reply.extend_from_slice(&[0, 0, 0, 0]);
    reply.extend_from_slice(&0u16.to_be_bytes());
    stream.write_all(&reply).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_match_requires_both_fields() {
        let auth = Socks5Auth {
            user: "bob".to_string(),
            pass: "s3cret".to_string(),
        };
        assert!(credentials_match(&auth, "bob", "s3cret"));
        assert!(!credentials_match(&auth, "bob", "wrong"));
        assert!(!credentials_match(&auth, "eve", "s3cret"));
    }
}
