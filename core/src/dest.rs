//! CONNECT destination encoding (§6.2).
//!
//! The entry client encodes the requested destination as the payload of a
//! `DATA|HANDSHAKE` packet; the exit server decodes it before dialing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{HtError, Result};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Ip(IpAddr, u16),
    Domain(String, u16),
}

impl Destination {
    pub fn port(&self) -> u16 {
        match self {
            Destination::Ip(_, port) => *port,
            Destination::Domain(_, port) => *port,
        }
    }

    /// Textual host:port form suitable for `TcpStream::connect`.
    pub fn to_socket_string(&self) -> String {
        match self {
            Destination::Ip(IpAddr::V6(ip), port) => format!("[{ip}]:{port}"),
            Destination::Ip(ip, port) => format!("{ip}:{port}"),
            Destination::Domain(host, port) => format!("{host}:{port}"),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Destination::Ip(IpAddr::V4(ip), port) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Destination::Ip(IpAddr::V6(ip), port) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Destination::Domain(host, port) => {
                out.push(ATYP_DOMAIN);
                out.push(host.len() as u8);
                out.extend_from_slice(host.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(HtError::BadDestination("empty destination payload".into()));
        }

        let atyp = bytes[0];
        match atyp {
            ATYP_IPV4 => {
                if bytes.len() != 1 + 4 + 2 {
                    return Err(HtError::BadDestination("bad IPv4 destination length".into()));
                }
                let ip = Ipv4Addr::new(bytes[1], bytes[2], bytes[3], bytes[4]);
                let port = u16::from_be_bytes([bytes[5], bytes[6]]);
                Ok(Destination::Ip(IpAddr::V4(ip), port))
            }
            ATYP_IPV6 => {
                if bytes.len() != 1 + 16 + 2 {
                    return Err(HtError::BadDestination("bad IPv6 destination length".into()));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[1..17]);
                let port = u16::from_be_bytes([bytes[17], bytes[18]]);
                Ok(Destination::Ip(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            ATYP_DOMAIN => {
                if bytes.len() < 2 {
                    return Err(HtError::BadDestination("truncated domain destination".into()));
                }
                let len = bytes[1] as usize;
                if bytes.len() != 2 + len + 2 {
                    return Err(HtError::BadDestination("bad domain destination length".into()));
                }
                let host = std::str::from_utf8(&bytes[2..2 + len])
                    .map_err(|_| HtError::BadDestination("non-UTF8 hostname".into()))?
                    .to_string();
                let port = u16::from_be_bytes([bytes[2 + len], bytes[3 + len]]);
                Ok(Destination::Domain(host, port))
            }
            other => Err(HtError::BadDestination(format!("unsupported ATYP {other:#04x}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_round_trips() {
        let d = Destination::Ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 7);
        assert_eq!(Destination::decode(&d.encode()).unwrap(), d);
    }

    #[test]
    fn ipv6_round_trips() {
        let d = Destination::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        assert_eq!(Destination::decode(&d.encode()).unwrap(), d);
    }

    #[test]
    fn domain_round_trips() {
        let d = Destination::Domain("example.com".to_string(), 80);
        assert_eq!(Destination::decode(&d.encode()).unwrap(), d);
    }

    #[test]
    fn unsupported_atyp_is_hard_error() {
        assert!(matches!(
            Destination::decode(&[0x02, 0, 0]),
            Err(HtError::BadDestination(_))
        ));
    }

    #[test]
    fn empty_payload_is_hard_error() {
        assert!(matches!(
            Destination::decode(&[]),
            Err(HtError::BadDestination(_))
        ));
    }

    #[test]
    fn truncated_ipv4_is_rejected() {
        assert!(matches!(
            Destination::decode(&[ATYP_IPV4, 1, 2, 3]),
            Err(HtError::BadDestination(_))
        ));
    }
}
