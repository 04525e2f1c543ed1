//! Stream destination addresses.
//!
//! Each opened stream starts with a socks-style destination: one address
//! type byte, the address, then a big-endian port.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Domain suffix that routes a stream into the UDP-over-TCP adapter instead
/// of a plain TCP dial. Matched by suffix: clients send names like
/// `<session>.udp-over-tcp.arpa`.
pub const UOT_MAGIC_SUFFIX: &str = "udp-over-tcp.arpa";

/// Destination of one session stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAddr {
    Ipv4(Ipv4Addr, u16),
    Ipv6(Ipv6Addr, u16),
    Domain(String, u16),
}

impl DestAddr {
    /// Read one destination from the stream.
    pub async fn read_from<R>(r: &mut R) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = r.read_u8().await?;
        match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                r.read_exact(&mut octets).await?;
                let port = r.read_u16().await?;
                Ok(Self::Ipv4(Ipv4Addr::from(octets), port))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                r.read_exact(&mut octets).await?;
                let port = r.read_u16().await?;
                Ok(Self::Ipv6(Ipv6Addr::from(octets), port))
            }
            ATYP_DOMAIN => {
                let len = r.read_u8().await? as usize;
                let mut name = vec![0u8; len];
                r.read_exact(&mut name).await?;
                let name = String::from_utf8(name).map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "domain is not utf-8")
                })?;
                let port = r.read_u16().await?;
                Ok(Self::Domain(name, port))
            }
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown address type {other:#x}"),
            )),
        }
    }

    /// Serialize into `buf` in wire order.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Self::Ipv4(ip, port) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&ip.octets());
                buf.put_u16(*port);
            }
            Self::Ipv6(ip, port) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&ip.octets());
                buf.put_u16(*port);
            }
            Self::Domain(name, port) => {
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(name.len().min(255) as u8);
                buf.put_slice(&name.as_bytes()[..name.len().min(255)]);
                buf.put_u16(*port);
            }
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Ipv4(_, port) | Self::Ipv6(_, port) | Self::Domain(_, port) => *port,
        }
    }

    /// True when this destination selects the UDP-over-TCP adapter.
    pub fn is_uot(&self) -> bool {
        matches!(self, Self::Domain(name, _) if name.ends_with(UOT_MAGIC_SUFFIX))
    }
}

impl fmt::Display for DestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip, port) => write!(f, "{ip}:{port}"),
            Self::Ipv6(ip, port) => write!(f, "[{ip}]:{port}"),
            Self::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}
