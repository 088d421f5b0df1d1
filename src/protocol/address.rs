//! Target address header codec.
//!
//! Tagged header: `0x01` is 4 IPv4 bytes + big-endian port, `0x03` is a
//! length-prefixed domain + big-endian port. Tag `0x04` (IPv6) is reserved
//! and rejected in this cipher generation.

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// IPv4 address tag.
pub const ATYP_IPV4: u8 = 0x01;
/// Domain-name address tag.
pub const ATYP_DOMAIN: u8 = 0x03;

/// A decoded target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Literal IPv4 address and port.
    Ipv4(Ipv4Addr, u16),
    /// Domain name and port; resolution is left to the dialing side's OS.
    Domain(String, u16),
}

impl Address {
    /// Decode an address header from the start of a stream.
    ///
    /// Reads exactly the bytes the tag dictates and nothing further, so the
    /// payload that follows the header stays in the stream. An unknown tag
    /// fails without consuming the body.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        Self::read_from_with_timeout(reader, None).await
    }

    /// Decode an address header, re-arming an idle deadline before each read.
    ///
    /// The deadline behaves like the relay's: it restarts on every
    /// successful read, so a slow peer survives as long as bytes keep
    /// landing, and expiry surfaces as a `TimedOut` I/O error.
    pub async fn read_from_with_timeout<R: AsyncRead + Unpin>(
        reader: &mut R,
        idle: Option<Duration>,
    ) -> Result<Self> {
        let mut tag = [0u8; 1];
        read_full(reader, &mut tag, idle).await?;

        match tag[0] {
            ATYP_IPV4 => {
                let mut body = [0u8; 6];
                read_full(reader, &mut body, idle).await?;
                let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
                let port = u16::from_be_bytes([body[4], body[5]]);
                Ok(Address::Ipv4(ip, port))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                read_full(reader, &mut len, idle).await?;
                if len[0] == 0 {
                    return Err(Error::UnsupportedAddressType);
                }
                let mut body = vec![0u8; len[0] as usize + 2];
                read_full(reader, &mut body, idle).await?;
                let domain = String::from_utf8_lossy(&body[..len[0] as usize]).to_string();
                let port = u16::from_be_bytes([body[len[0] as usize], body[len[0] as usize + 1]]);
                Ok(Address::Domain(domain, port))
            }
            _ => Err(Error::UnsupportedAddressType),
        }
    }

    /// Encode the header into a byte vector.
    ///
    /// The local side normally forwards the SOCKS5 request slice instead of
    /// calling this; the encoding exists for symmetric use and tests.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Address::Ipv4(ip, port) => {
                let mut buf = Vec::with_capacity(7);
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
            Address::Domain(domain, port) => {
                let mut buf = Vec::with_capacity(4 + domain.len());
                buf.push(ATYP_DOMAIN);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                buf
            }
        }
    }

    /// The target port.
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) | Address::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for Address {
    /// Renders the `host:port` form handed to the OS resolver.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// Fill `buf` completely, with a fresh idle deadline per read call.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    idle: Option<Duration>,
) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = match idle {
            Some(deadline) => {
                match tokio::time::timeout(deadline, reader.read(&mut buf[filled..])).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout").into());
                    }
                }
            }
            None => reader.read(&mut buf[filled..]).await?,
        };
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(())
}
