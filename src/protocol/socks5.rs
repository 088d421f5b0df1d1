//! SOCKS5 front-end state machine.
//!
//! Two phases on an accepted client connection: method negotiation, then the
//! CONNECT request. Only "no auth" and CONNECT are supported. The parser is
//! strict about message boundaries — bytes past the end of either message
//! mean a confused client, and the session is dropped rather than risk
//! misinterpreting phase-2 bytes as phase-1 padding.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::address::{ATYP_DOMAIN, ATYP_IPV4};

/// SOCKS protocol version handled here.
pub const SOCKS_VERSION: u8 = 0x05;
/// The only supported command.
pub const CMD_CONNECT: u8 = 0x01;
/// The only offered authentication method.
const METHOD_NO_AUTH: u8 = 0x00;

/// Largest method-negotiation message: version + nmethods + 255 methods.
const MAX_NEGOTIATION_LEN: usize = 258;
/// Largest CONNECT request: ver+cmd+rsv+tag + 1 len + 255 domain + 2 port.
const MAX_REQUEST_LEN: usize = 263;

/// Fixed success reply: version 5, succeeded, bound address 0.0.0.0:2115.
///
/// Sent before the tunnel dial completes; if the dial then fails the client
/// sees a reset on its first payload write. Trading that error case for a
/// round trip on every session is deliberate.
pub const CONNECT_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0x08, 0x43];

/// Read into `buf` until at least `min` bytes have arrived.
async fn read_at_least<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    min: usize,
) -> Result<usize> {
    let mut n = 0;
    while n < min {
        let read = reader.read(&mut buf[n..]).await?;
        if read == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        n += read;
    }
    Ok(n)
}

/// Phase 1: method negotiation.
///
/// Accepts any method list (the choice is always "no auth") but refuses a
/// message that runs past its declared length, since those bytes would
/// belong to the request.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut S) -> Result<()> {
    let mut buf = [0u8; MAX_NEGOTIATION_LEN];

    let n = read_at_least(conn, &mut buf, 2).await?;
    if buf[0] != SOCKS_VERSION {
        return Err(Error::UnsupportedVersion);
    }

    let msg_len = 2 + buf[1] as usize;
    if n < msg_len {
        conn.read_exact(&mut buf[n..msg_len]).await?;
    } else if n > msg_len {
        return Err(Error::AuthExtraData);
    }

    conn.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Phase 2: CONNECT request.
///
/// Returns the raw address — the request bytes from the address tag through
/// the port, which are exactly the tunnel's address header and are forwarded
/// without re-encoding.
pub async fn read_request<S: AsyncRead + Unpin>(conn: &mut S) -> Result<Vec<u8>> {
    let mut buf = [0u8; MAX_REQUEST_LEN];

    // Read through the domain-length byte so the total length is known.
    let n = read_at_least(conn, &mut buf, 5).await?;
    if buf[0] != SOCKS_VERSION {
        return Err(Error::UnsupportedVersion);
    }
    if buf[1] != CMD_CONNECT {
        return Err(Error::UnsupportedCommand);
    }

    let req_len = match buf[3] {
        ATYP_IPV4 => 4 + 4 + 2,
        ATYP_DOMAIN => 5 + buf[4] as usize + 2,
        _ => return Err(Error::UnsupportedAddressType),
    };

    if n < req_len {
        conn.read_exact(&mut buf[n..req_len]).await?;
    } else if n > req_len {
        return Err(Error::RequestExtraData);
    }

    Ok(buf[3..req_len].to_vec())
}
