//! Bidirectional byte pump.
//!
//! Runs the two copy directions concurrently; the first one to stop — clean
//! EOF, I/O error, or idle-deadline expiry — wins the race, the other is
//! cancelled at its await point, and both transports are closed when their
//! halves drop. Half-close is a normal way for a session to end, so errors
//! here are logged at debug and never propagated.

use std::time::Duration;

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy buffer per direction.
const RELAY_BUF_SIZE: usize = 4096;

/// Pump bytes both ways until either direction stops.
pub async fn relay<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    relay_inner(a, b, None).await
}

/// Pump bytes both ways, closing the session when no read completes within
/// `idle` in either direction. The deadline restarts on every successful
/// read.
pub async fn relay_with_timeout<A, B>(a: A, b: B, idle: Duration)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    relay_inner(a, b, Some(idle)).await
}

async fn relay_inner<A, B>(a: A, b: B, idle: Option<Duration>)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = io::split(a);
    let (mut b_read, mut b_write) = io::split(b);

    tokio::select! {
        result = pump(&mut a_read, &mut b_write, idle) => {
            if let Err(e) = result {
                tracing::debug!("relay a->b ended: {}", e);
            }
        }
        result = pump(&mut b_read, &mut a_write, idle) => {
            if let Err(e) = result {
                tracing::debug!("relay b->a ended: {}", e);
            }
        }
    }
    // Both transports drop here, closing them and unblocking any peer.
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, idle: Option<Duration>) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = match idle {
            Some(deadline) => match tokio::time::timeout(deadline, reader.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
                }
            },
            None => reader.read(&mut buf).await?,
        };
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
