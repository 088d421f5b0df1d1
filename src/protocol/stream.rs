//! Table-substituted stream transport.
//!
//! Wraps a byte transport so that every byte written is passed through the
//! encode permutation and every byte read through the decode permutation.
//! The cipher keeps no per-byte state (no IV, no counter), which is what
//! makes the wrapper this small: a short write can simply re-encode the
//! remaining bytes on the next call.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::ready;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::crypto::EncryptTable;
use crate::error::{Error, Result};

/// Size of the per-connection encode scratch buffer.
const SCRATCH_SIZE: usize = 4096;

/// A byte transport with table substitution in both directions.
pub struct CipherStream<T> {
    inner: T,
    table: Arc<EncryptTable>,
    scratch: Box<[u8; SCRATCH_SIZE]>,
}

impl<T> CipherStream<T> {
    /// Wrap an existing transport.
    pub fn new(inner: T, table: Arc<EncryptTable>) -> Self {
        Self {
            inner,
            table,
            scratch: Box::new([0u8; SCRATCH_SIZE]),
        }
    }

    /// The table this connection substitutes with.
    pub fn table(&self) -> &Arc<EncryptTable> {
        &self.table
    }
}

impl CipherStream<TcpStream> {
    /// Connect to a server and send `raw_addr` as the encrypted preamble.
    ///
    /// The address header must be the very first bytes of the tunnel; any
    /// failure while sending it closes the transport and surfaces the error.
    pub async fn dial(raw_addr: &[u8], server: &str, table: Arc<EncryptTable>) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| Error::dial(server, e))?;
        let mut conn = Self::new(stream, table);
        conn.write_all(raw_addr).await?;
        Ok(conn)
    }
}

impl<T> std::fmt::Debug for CipherStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherStream").finish_non_exhaustive()
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for CipherStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = Pin::into_inner(self);
        let filled = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.table.decode_in_place(&mut buf.filled_mut()[filled..]);
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for CipherStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = Pin::into_inner(self);
        let n = buf.len().min(SCRATCH_SIZE);
        this.table.encode_into(&buf[..n], &mut this.scratch[..n]);
        Pin::new(&mut this.inner).poll_write(cx, &this.scratch[..n])
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut Pin::into_inner(self).inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut Pin::into_inner(self).inner).poll_shutdown(cx)
    }
}
