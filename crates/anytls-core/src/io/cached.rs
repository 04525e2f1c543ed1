//! Cached stream adapter for replaying buffered data.
//!
//! The admission pipeline reads one chunk from a fresh TLS connection and
//! parses the authentication prefix out of it. When authentication fails the
//! connection is handed to the fallback forwarder, which must see the exact
//! byte stream the client produced, including the bytes already consumed
//! during the attempt. `CachedStream` keeps that first chunk, lets the
//! pipeline consume from it, and can rewind so reads replay it from the start
//! before falling through to the live stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A stream wrapper whose reads drain a cached prefix before the inner stream.
pub struct CachedStream<S> {
    cache: Bytes,
    pos: usize,
    inner: S,
}

impl<S> CachedStream<S> {
    /// Wrap `inner`, serving `cache` before any live read.
    pub fn new(cache: Bytes, inner: S) -> Self {
        Self {
            cache,
            pos: 0,
            inner,
        }
    }

    /// Consume exactly `n` bytes from the cache.
    ///
    /// Returns `None` without advancing when fewer than `n` bytes remain;
    /// the caller is expected to [`rewind`](Self::rewind) and fall back.
    /// The returned bytes share the cache's allocation.
    pub fn consume(&mut self, n: usize) -> Option<Bytes> {
        if self.cache.len() - self.pos < n {
            return None;
        }
        let start = self.pos;
        self.pos += n;
        Some(self.cache.slice(start..self.pos))
    }

    /// Reset the read cursor so the whole cache replays again.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Bytes of cache not yet read.
    pub fn remaining(&self) -> usize {
        self.cache.len() - self.pos
    }

    /// Consumes the wrapper, returning the inner stream.
    ///
    /// Any unread cache bytes are lost.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CachedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.pos < self.cache.len() {
            let remaining = &self.cache[self.pos..];
            let to_copy = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.pos += to_copy;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CachedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
