//! Connection wrapper binding traffic accounting and speed limiting.
//!
//! Wraps the authenticated connection before it enters the session library:
//! every read accumulates download bytes, every write upload bytes, protocol
//! overhead and padding included. When the user has a speed bucket, the
//! transfer that moved the bytes is the one that suspends: a read that
//! cannot pay its debit stages the bytes and returns pending until tokens
//! refill; a write stays pending until the debit clears and only then
//! reports the bytes the inner stream accepted. Flush and shutdown settle
//! any outstanding debit before completing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use anytls_panel::TrafficCounter;

use crate::speed::SpeedBucket;

type WaitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A debit the inner stream has already absorbed: the write completes with
/// `accepted` bytes once `wait` resolves.
struct WriteDebt {
    wait: WaitFuture,
    accepted: usize,
}

pub struct TrafficStream<S> {
    inner: S,
    user_id: i64,
    counter: TrafficCounter,
    bucket: Option<Arc<SpeedBucket>>,
    read_wait: Option<WaitFuture>,
    /// Bytes read from the inner stream while their debit was pending,
    /// delivered once the wait resolves.
    staged: Bytes,
    write_debt: Option<WriteDebt>,
}

impl<S> TrafficStream<S> {
    pub fn new(
        inner: S,
        user_id: i64,
        counter: TrafficCounter,
        bucket: Option<Arc<SpeedBucket>>,
    ) -> Self {
        Self {
            inner,
            user_id,
            counter,
            bucket,
            read_wait: None,
            staged: Bytes::new(),
            write_debt: None,
        }
    }
}

fn make_wait(bucket: &Arc<SpeedBucket>, n: usize) -> WaitFuture {
    let bucket = bucket.clone();
    Box::pin(async move { bucket.wait(n).await })
}

impl<S: AsyncRead + Unpin> AsyncRead for TrafficStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if let Some(wait) = this.read_wait.as_mut() {
            ready!(wait.as_mut().poll(cx));
            this.read_wait = None;
        }
        if !this.staged.is_empty() {
            let to_copy = this.staged.len().min(buf.remaining());
            buf.put_slice(&this.staged.split_to(to_copy));
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        if n > 0 {
            this.counter.add(this.user_id, 0, n as u64);
            if let Some(bucket) = &this.bucket {
                let mut wait = make_wait(bucket, n);
                if wait.as_mut().poll(cx).is_pending() {
                    // Withdraw the bytes from the caller's view and suspend
                    // this read until the debit is paid.
                    this.staged = Bytes::copy_from_slice(&buf.filled()[before..]);
                    buf.set_filled(before);
                    this.read_wait = Some(wait);
                    return Poll::Pending;
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrafficStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        if let Some(debt) = this.write_debt.as_mut() {
            ready!(debt.wait.as_mut().poll(cx));
            let accepted = debt.accepted;
            this.write_debt = None;
            // the inner stream took these bytes when the debt was incurred
            return Poll::Ready(Ok(accepted));
        }

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, data))?;
        if n > 0 {
            this.counter.add(this.user_id, n as u64, 0);
            if let Some(bucket) = &this.bucket {
                let mut wait = make_wait(bucket, n);
                if wait.as_mut().poll(cx).is_pending() {
                    this.write_debt = Some(WriteDebt { wait, accepted: n });
                    return Poll::Pending;
                }
            }
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if let Some(debt) = this.write_debt.as_mut() {
            ready!(debt.wait.as_mut().poll(cx));
            this.write_debt = None;
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if let Some(debt) = this.write_debt.as_mut() {
            ready!(debt.wait.as_mut().poll(cx));
            this.write_debt = None;
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
