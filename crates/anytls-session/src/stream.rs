//! One logical stream inside a session.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::frame::{CMD_PSH, Frame, MAX_PAYLOAD};

/// A multiplexed byte stream handed to the per-stream handler.
///
/// Reads drain data frames routed by the session; writes become data frames
/// on the shared connection. End-of-stream is signalled by the session when
/// the peer closes the stream, and the session emits the closing frame for
/// the peer once the handler finishes.
pub struct Stream {
    id: u32,
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    out: PollSender<Frame>,
}

impl Stream {
    pub(crate) fn new(id: u32, rx: mpsc::Receiver<Bytes>, out: PollSender<Frame>) -> Self {
        Self {
            id,
            rx,
            pending: Bytes::new(),
            out,
        }
    }

    /// Stream id within the session.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let to_copy = self.pending.len().min(buf.remaining());
                buf.put_slice(&self.pending.split_to(to_copy));
                return Poll::Ready(Ok(()));
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    self.pending = chunk;
                }
                // Sender dropped: the peer closed the stream.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let n = data.len().min(MAX_PAYLOAD);
        match self.out.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {
                let frame =
                    Frame::with_payload(CMD_PSH, self.id, Bytes::copy_from_slice(&data[..n]));
                if self.out.send_item(frame).is_err() {
                    return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
                }
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Frames are flushed by the session writer.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
