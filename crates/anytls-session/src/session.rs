//! Server side of the multiplexed session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::PollSender;
use tracing::{debug, error, warn};

use crate::frame::{
    CMD_ALERT, CMD_FIN, CMD_HEART_REQUEST, CMD_HEART_RESPONSE, CMD_PSH, CMD_SETTINGS, CMD_SYN,
    CMD_UPDATE_PADDING_SCHEME, CMD_WASTE, Frame, HEADER_LEN,
};
use crate::padding::PaddingScheme;
use crate::stream::Stream;

const FRAME_CHANNEL: usize = 64;
const STREAM_CHANNEL: usize = 32;

/// Runs one authenticated connection until the peer goes away.
///
/// `on_stream` is invoked once per stream the client opens; each invocation
/// runs in its own task. Panics inside a handler are caught at the task
/// boundary and logged, never propagated.
pub struct ServerSession<S, F, Fut> {
    conn: S,
    on_stream: F,
    scheme: Arc<PaddingScheme>,
    _fut: std::marker::PhantomData<fn() -> Fut>,
}

impl<S, F, Fut> ServerSession<S, F, Fut>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    F: FnMut(Stream) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(conn: S, on_stream: F, scheme: Arc<PaddingScheme>) -> Self {
        Self {
            conn,
            on_stream,
            scheme,
            _fut: std::marker::PhantomData,
        }
    }

    /// Drive the session until the connection closes or the client alerts.
    pub async fn run(self) -> std::io::Result<()> {
        let Self {
            conn,
            mut on_stream,
            scheme,
            ..
        } = self;

        let (rd, wr) = tokio::io::split(conn);
        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(FRAME_CHANNEL);
        let writer = tokio::spawn(write_loop(wr, frame_rx, scheme.clone()));

        // Frame reads are not cancellation-safe, so reading gets its own task
        // and the dispatch loop selects over channels only.
        let (in_tx, mut in_rx) = mpsc::channel::<Frame>(FRAME_CHANNEL);
        let reader = tokio::spawn(async move {
            let mut rd = rd;
            loop {
                match Frame::read_from(&mut rd).await {
                    Ok(frame) => {
                        if in_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "session read ended");
                        return;
                    }
                }
            }
        });

        let mut streams: HashMap<u32, mpsc::Sender<Bytes>> = HashMap::new();
        let mut handlers: JoinSet<u32> = JoinSet::new();

        loop {
            tokio::select! {
                maybe = in_rx.recv() => {
                    let Some(frame) = maybe else { break };
                    match frame.cmd {
                        CMD_WASTE => {}
                        CMD_SYN => {
                            if streams.contains_key(&frame.sid) {
                                debug!(sid = frame.sid, "duplicate syn ignored");
                                continue;
                            }
                            let (tx, rx) = mpsc::channel(STREAM_CHANNEL);
                            streams.insert(frame.sid, tx);
                            let stream =
                                Stream::new(frame.sid, rx, PollSender::new(frame_tx.clone()));
                            let sid = frame.sid;
                            let fut = on_stream(stream);
                            handlers.spawn(async move {
                                fut.await;
                                sid
                            });
                        }
                        CMD_PSH => {
                            if let Some(tx) = streams.get(&frame.sid) {
                                if tx.send(frame.payload).await.is_err() {
                                    streams.remove(&frame.sid);
                                }
                            }
                        }
                        CMD_FIN => {
                            streams.remove(&frame.sid);
                        }
                        CMD_SETTINGS => {
                            let settings = parse_settings(&frame.payload);
                            if let Some(sum) = settings.get("padding-checksum") {
                                if *sum != scheme.checksum() {
                                    let update = Frame::with_payload(
                                        CMD_UPDATE_PADDING_SCHEME,
                                        0,
                                        Bytes::copy_from_slice(scheme.raw().as_bytes()),
                                    );
                                    if frame_tx.send(update).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        CMD_HEART_REQUEST => {
                            if frame_tx.send(Frame::new(CMD_HEART_RESPONSE, 0)).await.is_err() {
                                break;
                            }
                        }
                        CMD_ALERT => {
                            warn!(
                                message = %String::from_utf8_lossy(&frame.payload),
                                "client alert"
                            );
                            break;
                        }
                        other => {
                            debug!(cmd = other, "unknown frame command ignored");
                        }
                    }
                }
                Some(done) = handlers.join_next() => {
                    match done {
                        Ok(sid) => {
                            streams.remove(&sid);
                            if frame_tx.send(Frame::new(CMD_FIN, sid)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) if err.is_panic() => {
                            error!(error = %err, "stream handler panicked");
                        }
                        Err(_) => {}
                    }
                }
            }
        }

        // Session is over: close every stream, stop in-flight handlers, let
        // the writer drain what is already queued.
        reader.abort();
        streams.clear();
        handlers.abort_all();
        while let Some(done) = handlers.join_next().await {
            if let Err(err) = done {
                if err.is_panic() {
                    error!(error = %err, "stream handler panicked");
                }
            }
        }
        drop(frame_tx);
        let _ = writer.await;
        Ok(())
    }
}

/// Serialize outgoing frames, shaping early packets per the padding scheme.
async fn write_loop<W>(
    mut wr: W,
    mut rx: mpsc::Receiver<Frame>,
    scheme: Arc<PaddingScheme>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut pkt: u32 = 0;
    let mut buf = BytesMut::new();

    while let Some(frame) = rx.recv().await {
        buf.clear();
        frame.encode(&mut buf);
        // Batch whatever is already queued into the same packet.
        while let Ok(next) = rx.try_recv() {
            next.encode(&mut buf);
        }

        if pkt < scheme.stop() {
            let mut rest = buf.split();
            for chunk in scheme.plan(pkt, rest.len()) {
                let mut piece = rest.split_to(chunk.data_len.min(rest.len()));
                if chunk.pad_len > 0 {
                    Frame::waste(chunk.pad_len.saturating_sub(HEADER_LEN)).encode(&mut piece);
                }
                wr.write_all(&piece).await?;
                wr.flush().await?;
                pkt += 1;
            }
        } else {
            wr.write_all(&buf).await?;
            wr.flush().await?;
            pkt = pkt.saturating_add(1);
        }
    }

    let _ = wr.shutdown().await;
    Ok(())
}

fn parse_settings(payload: &[u8]) -> HashMap<String, String> {
    let mut settings = HashMap::new();
    let Ok(text) = std::str::from_utf8(payload) else {
        return settings;
    };
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            settings.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    fn plain_scheme() -> Arc<PaddingScheme> {
        // stop=0 disables shaping so tests see exact frames
        Arc::new(PaddingScheme::parse(b"stop=0").unwrap())
    }

    async fn next_data_frame<R: AsyncRead + Unpin>(r: &mut R) -> Frame {
        loop {
            let frame = Frame::read_from(r).await.unwrap();
            if frame.cmd != CMD_WASTE {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn stream_echo_and_fin() {
        let (mut client, server) = duplex(16 * 1024);

        let session = ServerSession::new(
            server,
            |mut stream| async move {
                let mut data = Vec::new();
                stream.read_to_end(&mut data).await.unwrap();
                stream.write_all(&data).await.unwrap();
            },
            plain_scheme(),
        );
        let run = tokio::spawn(session.run());

        let mut buf = BytesMut::new();
        Frame::new(CMD_SYN, 1).encode(&mut buf);
        Frame::with_payload(CMD_PSH, 1, Bytes::from_static(b"ping")).encode(&mut buf);
        Frame::new(CMD_FIN, 1).encode(&mut buf);
        client.write_all(&buf).await.unwrap();

        let frame = next_data_frame(&mut client).await;
        assert_eq!(frame.cmd, CMD_PSH);
        assert_eq!(frame.sid, 1);
        assert_eq!(&frame.payload[..], b"ping");

        let frame = next_data_frame(&mut client).await;
        assert_eq!(frame.cmd, CMD_FIN);
        assert_eq!(frame.sid, 1);

        drop(client);
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn heartbeat_answered() {
        let (mut client, server) = duplex(4096);
        let session = ServerSession::new(server, |_stream| async {}, plain_scheme());
        let run = tokio::spawn(session.run());

        let mut buf = BytesMut::new();
        Frame::new(CMD_HEART_REQUEST, 0).encode(&mut buf);
        client.write_all(&buf).await.unwrap();

        let frame = next_data_frame(&mut client).await;
        assert_eq!(frame.cmd, CMD_HEART_RESPONSE);

        drop(client);
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn settings_mismatch_pushes_scheme() {
        let (mut client, server) = duplex(4096);
        let scheme = plain_scheme();
        let session = ServerSession::new(server, |_stream| async {}, scheme.clone());
        let run = tokio::spawn(session.run());

        let mut buf = BytesMut::new();
        Frame::with_payload(
            CMD_SETTINGS,
            0,
            Bytes::from_static(b"v=1\npadding-checksum=not-the-right-one"),
        )
        .encode(&mut buf);
        client.write_all(&buf).await.unwrap();

        let frame = next_data_frame(&mut client).await;
        assert_eq!(frame.cmd, CMD_UPDATE_PADDING_SCHEME);
        assert_eq!(&frame.payload[..], scheme.raw().as_bytes());

        drop(client);
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let (mut client, server) = duplex(4096);
        let session = ServerSession::new(
            server,
            |_stream| async { panic!("boom") },
            plain_scheme(),
        );
        let run = tokio::spawn(session.run());

        let mut buf = BytesMut::new();
        Frame::new(CMD_SYN, 9).encode(&mut buf);
        // a second stream proves the session survived the panic
        Frame::new(CMD_HEART_REQUEST, 0).encode(&mut buf);
        client.write_all(&buf).await.unwrap();

        let frame = next_data_frame(&mut client).await;
        assert_eq!(frame.cmd, CMD_HEART_RESPONSE);

        drop(client);
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn early_packets_are_shaped() {
        let (mut client, server) = duplex(16 * 1024);
        let scheme = Arc::new(PaddingScheme::parse(b"stop=1\n0=200-200").unwrap());
        let session = ServerSession::new(
            server,
            |mut stream| async move {
                stream.write_all(b"x").await.unwrap();
            },
            scheme,
        );
        let run = tokio::spawn(session.run());

        let mut buf = BytesMut::new();
        Frame::new(CMD_SYN, 1).encode(&mut buf);
        client.write_all(&buf).await.unwrap();

        // First shaped packet: the tiny psh frame plus waste up to ~200 bytes.
        let frame = Frame::read_from(&mut client).await.unwrap();
        assert_eq!(frame.cmd, CMD_PSH);
        let waste = Frame::read_from(&mut client).await.unwrap();
        assert_eq!(waste.cmd, CMD_WASTE);

        drop(client);
        run.await.unwrap().unwrap();
    }
}
