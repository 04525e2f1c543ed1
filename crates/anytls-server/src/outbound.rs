//! Per-stream outbound proxying.
//!
//! Each session stream starts with a destination address. Ordinary
//! destinations get a TCP dial and a bidirectional relay; the
//! `udp-over-tcp.arpa` magic suffix routes into the UDP adapter instead.
//! Either way the stream receives one status byte before payload flows, so
//! the client learns whether the dial succeeded.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use anytls_session::{DestAddr, Stream, uot};

const HANDSHAKE_OK: u8 = 0x00;
const HANDSHAKE_FAILED: u8 = 0x01;

/// Handle one stream opened inside a session.
pub async fn handle_stream(mut stream: Stream) {
    let dest = match DestAddr::read_from(&mut stream).await {
        Ok(dest) => dest,
        Err(err) => {
            debug!(error = %err, "destination read failed");
            return;
        }
    };

    if dest.is_uot() {
        proxy_udp(stream).await;
    } else {
        proxy_tcp(stream, dest).await;
    }
}

async fn proxy_tcp(mut stream: Stream, dest: DestAddr) {
    let mut outbound = match TcpStream::connect(dest.to_string()).await {
        Ok(outbound) => outbound,
        Err(err) => {
            debug!(dest = %dest, error = %err, "outbound dial failed");
            let _ = stream.write_all(&[HANDSHAKE_FAILED]).await;
            return;
        }
    };

    if stream.write_all(&[HANDSHAKE_OK]).await.is_err() {
        return;
    }

    if let Err(err) = tokio::io::copy_bidirectional(&mut stream, &mut outbound).await {
        debug!(dest = %dest, error = %err, "relay ended");
    }
}

async fn proxy_udp(mut stream: Stream) {
    // The magic destination only selects the adapter; the real target
    // follows on the stream.
    let dest = match uot::read_request(&mut stream).await {
        Ok(dest) => dest,
        Err(err) => {
            debug!(error = %err, "uot request read failed");
            return;
        }
    };

    let socket = match bind_and_connect(&dest).await {
        Ok(socket) => socket,
        Err(err) => {
            debug!(dest = %dest, error = %err, "uot socket setup failed");
            let _ = stream.write_all(&[HANDSHAKE_FAILED]).await;
            return;
        }
    };

    if stream.write_all(&[HANDSHAKE_OK]).await.is_err() {
        return;
    }

    if let Err(err) = uot::relay(stream, socket).await {
        debug!(dest = %dest, error = %err, "uot relay ended");
    }
}

async fn bind_and_connect(dest: &DestAddr) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(dest.to_string()).await?;
    Ok(socket)
}
