//! UDP-over-TCP adapter.
//!
//! A stream whose destination carries the magic suffix does not open a TCP
//! connection; instead it tunnels datagrams. The stream begins with the real
//! UDP destination, then both directions carry `[len u16][payload]` records.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::addr::DestAddr;

/// Largest datagram the adapter will carry.
pub const MAX_DATAGRAM: usize = 65_535;

/// Read the tunnelled UDP destination that prefixes the stream.
pub async fn read_request<R>(r: &mut R) -> std::io::Result<DestAddr>
where
    R: AsyncRead + Unpin,
{
    DestAddr::read_from(r).await
}

/// Relay datagrams between the stream and a connected UDP socket until the
/// stream closes or the socket errors.
pub async fn relay<S>(stream: S, socket: UdpSocket) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut rd, mut wr) = tokio::io::split(stream);

    let up = async {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = rd.read_u16().await? as usize;
            rd.read_exact(&mut buf[..len]).await?;
            socket.send(&buf[..len]).await?;
        }
        #[allow(unreachable_code)]
        Ok::<(), std::io::Error>(())
    };

    let down = async {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = socket.recv(&mut buf).await?;
            wr.write_u16(n as u16).await?;
            wr.write_all(&buf[..n]).await?;
            wr.flush().await?;
        }
        #[allow(unreachable_code)]
        Ok::<(), std::io::Error>(())
    };

    // Whichever direction ends first tears the tunnel down; the usual case
    // is the stream closing, which surfaces as an EOF error in `up`.
    tokio::select! {
        result = up => {
            if let Err(err) = result {
                debug!(error = %err, "uot upstream ended");
            }
        }
        result = down => {
            if let Err(err) = result {
                debug!(error = %err, "uot downstream ended");
            }
        }
    }
    Ok(())
}
