//! Per-connection admission pipeline.
//!
//! From accept to session hand-off: ban check, TLS handshake, one cached
//! read, 32-byte secret hash, user lookup, padding skip, device limit,
//! counter/limiter binding, liveness enrollment, session. Every
//! authentication failure rewinds the cached bytes and routes into the
//! fallback so a probe sees the decoy site's byte stream.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use anytls_core::defaults::{AUTH_HASH_LEN, INITIAL_READ_BUFFER};
use anytls_core::io::CachedStream;
use anytls_session::ServerSession;

use crate::conn::TrafficStream;
use crate::outbound::handle_stream;
use crate::state::ServerState;

/// Handle one accepted connection to completion.
pub async fn handle_connection(
    tcp: TcpStream,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
    peer: SocketAddr,
) {
    let ip = peer.ip().to_string();

    if state.bans.is_banned(&ip) {
        debug!(ip = %ip, "banned address, closing");
        return;
    }

    // Handshake failure closes without fallback: the raw connection never
    // produced buffered plaintext to replay.
    let mut tls = match acceptor.accept(tcp).await {
        Ok(tls) => tls,
        Err(err) => {
            debug!(ip = %ip, error = %err, "TLS handshake failed");
            return;
        }
    };

    // One chunk is all the authentication prefix gets; a client that sends
    // less is treated like one that sent garbage.
    let mut first = BytesMut::with_capacity(INITIAL_READ_BUFFER);
    match tls.read_buf(&mut first).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(err) => {
            debug!(ip = %ip, error = %err, "first read failed");
            return;
        }
    }
    let mut cached = CachedStream::new(first.freeze(), tls);

    let Some(hash) = cached.consume(AUTH_HASH_LEN) else {
        return reject(&state, &ip, cached).await;
    };

    let Some(user) = state.users.authenticate(&hash) else {
        debug!(ip = %ip, "authentication failed");
        return reject(&state, &ip, cached).await;
    };

    // Skip client padding: u16 length, then that many opaque bytes.
    let Some(len_bytes) = cached.consume(2) else {
        return reject(&state, &ip, cached).await;
    };
    let padding_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    if padding_len > 0 && cached.consume(padding_len).is_none() {
        return reject(&state, &ip, cached).await;
    }

    // Device cap is enforced against fleet-wide counts; when the panel is
    // unreachable the connection is admitted rather than dropped.
    if user.device_limit > 0 {
        if let Some(panel) = &state.panel {
            match panel.fetch_aliveness().await {
                Ok(counts) => {
                    if !state.alive.check_limit(user.id, user.device_limit, &counts) {
                        info!(
                            user_id = user.id,
                            device_limit = user.device_limit,
                            "device limit reached, rejecting"
                        );
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "aliveness fetch failed, skipping device limit check");
                }
            }
        }
    }

    let bucket = state.speed.get(user.id, user.speed_limit);
    let conn = TrafficStream::new(cached, user.id, state.traffic.clone(), bucket);

    state.alive.track(user.id, &ip);
    debug!(user_id = user.id, ip = %ip, "authenticated, starting session");

    let session = ServerSession::new(conn, handle_stream, anytls_session::current_scheme());
    if let Err(err) = session.run().await {
        debug!(user_id = user.id, error = %err, "session ended with error");
    }

    state.alive.remove(user.id, &ip);
}

/// Failed authentication: rewind the cached bytes, count the failure, hand
/// the connection to the decoy. Never tells the client anything.
async fn reject(state: &ServerState, ip: &str, mut cached: CachedStream<TlsStream<TcpStream>>) {
    cached.rewind();
    state.bans.record(ip);
    state.fallback.handle(cached).await;
}
