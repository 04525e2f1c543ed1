//! Fallback forwarding for failed authentications.
//!
//! Relaying the untouched byte stream to a real HTTPS origin makes a probe
//! indistinguishable from talking to that origin directly. The pipeline
//! hands us the cached connection with its buffer rewound, so the bytes the
//! authentication attempt consumed replay to the decoy first.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use anytls_core::defaults::FALLBACK_DIAL_TIMEOUT;

/// Opaque TCP relay to a configured decoy target.
#[derive(Debug)]
pub struct Fallback {
    target: Option<String>,
}

impl Fallback {
    /// An empty target disables the decoy: connections are just closed.
    pub fn new(target: &str) -> Self {
        Self {
            target: (!target.is_empty()).then(|| target.to_string()),
        }
    }

    /// Relay `conn` against the decoy until either side closes.
    pub async fn handle<S>(&self, mut conn: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(target) = &self.target else {
            // dropping the connection closes it
            return;
        };

        let mut remote =
            match tokio::time::timeout(FALLBACK_DIAL_TIMEOUT, TcpStream::connect(target)).await {
                Ok(Ok(remote)) => remote,
                Ok(Err(err)) => {
                    debug!(target = %target, error = %err, "fallback dial failed");
                    return;
                }
                Err(_) => {
                    debug!(target = %target, "fallback dial timed out");
                    return;
                }
            };

        match tokio::io::copy_bidirectional(&mut conn, &mut remote).await {
            Ok((up, down)) => {
                debug!(target = %target, up, down, "fallback relay finished");
            }
            Err(err) => {
                debug!(target = %target, error = %err, "fallback relay ended");
            }
        }
    }
}
