//! TLS configuration loading.
//!
//! Uses the configured PEM pair when it loads; otherwise (missing paths or
//! unreadable files) generates a self-signed certificate at startup so the
//! server always comes up. TLS 1.2 is the floor either way.

use tokio_rustls::rustls::{
    self,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tracing::{info, warn};

use anytls_config::TlsConfig;

use crate::error::ServerError;

/// Build the rustls server config from the TLS section.
pub fn build_tls_config(cfg: &TlsConfig) -> Result<rustls::ServerConfig, ServerError> {
    let loaded = if !cfg.cert_file.is_empty() && !cfg.key_file.is_empty() {
        match load_keypair(&cfg.cert_file, &cfg.key_file) {
            Ok(pair) => {
                info!(cert = %cfg.cert_file, "loaded TLS certificate");
                Some(pair)
            }
            Err(err) => {
                warn!(
                    cert = %cfg.cert_file,
                    key = %cfg.key_file,
                    error = %err,
                    "failed to load TLS certificate, falling back to self-signed"
                );
                None
            }
        }
    } else {
        None
    };

    let (certs, key) = match loaded {
        Some(pair) => pair,
        None => {
            warn!("using self-signed certificate");
            self_signed()?
        }
    };

    let config = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(config)
}

fn load_keypair(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    let certs = load_certs(cert_path)?;
    if certs.is_empty() {
        return Err(ServerError::Certificate(format!(
            "no certificates in {cert_path}"
        )));
    }
    let key = load_private_key(key_path)?;
    Ok((certs, key))
}

/// Load certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect();
    Ok(certs)
}

/// Load a private key from a PEM file.
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Some(rustls_pemfile::Item::Sec1Key(key)) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Some(_) => continue,
            None => break,
        }
    }
    Err(ServerError::Certificate(format!(
        "no private key found in {path}"
    )))
}

/// Generate an in-memory self-signed certificate.
fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    let rcgen::CertifiedKey {
        cert, signing_key, ..
    } = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|err| ServerError::Certificate(err.to_string()))?;

    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(signing_key.serialize_der().into());
    Ok((vec![cert_der], key_der))
}
