//! TLS key material loading and the server-side handshake.
//!
//! Certificates and keys are read from PEM.  The first `CERTIFICATE` blocks
//! form the chain; the first private key of any supported kind (PKCS#8,
//! PKCS#1 RSA, SEC1 EC) is used.  The `ring` provider is selected
//! explicitly, so no process-wide crypto provider has to be installed.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::ring::default_provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors from loading key material or completing a handshake.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed PEM in {label}: {source}")]
    Pem {
        label: String,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("TLS handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("TLS handshake abandoned")]
    Cancelled,
}

/// Builds an acceptor from a PEM certificate chain file and a PEM key file.
///
/// # Errors
///
/// Returns [`TlsError`] if either file cannot be read, holds no usable
/// material, or the key does not match the certificate.
pub fn load_acceptor(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<TlsAcceptor, TlsError> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();
    let cert_pem = read_file(cert_path)?;
    let key_pem = read_file(key_path)?;
    let certs = parse_certs(&cert_pem, &cert_path.display().to_string())?;
    let key = parse_key(&key_pem, &key_path.display().to_string())?;
    build_acceptor(certs, key)
}

/// Builds an acceptor from in-memory PEM data.
///
/// # Errors
///
/// Returns [`TlsError`] if the PEM holds no usable material or the key does
/// not match the certificate.
pub fn acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor, TlsError> {
    let certs = parse_certs(cert_pem, "certificate PEM")?;
    let key = parse_key(key_pem, "private key PEM")?;
    build_acceptor(certs, key)
}

/// Runs the server side of a TLS handshake over `tcp`.
///
/// The handshake is dropped, together with the connection, as soon as
/// `cancel` fires.
pub(crate) async fn handshake(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<TlsStream<TcpStream>, TlsError> {
    let stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(TlsError::Cancelled),
        accepted = accept_within(acceptor, tcp, limit) => accepted?,
    };

    let (_, connection) = stream.get_ref();
    debug!(
        version = ?connection.protocol_version(),
        suite = ?connection.negotiated_cipher_suite().map(|s| s.suite()),
        "TLS handshake complete"
    );
    Ok(stream)
}

async fn accept_within(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    limit: Option<Duration>,
) -> Result<TlsStream<TcpStream>, TlsError> {
    let accept = acceptor.accept(tcp);
    match limit {
        Some(limit) => timeout(limit, accept)
            .await
            .map_err(|_| TlsError::HandshakeTimeout(limit))?,
        None => accept.await,
    }
    .map_err(TlsError::Handshake)
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(pem: &[u8], label: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &*pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            label: label.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(label.to_string()));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8], label: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut &*pem)
        .map_err(|source| TlsError::Pem {
            label: label.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(label.to_string()))
}

fn build_acceptor(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor, TlsError> {
    let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CERT_PEM: &[u8] = include_bytes!("../../tests/fixtures/server.pem");
    const KEY_PEM: &[u8] = include_bytes!("../../tests/fixtures/server.key");

    #[test]
    fn test_acceptor_from_fixture_pem() {
        assert!(acceptor_from_pem(CERT_PEM, KEY_PEM).is_ok());
    }

    #[test]
    fn test_key_pem_without_certificate_is_rejected() {
        let err = acceptor_from_pem(KEY_PEM, KEY_PEM).err().expect("expected an error");
        assert!(matches!(err, TlsError::NoCertificates(_)), "got {err:?}");
    }

    #[test]
    fn test_certificate_pem_without_key_is_rejected() {
        let err = acceptor_from_pem(CERT_PEM, CERT_PEM).err().expect("expected an error");
        assert!(matches!(err, TlsError::NoPrivateKey(_)), "got {err:?}");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_acceptor("/nonexistent/server.pem", "/nonexistent/server.key").err().expect("expected an error");
        match err {
            TlsError::Read { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/server.pem")),
            other => panic!("expected Read error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_acceptor_from_fixture_files() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        assert!(load_acceptor(dir.join("server.pem"), dir.join("server.key")).is_ok());
    }

    #[tokio::test]
    async fn test_handshake_with_silent_peer_ends_on_cancel() {
        let acceptor = acceptor_from_pem(CERT_PEM, KEY_PEM).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Connected, but never sends a ClientHello.
        let _client = TcpStream::connect(addr).await.unwrap();
        let (tcp, _) = listener.accept().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            handshake(&acceptor, tcp, None, &cancel),
        )
        .await
        .expect("cancel must end the handshake");
        let err = result.err();
        assert!(matches!(err, Some(TlsError::Cancelled)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_handshake_with_silent_peer_times_out() {
        let acceptor = acceptor_from_pem(CERT_PEM, KEY_PEM).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (tcp, _) = listener.accept().await.unwrap();

        let limit = Duration::from_millis(50);
        let err = handshake(&acceptor, tcp, Some(limit), &CancellationToken::new())
            .await
            .err();
        assert!(matches!(err, Some(TlsError::HandshakeTimeout(_))), "got {err:?}");
    }
}
