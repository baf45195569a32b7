//! Verifies that (i) cert files appear on disk and (ii) the running TLS
//! server presents the expected leaf chain, establishing a happens-before
//! between "material is in place" and "it is safe to start serving".
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use snafu::{ResultExt, Snafu};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::{CryptoProvider, ring::default_provider},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::backoff::Backoff;

#[derive(Debug, Snafu)]
pub enum ReadinessError {
    #[snafu(display("cancelled while waiting for certificate files to be mounted"))]
    Cancelled,

    #[snafu(display("certificate file at {path} was not mounted within the backoff budget"))]
    MountTimeout { path: PathBuf },

    #[snafu(display("webhook server is not reachable at {addr}"))]
    ServerNotReachable { addr: SocketAddr },

    #[snafu(display("failed to connect to {addr}"))]
    Connect { source: std::io::Error, addr: SocketAddr },

    #[snafu(display("TLS handshake with {addr} failed"))]
    Handshake { source: std::io::Error, addr: SocketAddr },

    #[snafu(display("server at {addr} presented no TLS certificates"))]
    NoPeerCertificates { addr: SocketAddr },

    #[snafu(display("certificate chain mismatch against {path}"))]
    ChainMismatch { path: PathBuf },

    #[snafu(display("failed to read on-disk certificate chain at {path}"))]
    ReadOnDiskChain { source: std::io::Error, path: PathBuf },

    #[snafu(display("on-disk certificate at {path} did not contain valid PEM"))]
    InvalidOnDiskChain { path: PathBuf },
}

/// Polls `stat(cert_path)` with exponential backoff until the file exists or
/// `token` is cancelled. The Secret may be mounted into the pod
/// asynchronously by the kubelet; the process must not start serving before
/// the file is visible.
#[instrument(skip(token))]
pub async fn ensure_certs_mounted(cert_path: &Path, token: &CancellationToken) -> Result<(), ReadinessError> {
    let backoff = Backoff::default();

    for step in 0..backoff.max_steps() {
        if cert_path.exists() {
            debug!(path = %cert_path.display(), "certificate file is mounted");
            return Ok(());
        }

        tokio::select! {
            _ = token.cancelled() => return Err(ReadinessError::Cancelled),
            _ = tokio::time::sleep(backoff.delay(step)) => {}
        }
    }

    if cert_path.exists() {
        return Ok(());
    }
    Err(ReadinessError::MountTimeout {
        path: cert_path.to_path_buf(),
    })
}

/// Repeatedly attempts a TLS connection to `addr` with certificate
/// verification disabled (identity is checked separately by
/// [`check_server_cert_valid`]). Success is any completed handshake
/// followed by a readable byte.
#[instrument(skip(token))]
pub async fn check_server_started(addr: SocketAddr, token: &CancellationToken) -> Result<(), ReadinessError> {
    let backoff = Backoff::for_readiness_probe();

    for step in 0..backoff.max_steps() {
        if probe_once(addr).await.is_ok() {
            return Ok(());
        }

        tokio::select! {
            _ = token.cancelled() => return Err(ReadinessError::Cancelled),
            _ = tokio::time::sleep(backoff.delay(step)) => {}
        }
    }

    Err(ReadinessError::ServerNotReachable { addr })
}

/// Connects once, reads the peer certificate chain presented during the TLS
/// handshake, and compares it byte-for-byte against the on-disk chain at
/// `cert_path`. A real TLS server loaded from `tls.crt`/`tls.key` only ever
/// presents the leaf, so the CA cert is deliberately not part of this
/// comparison. Asserts that the *actually serving* process is using the
/// material this controller wrote.
#[instrument]
pub async fn check_server_cert_valid(addr: SocketAddr, cert_path: &Path) -> Result<(), ReadinessError> {
    let presented = peer_certificate_chain(addr).await?;
    let on_disk = read_on_disk_chain(cert_path)?;

    if presented.len() != on_disk.len() {
        return Err(ReadinessError::ChainMismatch {
            path: cert_path.to_path_buf(),
        });
    }

    for (presented, on_disk) in presented.iter().zip(on_disk.iter()) {
        if presented.as_ref() != on_disk.as_slice() {
            return Err(ReadinessError::ChainMismatch {
                path: cert_path.to_path_buf(),
            });
        }
    }

    Ok(())
}

fn read_on_disk_chain(path: &Path) -> Result<Vec<Vec<u8>>, ReadinessError> {
    let pem = fs::read(path).context(ReadOnDiskChainSnafu {
        path: path.to_path_buf(),
    })?;
    let certs = crate::pem::parse_certificates(&pem);
    if certs.is_empty() {
        return Err(ReadinessError::InvalidOnDiskChain {
            path: path.to_path_buf(),
        });
    }

    certs
        .iter()
        .map(|cert| {
            use x509_cert::der::Encode;
            cert.to_der().map_err(|_| ReadinessError::InvalidOnDiskChain {
                path: path.to_path_buf(),
            })
        })
        .collect()
}

async fn probe_once(addr: SocketAddr) -> Result<(), ReadinessError> {
    let tcp = TcpStream::connect(addr)
        .await
        .context(ConnectSnafu { addr })?;

    let connector = accept_all_connector();
    let server_name = ServerName::IpAddress(addr.ip().into());
    let mut tls = connector
        .connect(server_name, tcp)
        .await
        .context(HandshakeSnafu { addr })?;

    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", addr.ip());
    tls.write_all(request.as_bytes())
        .await
        .context(HandshakeSnafu { addr })?;

    let mut buf = [0u8; 1];
    tls.read(&mut buf).await.context(HandshakeSnafu { addr })?;
    Ok(())
}

async fn peer_certificate_chain(addr: SocketAddr) -> Result<Vec<CertificateDer<'static>>, ReadinessError> {
    let tcp = TcpStream::connect(addr)
        .await
        .context(ConnectSnafu { addr })?;

    let connector = accept_all_connector();
    let server_name = ServerName::IpAddress(addr.ip().into());
    let tls = connector
        .connect(server_name, tcp)
        .await
        .context(HandshakeSnafu { addr })?;

    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or(ReadinessError::NoPeerCertificates { addr })?;

    Ok(chain.to_vec())
}

fn accept_all_connector() -> TlsConnector {
    let provider = Arc::new(default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("default rustls protocol versions are always valid")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Accepts every server certificate: this probe only cares about the
/// *content* of the presented chain, which is compared byte-for-byte
/// against the on-disk chain by the caller; trust-anchor verification is
/// irrelevant here.
#[derive(Debug)]
struct AcceptAllVerifier;

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        CryptoProvider::get_default()
            .map(|provider| provider.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_rustls::TlsAcceptor;

    #[tokio::test]
    async fn ensure_certs_mounted_succeeds_once_file_exists() {
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("tls.crt");
        fs::write(&cert_path, b"placeholder").unwrap();

        let token = CancellationToken::new();
        ensure_certs_mounted(&cert_path, &token)
            .await
            .expect("file already exists, should succeed immediately");
    }

    #[tokio::test]
    async fn ensure_certs_mounted_honors_cancellation() {
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("never-written.crt");

        let token = CancellationToken::new();
        token.cancel();

        let result = ensure_certs_mounted(&cert_path, &token).await;
        assert!(matches!(result, Err(ReadinessError::Cancelled)));
    }

    fn issue_test_artifact(common_name: &str) -> crate::options::CertArtifact {
        use crate::options::{CertOption, SecretInfo};

        let opt = CertOption::builder()
            .common_name(common_name)
            .cert_dir(std::env::temp_dir())
            .secret(
                SecretInfo::builder()
                    .namespace("default")
                    .name("webhook-cert")
                    .build(),
            )
            .build();

        crate::issuance::issue(&opt).expect("issuing test material should succeed")
    }

    /// Spawns a local `rustls` TLS listener presenting `leaf_cert_pem` /
    /// `leaf_key_pem`, responding to any request with a minimal HTTP
    /// response so [`probe_once`] (one write, one read) completes.
    async fn spawn_test_tls_server(leaf_cert_pem: &str, leaf_key_pem: &str) -> SocketAddr {
        use rsa::{RsaPrivateKey, pkcs8::{DecodePrivateKey, EncodePrivateKey}};
        use tokio_rustls::rustls::{ServerConfig, pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer}};

        let chain: Vec<CertificateDer<'static>> = crate::pem::parse_certificates(leaf_cert_pem.as_bytes())
            .iter()
            .map(|cert| {
                use x509_cert::der::Encode;
                CertificateDer::from(cert.to_der().expect("freshly issued cert re-encodes"))
            })
            .collect();

        let private_key =
            RsaPrivateKey::from_pkcs8_pem(leaf_key_pem).expect("freshly issued key parses");
        let key_der = private_key
            .to_pkcs8_der()
            .expect("freshly parsed key re-encodes");
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.as_bytes().to_vec()));

        let provider = Arc::new(default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("default rustls protocol versions are always valid")
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .expect("test certificate/key pair should build a valid server config");
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("binding a local test listener should succeed");
        let addr = listener.local_addr().expect("bound listener has a local address");

        tokio::spawn(async move {
            loop {
                let Ok((tcp_stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(mut tls) = acceptor.accept(tcp_stream).await {
                        let mut buf = [0u8; 1024];
                        let _ = tls.read(&mut buf).await;
                        let _ = tls.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn check_server_started_succeeds_once_listener_is_up() {
        let artifact = issue_test_artifact("webhook.default.svc");
        let addr = spawn_test_tls_server(&artifact.leaf_cert_pem, &artifact.leaf_key_pem).await;

        let token = CancellationToken::new();
        check_server_started(addr, &token)
            .await
            .expect("a live TLS listener should be reachable");
    }

    #[tokio::test]
    async fn check_server_cert_valid_succeeds_when_chain_matches() {
        let artifact = issue_test_artifact("webhook.default.svc");
        let addr = spawn_test_tls_server(&artifact.leaf_cert_pem, &artifact.leaf_key_pem).await;

        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("tls.crt");
        fs::write(&cert_path, artifact.leaf_cert_pem.as_bytes()).unwrap();

        check_server_cert_valid(addr, &cert_path)
            .await
            .expect("server presents exactly what was written to disk");
    }

    #[tokio::test]
    async fn check_server_cert_valid_fails_on_chain_mismatch() {
        let served = issue_test_artifact("webhook.default.svc");
        let addr = spawn_test_tls_server(&served.leaf_cert_pem, &served.leaf_key_pem).await;

        let other = issue_test_artifact("a-different-leaf.default.svc");
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("tls.crt");
        fs::write(&cert_path, other.leaf_cert_pem.as_bytes()).unwrap();

        let result = check_server_cert_valid(addr, &cert_path).await;
        assert!(matches!(result, Err(ReadinessError::ChainMismatch { .. })));
    }
}
