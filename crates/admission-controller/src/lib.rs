//! Minimal TLS-terminating admission-webhook HTTP handler, used only to
//! exercise `webhookcert-core`'s readiness protocol against a real TLS
//! listener; the admission business logic itself is out of scope for the
//! reconciliation core.
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{Router, routing::post};
use rsa::{
    RsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
};
use snafu::{ResultExt, Snafu};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};
use tracing::warn;
use x509_cert::der::Encode;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read certificate material at {path}"))]
    ReadCert { source: std::io::Error, path: PathBuf },

    #[snafu(display("on-disk leaf certificate at {path} contains no valid PEM certificate"))]
    NoCertificate { path: PathBuf },

    #[snafu(display("failed to re-encode the leaf certificate at {path}"))]
    EncodeCert { path: PathBuf },

    #[snafu(display("failed to read the leaf private key at {path}"))]
    ReadKey { source: std::io::Error, path: PathBuf },

    #[snafu(display("failed to parse the leaf private key at {path}"))]
    ParseKey { source: rsa::pkcs8::Error, path: PathBuf },

    #[snafu(display("failed to re-encode the leaf private key at {path}"))]
    EncodeKey { source: rsa::pkcs8::Error, path: PathBuf },

    #[snafu(display("failed to build the TLS server configuration"))]
    BuildTlsConfig { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to bind the admission handler's listener"))]
    Bind { source: std::io::Error },

    #[snafu(display("admission handler server failed"))]
    Serve { source: std::io::Error },
}

pub struct AdmissionController {
    router: Router,
    tls_config: Arc<ServerConfig>,
}

impl AdmissionController {
    /// Builds a no-op always-allow admission handler, terminating TLS with
    /// the leaf certificate and key the reconciliation core wrote to
    /// `cert_path`/`key_path`.
    pub fn new(cert_path: &Path, key_path: &Path) -> Result<Self, Error> {
        let router = Router::new().route("/", post(|| async {}));
        let tls_config = build_tls_config(cert_path, key_path)?;

        Ok(Self {
            router,
            tls_config: Arc::new(tls_config),
        })
    }

    pub async fn run(self, addr: SocketAddr) -> Result<(), Error> {
        let acceptor = TlsAcceptor::from(self.tls_config);
        let listener = TcpListener::bind(addr).await.context(BindSnafu)?;
        let listener = TlsListener { listener, acceptor };

        axum::serve(listener, self.router.into_make_service())
            .await
            .context(ServeSnafu)
    }
}

fn build_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, Error> {
    let cert_pem = std::fs::read(cert_path).context(ReadCertSnafu {
        path: cert_path.to_path_buf(),
    })?;
    let chain: Vec<CertificateDer<'static>> = webhookcert_core::pem::parse_certificates(&cert_pem)
        .iter()
        .map(|cert| {
            cert.to_der()
                .map(CertificateDer::from)
                .map_err(|_| Error::EncodeCert {
                    path: cert_path.to_path_buf(),
                })
        })
        .collect::<Result<_, _>>()?;
    if chain.is_empty() {
        return Err(Error::NoCertificate {
            path: cert_path.to_path_buf(),
        });
    }

    let key_pem = std::fs::read_to_string(key_path).context(ReadKeySnafu {
        path: key_path.to_path_buf(),
    })?;
    let private_key = RsaPrivateKey::from_pkcs8_pem(&key_pem).context(ParseKeySnafu {
        path: key_path.to_path_buf(),
    })?;
    let key_der = private_key.to_pkcs8_der().context(EncodeKeySnafu {
        path: key_path.to_path_buf(),
    })?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.as_bytes().to_vec()));

    let provider = Arc::new(default_provider());
    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("default rustls protocol versions are always valid")
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context(BuildTlsConfigSnafu)
}

/// Adapts a plain [`TcpListener`] plus a [`TlsAcceptor`] into an
/// [`axum::serve::Listener`], so `axum::serve` drives TLS termination
/// directly instead of plaintext HTTP.
struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl axum::serve::Listener for TlsListener {
    type Io = tokio_rustls::server::TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (tcp_stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "failed to accept incoming TCP connection");
                    continue;
                }
            };

            match self.acceptor.accept(tcp_stream).await {
                Ok(tls_stream) => return (tls_stream, addr),
                Err(error) => {
                    warn!(%error, %addr, "TLS handshake failed");
                    continue;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.listener.local_addr()
    }
}
