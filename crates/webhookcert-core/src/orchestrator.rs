//! Composes the Cert Manager, Webhook Manager, and readiness checks into the
//! two operations an entrypoint actually calls: a one-shot "make everything
//! ready" and a long-lived reconcile loop.
use std::{fs, net::SocketAddr, sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    cert_manager::{CertManager, CertManagerError},
    options::{CertArtifact, CertOption},
    readiness::{self, ReadinessError},
    webhook_manager::{WebhookManager, WebhookManagerError},
};

#[derive(Debug, Snafu)]
pub enum OrchestratorError {
    #[snafu(display("failed to ensure the certificate secret"))]
    CertManager { source: CertManagerError },

    #[snafu(display("failed to inject the CA bundle into a webhook configuration"))]
    WebhookManager { source: WebhookManagerError },

    #[snafu(display("failed to write certificate material to {path}"))]
    Materialize {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("readiness check failed"))]
    Readiness { source: ReadinessError },
}

/// Ties a [`CertManager`] and [`WebhookManager`] to one [`CertOption`],
/// caching the last-known CA PEM so the webhook drift watcher can
/// re-assert it without round-tripping through the Secret on every event.
pub struct Orchestrator {
    opt: Arc<CertOption>,
    cert_manager: CertManager,
    webhook_manager: Arc<WebhookManager>,
    /// `ArcSwap` over a plain lock, so the drift watcher's frequent reads
    /// stay lock-free and never contend with the infrequent write from
    /// `ensure_cert`.
    ca_cache: Arc<ArcSwapOption<String>>,
}

impl Orchestrator {
    pub fn new(opt: Arc<CertOption>, cert_manager: CertManager, webhook_manager: WebhookManager) -> Self {
        Self {
            opt,
            cert_manager,
            webhook_manager: Arc::new(webhook_manager),
            ca_cache: Arc::new(ArcSwapOption::from(None)),
        }
    }

    /// `ensureCert`: get-or-create the Secret, materialize its contents onto
    /// disk, and inject the CA into every configured webhook. Always runs in
    /// this order; the webhook injection must see material that is also on
    /// disk for the server process to present.
    #[instrument(skip(self))]
    pub async fn ensure_cert(&self) -> Result<CertArtifact, OrchestratorError> {
        let secret = self
            .cert_manager
            .ensure_secret()
            .await
            .context(CertManagerSnafu)?;
        let artifact = self
            .cert_manager
            .artifact_from_secret(&secret)
            .context(CertManagerSnafu)?;

        materialize_to_disk(&self.opt, &artifact)?;

        self.webhook_manager
            .ensure_ca(&artifact.ca_cert_pem)
            .await
            .context(WebhookManagerSnafu)?;

        self.ca_cache.store(Some(Arc::new(artifact.ca_cert_pem.clone())));

        Ok(artifact)
    }

    /// `EnsureCertReady`: `ensureCert` followed by `ensureCertsMounted`,
    /// strictly in that order. Used by a startup/init path that must not
    /// return until a caller's own TLS listener can actually load the files.
    #[instrument(skip(self, token))]
    pub async fn ensure_cert_ready(&self, token: &CancellationToken) -> Result<CertArtifact, OrchestratorError> {
        let artifact = self.ensure_cert().await?;
        readiness::ensure_certs_mounted(&self.opt.cert_path(), token)
            .await
            .context(ReadinessSnafu)?;
        Ok(artifact)
    }

    /// Blocks the TLS listener's readiness on the server itself: waits for it
    /// to accept connections, then checks that what it presents matches what
    /// was written to disk.
    #[instrument(skip(self, token))]
    pub async fn wait_for_server_ready(
        &self,
        addr: SocketAddr,
        token: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        readiness::check_server_started(addr, token)
            .await
            .context(ReadinessSnafu)?;
        readiness::check_server_cert_valid(addr, &self.opt.cert_path())
            .await
            .context(ReadinessSnafu)
    }

    /// Long-lived reconcile loop: runs `ensure_cert` once up front, then
    /// keeps it current two ways — a resync ticker that re-checks the
    /// Secret (cheap no-op unless it's invalid or inside the rotation
    /// window), and the Webhook Manager's own drift watcher, which re-injects
    /// the cached CA whenever a webhook configuration is seen to drift.
    /// Runs until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken, resync: Duration) {
        if let Err(error) = self.ensure_cert().await {
            warn!(%error, "initial ensure_cert failed, continuing into the reconcile loop");
        }

        let reissue = {
            let this = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(resync);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = ticker.tick() => {
                            if let Err(error) = this.ensure_cert().await {
                                warn!(%error, "periodic ensure_cert failed");
                            }
                        }
                    }
                }
            })
        };

        let drift_watch = {
            let manager = self.webhook_manager.clone();
            let cache = self.ca_cache.clone();
            manager.watch_and_ensure(token.clone(), resync, move || {
                cache.load().as_deref().map(|ca| ca.as_str().to_owned())
            })
        };

        drift_watch.await;
        let _ = reissue.await;
        info!("orchestrator reconcile loop exited");
    }
}

/// Writes `artifact`'s leaf cert, leaf key, and CA cert to
/// `opt.cert_dir`, creating the directory if needed. The CA private key is
/// never written to disk, regardless of [`CertOption::keep_ca_key`]: that
/// flag only governs whether it is persisted in the Secret.
fn materialize_to_disk(opt: &CertOption, artifact: &CertArtifact) -> Result<(), OrchestratorError> {
    fs::create_dir_all(&opt.cert_dir).context(MaterializeSnafu {
        path: opt.cert_dir.clone(),
    })?;

    write_with_mode(&opt.cert_path(), artifact.leaf_cert_pem.as_bytes())?;
    write_with_mode(&opt.key_path(), artifact.leaf_key_pem.as_bytes())?;
    write_with_mode(&opt.ca_cert_path(), artifact.ca_cert_pem.as_bytes())?;

    Ok(())
}

#[cfg(unix)]
fn write_with_mode(path: &std::path::Path, contents: &[u8]) -> Result<(), OrchestratorError> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(path, contents).context(MaterializeSnafu {
        path: path.to_path_buf(),
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644)).context(MaterializeSnafu {
        path: path.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn write_with_mode(path: &std::path::Path, contents: &[u8]) -> Result<(), OrchestratorError> {
    fs::write(path, contents).context(MaterializeSnafu {
        path: path.to_path_buf(),
    })
}
