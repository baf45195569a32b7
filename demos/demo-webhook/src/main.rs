//! Manual smoke-test binary: wires [`webhookcert_core::Orchestrator`] to a
//! no-op always-allow admission handler so the reconciliation core can be
//! exercised end to end without a real product webhook attached to it.
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use webhookcert_admission_demo::AdmissionController;
use webhookcert_core::{
    CertManager, CertOption, K8sClient, Orchestrator, SecretInfo, WebhookInfo, WebhookKind,
    WebhookManager, resource_store::KubeResourceStore, secret_store::KubeSecretStore,
};

#[derive(Parser, Debug)]
struct Opts {
    #[arg(long)]
    cert_dir: PathBuf,

    #[arg(long)]
    secret_namespace: String,

    #[arg(long)]
    secret_name: String,

    #[arg(long)]
    common_name: String,

    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,

    #[arg(long)]
    validating_webhook: Option<String>,

    /// Address the admission handler's TLS listener binds to; also the
    /// address the readiness self-tests probe after startup.
    #[arg(long, default_value = "0.0.0.0:8443")]
    listen_addr: SocketAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let opts = Opts::parse();

    let cert_option = Arc::new(
        CertOption::builder()
            .common_name(opts.common_name)
            .cert_dir(opts.cert_dir)
            .hosts(opts.hosts)
            .secret(
                SecretInfo::builder()
                    .namespace(opts.secret_namespace)
                    .name(opts.secret_name)
                    .build(),
            )
            .build(),
    );

    let webhooks = opts
        .validating_webhook
        .into_iter()
        .map(|name| WebhookInfo::builder().kind(WebhookKind::ValidatingV1).name(name).build())
        .collect();

    let client = K8sClient::try_default()
        .await
        .expect("failed to build a Kubernetes client");
    let secret_store = Arc::new(KubeSecretStore::new(client.clone()));
    let resource_store = Arc::new(KubeResourceStore::new(client));

    let cert_manager = CertManager::new(cert_option.clone(), secret_store);
    let webhook_manager = WebhookManager::new(webhooks, resource_store);
    let orchestrator = Arc::new(Orchestrator::new(cert_option.clone(), cert_manager, webhook_manager));

    let token = CancellationToken::new();
    orchestrator
        .ensure_cert_ready(&token)
        .await
        .expect("initial reconcile failed");

    let admission_controller = AdmissionController::new(&cert_option.cert_path(), &cert_option.key_path())
        .expect("failed to load leaf certificate material for the admission handler");
    let listen_addr = opts.listen_addr;
    let admission_server = tokio::spawn(async move {
        info!(%listen_addr, "serving always-allow admission handler");
        admission_controller
            .run(listen_addr)
            .await
            .expect("admission handler server failed");
    });

    orchestrator
        .wait_for_server_ready(listen_addr, &token)
        .await
        .expect("admission handler did not come up presenting the expected certificate chain");
    info!("admission handler is up and presenting the expected certificate chain");

    let reconcile_loop = tokio::spawn(orchestrator.clone().run(token.clone(), std::time::Duration::from_secs(600)));

    let _ = admission_server.await;
    token.cancel();
    let _ = reconcile_loop.await;
}
