//! Entrypoint for the `webhookcert` binary: parses CLI options, wires the
//! reconciliation core to a real `kube::Client`, and runs it to completion.
mod cli;
mod logging;

use std::sync::Arc;

use clap::Parser;
use cli::{Command, Opts};
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use webhookcert_core::{
    CertManager, K8sClient, Orchestrator, WebhookManager,
    client,
    resource_store::KubeResourceStore,
    secret_store::KubeSecretStore,
};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to build a Kubernetes client"))]
    BuildClient { source: client::Error },

    #[snafu(display("reconciliation core failed"))]
    Orchestrator { source: webhookcert_core::OrchestratorError },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let opts = Opts::parse();

    match run(opts).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "exiting with error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(opts: Opts) -> Result<(), Error> {
    let Command::Run(run_args) = opts.command;
    let _log_guard =
        logging::initialize_logging(&run_args.logging.env_filter, run_args.logging.log_dir.as_deref());

    let cert_option = Arc::new(run_args.cert.into_cert_option());
    let listen_addr = run_args.listen_addr;
    let resync_interval = run_args.webhook.resync_interval;
    let webhooks = run_args.webhook.into_webhook_infos();

    let client = K8sClient::try_default().await.context(BuildClientSnafu)?;
    let secret_store = Arc::new(KubeSecretStore::new(client.clone()));
    let resource_store = Arc::new(KubeResourceStore::new(client));

    let cert_manager = CertManager::new(cert_option.clone(), secret_store);
    let webhook_manager = WebhookManager::new(webhooks, resource_store);
    let orchestrator = Arc::new(Orchestrator::new(cert_option, cert_manager, webhook_manager));

    let token = CancellationToken::new();

    info!("performing initial reconcile before accepting traffic");
    orchestrator
        .ensure_cert_ready(&token)
        .await
        .context(OrchestratorSnafu)?;

    if let Some(addr) = listen_addr {
        orchestrator
            .wait_for_server_ready(addr, &token)
            .await
            .context(OrchestratorSnafu)?;
    }

    let shutdown = {
        let token = token.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            token.cancel();
        })
    };

    orchestrator.run(token.clone(), resync_interval).await;

    shutdown.abort();
    Ok(())
}
