//! CLI surface for the `webhookcert` binary: a single `run` subcommand with
//! flattened option groups, following the `Command`/flattened-`Args`
//! convention the reconciliation core itself is modeled on.
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use webhookcert_core::{CertOption, SecretInfo, WebhookInfo, WebhookKind};

#[derive(Parser, Debug)]
#[command(name = "webhookcert", author, version, long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the reconciliation core: issue/rotate TLS material, keep it
    /// mirrored to disk, and keep referenced webhook configurations pinned
    /// to the current CA.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub cert: CertOptions,

    #[command(flatten)]
    pub webhook: WebhookOptions,

    #[command(flatten)]
    pub logging: LoggingOptions,

    /// Address the admission-webhook HTTPS server listens on, used only by
    /// the post-startup readiness self-tests.
    #[arg(long, env = "WEBHOOKCERT_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct CertOptions {
    /// Directory the leaf/CA material is materialized into.
    #[arg(long, env = "WEBHOOKCERT_CERT_DIR")]
    pub cert_dir: PathBuf,

    /// Namespace of the backing Secret.
    #[arg(long, env = "WEBHOOKCERT_SECRET_NAMESPACE")]
    pub secret_namespace: String,

    /// Name of the backing Secret.
    #[arg(long, env = "WEBHOOKCERT_SECRET_NAME")]
    pub secret_name: String,

    /// Common name of the self-signed CA.
    #[arg(long, env = "WEBHOOKCERT_CA_COMMON_NAME", default_value = "Webhook Internal CA")]
    pub ca_common_name: String,

    /// Common name of the leaf certificate.
    #[arg(long, env = "WEBHOOKCERT_COMMON_NAME")]
    pub common_name: String,

    /// DNS SAN entries for the leaf certificate. Repeatable.
    #[arg(long = "hosts", env = "WEBHOOKCERT_HOSTS", value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Whether to persist the CA private key in the Secret.
    #[arg(long, env = "WEBHOOKCERT_KEEP_CA_KEY")]
    pub keep_ca_key: bool,

    /// Validity of freshly issued certificates. Falls back to the crate
    /// default (1 year) if unset.
    #[arg(long, env = "WEBHOOKCERT_CERT_VALIDITY", value_parser = humantime::parse_duration)]
    pub cert_validity: Option<Duration>,

    /// Proactively reissue once the leaf is within this long of expiring,
    /// even though it is still valid. Unset disables proactive rotation.
    #[arg(long, env = "WEBHOOKCERT_ROTATION_WINDOW", value_parser = humantime::parse_duration)]
    pub rotation_window: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct WebhookOptions {
    /// Name of a `ValidatingWebhookConfiguration` to keep pinned. Repeatable.
    #[arg(long = "validating-webhook", env = "WEBHOOKCERT_VALIDATING_WEBHOOKS", value_delimiter = ',')]
    pub validating_webhooks: Vec<String>,

    /// Name of a `MutatingWebhookConfiguration` to keep pinned. Repeatable.
    #[arg(long = "mutating-webhook", env = "WEBHOOKCERT_MUTATING_WEBHOOKS", value_delimiter = ',')]
    pub mutating_webhooks: Vec<String>,

    /// How often to re-assert the CA bundle even without an observed drift
    /// event, as a defense against missed watch notifications.
    #[arg(long, env = "WEBHOOKCERT_RESYNC_INTERVAL", value_parser = humantime::parse_duration, default_value = "10m")]
    pub resync_interval: Duration,
}

#[derive(Args, Debug)]
pub struct LoggingOptions {
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `info` or
    /// `webhookcert_core=debug,info`.
    #[arg(long, env = "WEBHOOKCERT_LOG", default_value = "info")]
    pub env_filter: String,

    /// Directory to additionally write hourly-rotated JSON log files into.
    /// Unset disables the file layer; only the console layer runs.
    #[arg(long, env = "WEBHOOKCERT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl CertOptions {
    pub fn into_cert_option(self) -> CertOption {
        CertOption::builder()
            .ca_name(self.ca_common_name)
            .common_name(self.common_name)
            .cert_dir(self.cert_dir)
            .hosts(self.hosts)
            .keep_ca_key(self.keep_ca_key)
            .secret(
                SecretInfo::builder()
                    .namespace(self.secret_namespace)
                    .name(self.secret_name)
                    .build(),
            )
            .maybe_rotation_window(self.rotation_window)
            .maybe_cert_validity_duration(self.cert_validity)
            .build()
    }
}

impl WebhookOptions {
    pub fn into_webhook_infos(self) -> Vec<WebhookInfo> {
        let validating = self
            .validating_webhooks
            .into_iter()
            .map(|name| WebhookInfo::builder().kind(WebhookKind::ValidatingV1).name(name).build());
        let mutating = self
            .mutating_webhooks
            .into_iter()
            .map(|name| WebhookInfo::builder().kind(WebhookKind::MutatingV1).name(name).build());

        validating.chain(mutating).collect()
    }
}
