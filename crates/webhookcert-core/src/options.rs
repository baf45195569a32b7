//! Immutable configuration and the in-memory certificate artifact.
use std::{path::PathBuf, time::Duration};

use bon::Builder;

use crate::util::remove_dup;

/// Default leaf/CA validity applied when [`CertOption::cert_validity_duration`]
/// is left at zero.
pub const DEFAULT_CERT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const DEFAULT_CA_CERT_KEY: &str = "ca.crt";
pub const DEFAULT_CA_KEY_KEY: &str = "ca.key";
pub const DEFAULT_CERT_KEY: &str = "tls.crt";
pub const DEFAULT_KEY_KEY: &str = "tls.key";

/// Naming scheme for the four keys a cert-bearing [`k8s_openapi::api::core::v1::Secret`]
/// carries. Defaults mirror `kubernetes.io/tls`.
#[derive(Debug, Clone, Builder)]
pub struct SecretInfo {
    /// Namespace of the backing Secret.
    #[builder(into)]
    pub namespace: String,

    /// Name of the backing Secret.
    #[builder(into)]
    pub name: String,

    #[builder(into, default = DEFAULT_CA_CERT_KEY.to_string())]
    pub ca_cert_key: String,

    #[builder(into, default = DEFAULT_CA_KEY_KEY.to_string())]
    pub ca_key_key: String,

    #[builder(into, default = DEFAULT_CERT_KEY.to_string())]
    pub cert_key: String,

    #[builder(into, default = DEFAULT_KEY_KEY.to_string())]
    pub key_key: String,
}

/// The two admission-webhook configuration kinds the controller can inject a
/// CA bundle into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookKind {
    ValidatingV1,
    MutatingV1,
}

impl WebhookKind {
    pub const fn group(self) -> &'static str {
        "admissionregistration.k8s.io"
    }

    pub const fn version(self) -> &'static str {
        "v1"
    }

    pub const fn kind(self) -> &'static str {
        match self {
            WebhookKind::ValidatingV1 => "ValidatingWebhookConfiguration",
            WebhookKind::MutatingV1 => "MutatingWebhookConfiguration",
        }
    }

    pub const fn plural(self) -> &'static str {
        match self {
            WebhookKind::ValidatingV1 => "validatingwebhookconfigurations",
            WebhookKind::MutatingV1 => "mutatingwebhookconfigurations",
        }
    }
}

/// Identifies one cluster-scoped webhook-configuration object by kind and name.
#[derive(Debug, Clone, Builder)]
pub struct WebhookInfo {
    pub kind: WebhookKind,
    #[builder(into)]
    pub name: String,
}

/// Immutable configuration for the whole reconciliation core.
#[derive(Debug, Clone, Builder)]
pub struct CertOption {
    /// Common name of the self-signed CA, e.g. `Webhook Internal CA`.
    #[builder(into, default = "Webhook Internal CA".to_string())]
    pub ca_name: String,

    /// Organizations (`O=`) added to the CA subject, in order.
    #[builder(default)]
    pub ca_organizations: Vec<String>,

    /// Caller-supplied DNS SANs, appended after `dns_names`.
    #[builder(default)]
    pub hosts: Vec<String>,

    /// Caller-supplied DNS SANs, always ordered first.
    #[builder(default)]
    pub dns_names: Vec<String>,

    /// Common name of the leaf certificate.
    #[builder(into)]
    pub common_name: String,

    /// Directory the leaf/CA material is materialized into.
    pub cert_dir: PathBuf,

    /// Validity of freshly issued leaf and CA certificates. A zero duration
    /// falls back to [`DEFAULT_CERT_VALIDITY`].
    #[builder(default = Duration::ZERO)]
    pub cert_validity_duration: Duration,

    /// Naming scheme and location of the backing Secret.
    pub secret: SecretInfo,

    /// Whether the CA private key is persisted in the Secret. Defaults to
    /// `false`: once issued, the CA key lives only in the in-memory artifact
    /// and is never written back.
    #[builder(default = false)]
    pub keep_ca_key: bool,

    /// Optional proactive-rotation window: if `notAfter - now` drops below
    /// this, the next reconcile reissues even though the cert hasn't expired
    /// yet. `None` (the default) reproduces the source behavior of only
    /// reissuing on failed validation.
    #[builder(default)]
    pub rotation_window: Option<Duration>,
}

impl CertOption {
    /// Returns the configured validity, or [`DEFAULT_CERT_VALIDITY`] if unset.
    pub fn effective_cert_validity_duration(&self) -> Duration {
        if self.cert_validity_duration.is_zero() {
            DEFAULT_CERT_VALIDITY
        } else {
            self.cert_validity_duration
        }
    }

    /// The leaf certificate's SAN list: `dns_names` first, then `hosts`,
    /// deduplicated while preserving first-seen order.
    pub fn subject_alternative_names(&self) -> Vec<String> {
        remove_dup(self.dns_names.iter().chain(self.hosts.iter()).cloned())
    }

    /// RFC 4514-ish subject string for the CA: `CN=<name>[, O=<org>]*`.
    pub fn ca_subject(&self) -> String {
        let mut subject = format!("CN={}", self.ca_name);
        for org in &self.ca_organizations {
            subject.push_str(", O=");
            subject.push_str(org);
        }
        subject
    }

    /// RFC 4514-ish subject string for the leaf: `CN=<common_name>`.
    pub fn leaf_subject(&self) -> String {
        format!("CN={}", self.common_name)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(&self.secret.cert_key)
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(&self.secret.key_key)
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.cert_dir.join(&self.secret.ca_cert_key)
    }
}

/// The in-memory issuance result: a CA/leaf pair and their PEM encodings.
///
/// `ca_key_pem` is only ever `Some` while the artifact is fresh off
/// issuance; whether it survives into the persisted Secret is governed by
/// [`CertOption::keep_ca_key`].
#[derive(Debug, Clone)]
pub struct CertArtifact {
    pub ca_cert_pem: String,
    pub ca_key_pem: Option<String>,
    pub leaf_cert_pem: String,
    pub leaf_key_pem: String,
    pub not_after: std::time::SystemTime,
}
