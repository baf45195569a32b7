//! Reconciliation core for webhook TLS material.
//!
//! This crate owns the parts of the lifecycle that [`webhookcert_certs`]
//! does not: persisting CA/leaf pairs in a Kubernetes `Secret`, keeping the
//! `caBundle` field of `ValidatingWebhookConfiguration`/
//! `MutatingWebhookConfiguration` objects in sync with that Secret, and
//! exposing a readiness protocol that external health checks can poll.
pub mod backoff;
pub mod cert_manager;
pub mod client;
pub mod issuance;
pub mod options;
pub mod orchestrator;
pub mod pem;
pub mod readiness;
pub mod resource_store;
pub mod secret_store;
#[cfg(any(test, feature = "test-util"))]
pub mod test_support;
pub mod util;
pub mod webhook_manager;

pub use cert_manager::{CertManager, CertManagerError};
pub use client::K8sClient;
pub use options::{CertArtifact, CertOption, SecretInfo, WebhookInfo, WebhookKind};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use webhook_manager::{WebhookManager, WebhookManagerError};
