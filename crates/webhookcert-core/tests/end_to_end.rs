//! End-to-end coverage of the [`Orchestrator`], exercised only through its
//! public API against the in-memory fakes.
//!
//! The watch-based drift scenario is not covered here: the fake resource
//! store's `watch` only ever yields a single `Applied` event for whatever is
//! stored at call time, so it cannot simulate a third party mutating a
//! webhook configuration after the watch has already been opened. Covering
//! that scenario faithfully needs a fake that can be fed a scripted event
//! sequence; tracked as a known gap rather than turned into a flaky test.
mod common;

use std::sync::Arc;

use common::{FakeResourceStore, FakeSecretStore, cert_dir, cert_option};
use tokio_util::sync::CancellationToken;
use webhookcert_core::{CertManager, Orchestrator, WebhookManager};

#[tokio::test]
async fn cold_start_produces_mounted_certs_and_no_webhooks_to_inject() {
    let option = Arc::new(cert_option(cert_dir("end-to-end-cold")));

    let cert_manager = CertManager::new(option.clone(), Arc::new(FakeSecretStore::empty()));
    let webhook_manager = WebhookManager::new(vec![], Arc::new(FakeResourceStore::empty()));
    let orchestrator = Orchestrator::new(option.clone(), cert_manager, webhook_manager);

    let token = CancellationToken::new();
    let artifact = orchestrator
        .ensure_cert_ready(&token)
        .await
        .expect("a clean environment should reach readiness on the first pass");

    assert!(option.cert_path().exists());
    assert!(option.key_path().exists());
    assert!(option.ca_cert_path().exists());
    assert_eq!(
        std::fs::read_to_string(option.ca_cert_path()).unwrap(),
        artifact.ca_cert_pem
    );
}

#[tokio::test]
async fn rerunning_ensure_cert_ready_against_a_warm_secret_is_stable() {
    let option = Arc::new(cert_option(cert_dir("end-to-end-warm")));
    let secret_store = Arc::new(FakeSecretStore::empty());
    let resource_store = Arc::new(FakeResourceStore::empty());

    let cert_manager = CertManager::new(option.clone(), secret_store.clone());
    let webhook_manager = WebhookManager::new(vec![], resource_store.clone());
    let orchestrator = Orchestrator::new(option.clone(), cert_manager, webhook_manager);

    let token = CancellationToken::new();
    let first = orchestrator.ensure_cert_ready(&token).await.unwrap();

    let cert_manager = CertManager::new(option.clone(), secret_store.clone());
    let webhook_manager = WebhookManager::new(vec![], resource_store);
    let orchestrator = Orchestrator::new(option, cert_manager, webhook_manager);
    let second = orchestrator.ensure_cert_ready(&token).await.unwrap();

    assert_eq!(first.leaf_cert_pem, second.leaf_cert_pem);
    assert_eq!(secret_store.create_calls(), 1);
}
