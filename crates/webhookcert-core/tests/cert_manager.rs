//! Integration coverage for the Cert Manager's `ensureSecret` state machine,
//! driven only through the crate's public API.
mod common;

use std::sync::Arc;

use common::{FakeSecretStore, cert_dir, cert_option};
use k8s_openapi::ByteString;
use webhookcert_core::{CertManager, client::SecretReference};

#[tokio::test]
async fn cold_start_creates_secret_with_expected_keys() {
    let option = Arc::new(cert_option(cert_dir("cert-manager-cold")));
    let store: Arc<FakeSecretStore> = Arc::new(FakeSecretStore::empty());
    let manager = CertManager::new(option, store.clone());

    let secret = manager
        .ensure_secret()
        .await
        .expect("cold start should create a fresh secret");

    let data = secret.data.expect("secret should carry data");
    assert!(data.contains_key("tls.crt"));
    assert!(data.contains_key("tls.key"));
    assert!(data.contains_key("ca.crt"));
    assert!(!data.contains_key("ca.key"));
    assert_eq!(store.create_calls(), 1);
}

#[tokio::test]
async fn warm_start_with_valid_secret_performs_no_writes() {
    let option = Arc::new(cert_option(cert_dir("cert-manager-warm")));

    let seeding_store: Arc<FakeSecretStore> = Arc::new(FakeSecretStore::empty());
    let seeding_manager = CertManager::new(option.clone(), seeding_store.clone());
    let seeded = seeding_manager.ensure_secret().await.unwrap();

    let reference = SecretReference {
        namespace: option.secret.namespace.clone(),
        name: option.secret.name.clone(),
    };
    let store = Arc::new(FakeSecretStore::seeded(reference, seeded));
    let manager = CertManager::new(option, store.clone());

    manager.ensure_secret().await.expect("warm start should succeed");
    assert_eq!(store.create_calls(), 0);
    assert_eq!(store.update_calls(), 0);
}

#[tokio::test]
async fn corrupt_secret_is_reissued_and_updated() {
    let option = Arc::new(cert_option(cert_dir("cert-manager-corrupt")));
    let reference = SecretReference {
        namespace: option.secret.namespace.clone(),
        name: option.secret.name.clone(),
    };

    let mut corrupt = k8s_openapi::api::core::v1::Secret {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(reference.name.clone()),
            namespace: Some(reference.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    corrupt.data = Some(
        [("tls.crt".to_string(), ByteString(b"xxx".to_vec()))]
            .into_iter()
            .collect(),
    );

    let store = Arc::new(FakeSecretStore::seeded(reference, corrupt));
    let manager = CertManager::new(option, store.clone());

    let secret = manager
        .ensure_secret()
        .await
        .expect("corrupt secret should be rewritten");
    assert_eq!(store.update_calls(), 1);
    assert_ne!(
        secret.data.unwrap().get("tls.crt").unwrap().0,
        b"xxx".to_vec()
    );
}
