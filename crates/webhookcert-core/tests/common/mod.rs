//! Shared fixtures for the integration tests in this directory. Each test
//! file compiles as its own crate, so the in-memory fakes are pulled from
//! the library's `test-util`-gated `test_support` module rather than
//! duplicated here.
use std::path::PathBuf;

use webhookcert_core::{CertOption, SecretInfo};

pub use webhookcert_core::test_support::{FakeResourceStore, FakeSecretStore};

pub fn cert_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "webhookcert-core-it-{}-{}",
        std::process::id(),
        label
    ));
    let _ = std::fs::remove_dir_all(&dir);
    let _ = std::fs::create_dir_all(&dir);
    dir
}

pub fn cert_option(cert_dir: PathBuf) -> CertOption {
    CertOption::builder()
        .common_name("webhook.default.svc")
        .cert_dir(cert_dir)
        .hosts(vec!["webhook.default.svc".to_string()])
        .secret(
            SecretInfo::builder()
                .namespace("default")
                .name("webhook-cert")
                .build(),
        )
        .build()
}
