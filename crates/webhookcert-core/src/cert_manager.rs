//! Owns issuance, validity checks, secret-backed durability, and rotation.
use std::{sync::Arc, time::SystemTime};

use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use snafu::{ResultExt, Snafu};
use tracing::{info, instrument, warn};

use crate::{
    client::SecretReference,
    issuance,
    options::{CertArtifact, CertOption},
    secret_store::SecretStore,
};

/// Number of Create/Update-conflict restarts `ensure_secret` will absorb
/// before giving up and surfacing the conflict to the caller. A real
/// conflict storm this deep indicates something other than normal
/// multi-replica racing.
const MAX_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Snafu)]
pub enum CertManagerError {
    #[snafu(display("failed to read secret {reference}"))]
    ReadSecret {
        source: crate::secret_store::Error,
        reference: SecretReference,
    },

    #[snafu(display("failed to create secret {reference}"))]
    CreateSecret {
        source: crate::secret_store::Error,
        reference: SecretReference,
    },

    #[snafu(display("failed to update secret {reference}"))]
    UpdateSecret {
        source: crate::secret_store::Error,
        reference: SecretReference,
    },

    #[snafu(display("failed to issue certificate material"))]
    Issue { source: issuance::Error },

    #[snafu(display("secret {reference} is corrupt and could not be rebuilt"))]
    Corrupt {
        source: issuance::Error,
        reference: SecretReference,
    },

    #[snafu(display("gave up reconciling secret {reference} after repeated write conflicts"))]
    ConflictRetriesExhausted { reference: SecretReference },
}

/// Owns the Secret-backed durability protocol for one [`CertOption`].
pub struct CertManager {
    opt: Arc<CertOption>,
    store: Arc<dyn SecretStore>,
}

impl CertManager {
    pub fn new(opt: Arc<CertOption>, store: Arc<dyn SecretStore>) -> Self {
        Self { opt, store }
    }

    fn reference(&self) -> SecretReference {
        SecretReference {
            namespace: self.opt.secret.namespace.clone(),
            name: self.opt.secret.name.clone(),
        }
    }

    /// Implements the `ensureSecret` state machine: get-or-create, then
    /// validate-or-reissue, retrying on optimistic-concurrency conflicts.
    #[instrument(skip(self), fields(secret = %self.reference()))]
    pub async fn ensure_secret(&self) -> Result<Secret, CertManagerError> {
        let reference = self.reference();

        for _ in 0..MAX_CONFLICT_RETRIES {
            match self.store.get(&reference).await.context(ReadSecretSnafu {
                reference: reference.clone(),
            })? {
                None => match self.create_fresh_secret(&reference).await {
                    Ok(secret) => return Ok(secret),
                    Err(CreateRaced::Conflict) => continue,
                    Err(CreateRaced::Other(err)) => return Err(err),
                },
                Some(secret) => {
                    let now = SystemTime::now();
                    match issuance::secret_is_valid(&self.opt, &secret, now) {
                        Ok(()) => return Ok(secret),
                        Err(source) => match self.reissue_onto(secret, source).await {
                            Ok(secret) => return Ok(secret),
                            Err(ReissueRaced::Conflict) => continue,
                            Err(ReissueRaced::Other(err)) => return Err(err),
                        },
                    }
                }
            }
        }

        Err(CertManagerError::ConflictRetriesExhausted { reference })
    }

    /// Strictly parses the current Secret into a [`CertArtifact`], without
    /// any healing. Callers that need auto-heal should go through
    /// [`Self::ensure_secret`] first.
    pub fn artifact_from_secret(&self, secret: &Secret) -> Result<CertArtifact, CertManagerError> {
        issuance::build_artifact_from_secret(&self.opt, secret).context(IssueSnafu)
    }

    async fn create_fresh_secret(&self, reference: &SecretReference) -> Result<Secret, CreateRaced> {
        let artifact = issuance::issue(&self.opt)
            .context(IssueSnafu)
            .map_err(CreateRaced::Other)?;

        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some(reference.name.clone()),
                namespace: Some(reference.namespace.clone()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            ..Default::default()
        };
        issuance::overlay_secret_data(&self.opt, &mut secret, &artifact);

        match self.store.create(reference, secret).await {
            Ok(secret) => {
                info!("created fresh certificate secret");
                Ok(secret)
            }
            Err(crate::secret_store::Error::Create { source, .. }) if is_conflict(&source) => {
                Err(CreateRaced::Conflict)
            }
            Err(source) => Err(CreateRaced::Other(CertManagerError::CreateSecret {
                source,
                reference: reference.clone(),
            })),
        }
    }

    async fn reissue_onto(
        &self,
        mut secret: Secret,
        reason: issuance::Error,
    ) -> Result<Secret, ReissueRaced> {
        warn!(%reason, "existing certificate secret failed validation, reissuing");

        let reference = self.reference();
        let artifact = issuance::issue(&self.opt)
            .context(IssueSnafu)
            .map_err(ReissueRaced::Other)?;
        issuance::overlay_secret_data(&self.opt, &mut secret, &artifact);

        match self.store.update(&reference, secret).await {
            Ok(secret) => {
                info!("rewrote certificate secret with freshly issued material");
                Ok(secret)
            }
            Err(crate::secret_store::Error::Update { source, .. }) if is_conflict(&source) => {
                Err(ReissueRaced::Conflict)
            }
            Err(source) => Err(ReissueRaced::Other(CertManagerError::UpdateSecret {
                source,
                reference,
            })),
        }
    }
}

enum CreateRaced {
    Conflict,
    Other(CertManagerError),
}

enum ReissueRaced {
    Conflict,
    Other(CertManagerError),
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(err) if err.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SecretInfo;
    use std::path::PathBuf;

    fn opt() -> Arc<CertOption> {
        Arc::new(
            CertOption::builder()
                .common_name("webhook.default.svc")
                .cert_dir(PathBuf::from("/tmp"))
                .secret(
                    SecretInfo::builder()
                        .namespace("default")
                        .name("webhook-cert")
                        .build(),
                )
                .hosts(vec!["webhook.default.svc".to_string()])
                .build(),
        )
    }

    #[tokio::test]
    async fn cold_start_creates_secret() {
        let store: Arc<dyn SecretStore> = Arc::new(crate::test_support::FakeSecretStore::empty());
        let manager = CertManager::new(opt(), store.clone());

        let secret = manager.ensure_secret().await.expect("ensure_secret should succeed");
        assert!(secret.data.as_ref().unwrap().contains_key("tls.crt"));
    }

    #[tokio::test]
    async fn warm_start_with_valid_secret_does_not_write() {
        let option = opt();
        let seed_store: Arc<dyn SecretStore> = Arc::new(crate::test_support::FakeSecretStore::empty());
        let seeding_manager = CertManager::new(option.clone(), seed_store.clone());
        let seeded = seeding_manager.ensure_secret().await.unwrap();

        let store = crate::test_support::FakeSecretStore::seeded(
            SecretReference {
                namespace: option.secret.namespace.clone(),
                name: option.secret.name.clone(),
            },
            seeded,
        );
        let store: Arc<crate::test_support::FakeSecretStore> = Arc::new(store);
        let manager = CertManager::new(option, store.clone() as Arc<dyn SecretStore>);

        manager.ensure_secret().await.expect("warm start should succeed");
        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.update_calls(), 0);
    }

    #[tokio::test]
    async fn corrupt_secret_is_rewritten() {
        let option = opt();
        let reference = SecretReference {
            namespace: option.secret.namespace.clone(),
            name: option.secret.name.clone(),
        };
        let mut corrupt = Secret {
            metadata: ObjectMeta {
                name: Some(reference.name.clone()),
                namespace: Some(reference.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        corrupt.data = Some(
            [("tls.crt".to_string(), k8s_openapi::ByteString(b"xxx".to_vec()))]
                .into_iter()
                .collect(),
        );

        let store = crate::test_support::FakeSecretStore::seeded(reference, corrupt);
        let store: Arc<crate::test_support::FakeSecretStore> = Arc::new(store);
        let manager = CertManager::new(option, store.clone() as Arc<dyn SecretStore>);

        manager.ensure_secret().await.expect("reissue should succeed");
        assert_eq!(store.update_calls(), 1);
    }
}
