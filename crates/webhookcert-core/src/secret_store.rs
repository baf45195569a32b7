//! Narrow adapter over namespaced Secret CRUD, so the Cert Manager can be
//! tested against an in-memory fake instead of a live API server.
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, api::PostParams};
use snafu::{ResultExt, Snafu};

use crate::client::{K8sClient, SecretReference};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get secret {reference}"))]
    Get {
        source: kube::Error,
        reference: SecretReference,
    },

    #[snafu(display("failed to create secret {reference}"))]
    Create {
        source: kube::Error,
        reference: SecretReference,
    },

    #[snafu(display("failed to update secret {reference}"))]
    Update {
        source: kube::Error,
        reference: SecretReference,
    },
}

/// `Get`/`Create`/`Update` over one namespaced Secret. `Get` returns `Ok(None)`
/// for not-found rather than an error, matching `kube::Error::Api` handling
/// at the one call site that needs to distinguish absence from failure.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, reference: &SecretReference) -> Result<Option<Secret>, Error>;

    async fn create(&self, reference: &SecretReference, secret: Secret) -> Result<Secret, Error>;

    async fn update(&self, reference: &SecretReference, secret: Secret) -> Result<Secret, Error>;
}

/// Production [`SecretStore`] backed by a real [`kube::Client`].
pub struct KubeSecretStore {
    client: K8sClient,
}

impl KubeSecretStore {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        self.client.get_api::<Secret>(namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, reference: &SecretReference) -> Result<Option<Secret>, Error> {
        match self.api(&reference.namespace).get(&reference.name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(source) => Err(source).context(GetSnafu {
                reference: reference.clone(),
            }),
        }
    }

    async fn create(&self, reference: &SecretReference, secret: Secret) -> Result<Secret, Error> {
        self.api(&reference.namespace)
            .create(&PostParams::default(), &secret)
            .await
            .context(CreateSnafu {
                reference: reference.clone(),
            })
    }

    async fn update(&self, reference: &SecretReference, secret: Secret) -> Result<Secret, Error> {
        self.api(&reference.namespace)
            .replace(&secret.metadata.name.clone().unwrap_or_default(), &PostParams::default(), &secret)
            .await
            .context(UpdateSnafu {
                reference: reference.clone(),
            })
    }
}
