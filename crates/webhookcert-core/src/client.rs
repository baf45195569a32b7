//! Thin wrapper over [`kube::Client`] exposing only the narrow surface this
//! crate needs: typed namespaced APIs, and a dynamic API for cluster-scoped
//! resources addressed by group/version/kind.
use std::fmt;

use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Client, Resource,
    api::{ApiResource, DynamicObject, GroupVersionKind},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to infer a Kubernetes client config"))]
    InferConfig { source: kube::Error },
}

/// Identifies a namespaced Secret by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Thin handle around [`kube::Client`].
///
/// Only exposes the two access patterns the reconciliation core actually
/// uses: a typed namespaced [`Api`] for Secrets, and a dynamic [`Api`] for
/// cluster-scoped webhook-configuration objects identified by GVK.
#[derive(Debug, Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Builds a client by inferring configuration from the environment
    /// (in-cluster service account, or local kubeconfig).
    pub async fn try_default() -> Result<Self, Error> {
        let client = Client::try_default().await.context(InferConfigSnafu)?;
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn underlying(&self) -> &Client {
        &self.client
    }

    /// Typed API scoped to a single namespace, for namespaced kinds such as
    /// `Secret`.
    pub fn get_api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + fmt::Debug,
        K: DeserializeOwned + Serialize,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Dynamic API over a cluster-scoped resource identified by GVK, used
    /// for `ValidatingWebhookConfiguration`/`MutatingWebhookConfiguration`
    /// without pulling in a typed dependency on every admission-registration
    /// kind.
    pub fn get_dynamic_api_all(&self, gvk: &GroupVersionKind) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        Api::all_with(self.client.clone(), &resource)
    }
}
