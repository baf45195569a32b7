//! In-memory fakes for [`SecretStore`](crate::secret_store::SecretStore) and
//! [`ResourceStore`](crate::resource_store::ResourceStore), used by unit
//! tests throughout this crate and by the integration tests under `tests/`.
//! Mirrors the original implementation's `FakeSecretInterface` fixture: a
//! lock-guarded slot plus call counters the test can assert against.
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::stream;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DynamicObject, GroupVersionKind},
    runtime::watcher::Event,
};

use crate::{
    client::SecretReference,
    resource_store::{self, ResourceStore, WatchStream},
    secret_store::{self, SecretStore},
};

#[derive(Default)]
pub struct FakeSecretStore {
    secrets: Mutex<HashMap<SecretReference, Secret>>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl FakeSecretStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn seeded(reference: SecretReference, secret: Secret) -> Self {
        let store = Self::default();
        store.secrets.lock().unwrap().insert(reference, secret);
        store
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get(&self, reference: &SecretReference) -> Result<Option<Secret>, secret_store::Error> {
        Ok(self.secrets.lock().unwrap().get(reference).cloned())
    }

    async fn create(
        &self,
        reference: &SecretReference,
        secret: Secret,
    ) -> Result<Secret, secret_store::Error> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut secrets = self.secrets.lock().unwrap();
        secrets.insert(reference.clone(), secret.clone());
        Ok(secret)
    }

    async fn update(
        &self,
        reference: &SecretReference,
        secret: Secret,
    ) -> Result<Secret, secret_store::Error> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut secrets = self.secrets.lock().unwrap();
        secrets.insert(reference.clone(), secret.clone());
        Ok(secret)
    }
}

#[derive(Default)]
pub struct FakeResourceStore {
    objects: Mutex<HashMap<String, DynamicObject>>,
    update_calls: AtomicUsize,
}

impl FakeResourceStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn seeded(name: &str, object: DynamicObject) -> Self {
        let store = Self::default();
        store.objects.lock().unwrap().insert(name.to_string(), object);
        store
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn get_stored(&self, name: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl ResourceStore for FakeResourceStore {
    async fn get(
        &self,
        _gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Option<DynamicObject>, resource_store::Error> {
        Ok(self.objects.lock().unwrap().get(name).cloned())
    }

    async fn update(
        &self,
        _gvk: &GroupVersionKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, resource_store::Error> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let name = object.metadata.name.clone().unwrap_or_default();
        self.objects.lock().unwrap().insert(name, object.clone());
        Ok(object)
    }

    fn watch(&self, _gvk: &GroupVersionKind, name: &str) -> WatchStream {
        let event = self
            .objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .map(Event::Applied);
        Box::pin(stream::iter(event.map(Ok)))
    }
}
