//! Owns CA-bundle injection into each referenced webhook-configuration
//! resource, and the watch loop that re-injects whenever a third party
//! drifts the `caBundle` away from the authoritative CA.
use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use kube::{api::GroupVersionKind, runtime::watcher::Event};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    backoff::Backoff,
    options::WebhookInfo,
    pem::valid_pem_certificate_blocks,
    resource_store::ResourceStore,
    util::remove_dup,
};

#[derive(Debug, Snafu)]
pub enum WebhookManagerError {
    #[snafu(display("failed to get webhook configuration {kind:?}/{name}"))]
    Get {
        source: crate::resource_store::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to update webhook configuration {kind:?}/{name}"))]
    Update {
        source: crate::resource_store::Error,
        kind: String,
        name: String,
    },
}

fn gvk(webhook: &WebhookInfo) -> GroupVersionKind {
    GroupVersionKind {
        group: webhook.kind.group().to_string(),
        version: webhook.kind.version().to_string(),
        kind: webhook.kind.kind().to_string(),
    }
}

/// Owns CA-bundle injection across the configured set of webhooks.
pub struct WebhookManager {
    webhooks: Vec<WebhookInfo>,
    store: Arc<dyn ResourceStore>,
}

impl WebhookManager {
    pub fn new(webhooks: Vec<WebhookInfo>, store: Arc<dyn ResourceStore>) -> Self {
        Self { webhooks, store }
    }

    /// Injects `ca_pem` into every configured webhook, skipping any that
    /// aren't installed yet. Transient errors are retried with backoff
    /// before being surfaced; `NotFound` is always a silent skip.
    #[instrument(skip(self, ca_pem))]
    pub async fn ensure_ca(&self, ca_pem: &str) -> Result<(), WebhookManagerError> {
        for webhook in &self.webhooks {
            self.ensure_ca_on_one(webhook, ca_pem).await?;
        }
        Ok(())
    }

    async fn ensure_ca_on_one(
        &self,
        webhook: &WebhookInfo,
        ca_pem: &str,
    ) -> Result<(), WebhookManagerError> {
        let gvk = gvk(webhook);
        let backoff = Backoff::default();

        for step in 0..backoff.max_steps() {
            let object = match self.store.get(&gvk, &webhook.name).await {
                Ok(Some(object)) => object,
                Ok(None) => {
                    debug!(name = %webhook.name, "webhook configuration not installed, skipping");
                    return Ok(());
                }
                Err(source) => {
                    if step + 1 == backoff.max_steps() {
                        return Err(WebhookManagerError::Get {
                            source,
                            kind: webhook.kind.kind().to_string(),
                            name: webhook.name.clone(),
                        });
                    }
                    tokio::time::sleep(backoff.delay(step)).await;
                    continue;
                }
            };

            let mut object = object;
            let changed = inject_cert_to_webhook(&mut object, ca_pem);
            if !changed {
                return Ok(());
            }

            match self.store.update(&gvk, object).await {
                Ok(_) => {
                    info!(name = %webhook.name, "injected CA bundle into webhook configuration");
                    return Ok(());
                }
                Err(crate::resource_store::Error::Update { source, .. })
                    if is_not_found(&source) =>
                {
                    debug!(name = %webhook.name, "webhook configuration removed mid-update, skipping");
                    return Ok(());
                }
                Err(source) => {
                    if step + 1 == backoff.max_steps() {
                        return Err(WebhookManagerError::Update {
                            source,
                            kind: webhook.kind.kind().to_string(),
                            name: webhook.name.clone(),
                        });
                    }
                    tokio::time::sleep(backoff.delay(step)).await;
                }
            }
        }

        Ok(())
    }

    /// Spawns one drift watcher per configured webhook, fans their events
    /// into a single coalesced reconcile loop that re-derives the CA from
    /// `secret` via `rederive_ca` and re-runs [`Self::ensure_ca`].
    ///
    /// Runs until `token` is cancelled.
    pub async fn watch_and_ensure(
        self: Arc<Self>,
        token: CancellationToken,
        resync: Duration,
        rederive_ca: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let rederive_ca = Arc::new(rederive_ca);

        for webhook in self.webhooks.clone() {
            let tx = tx.clone();
            let token = token.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                watch_changes(store, webhook, resync, token, tx).await;
            });
        }
        drop(tx);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                event = rx.recv() => {
                    if event.is_none() {
                        return;
                    }
                    // Coalesce: drain any further pending notifications
                    // that queued up while we were deciding to reconcile.
                    while rx.try_recv().is_ok() {}

                    if let Some(ca_pem) = rederive_ca() {
                        if let Err(error) = self.ensure_ca(&ca_pem).await {
                            warn!(%error, "failed to re-assert CA bundle after drift event");
                        }
                    }
                }
            }
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(err) if err.code == 404)
}

/// Watches one webhook configuration, forwarding every `Applied`/restarted
/// event to `tx`. Reopens the watch with backoff on error, and synthesizes a
/// pseudo-event every `resync` to defend against missed notifications.
/// Exits cleanly, and without leaking the underlying watch, when `token` is
/// cancelled.
async fn watch_changes(
    store: Arc<dyn ResourceStore>,
    webhook: WebhookInfo,
    resync: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<()>,
) {
    let gvk = gvk(&webhook);
    let backoff = Backoff::default();
    let mut step = 0u32;

    loop {
        let mut stream = store.watch(&gvk, &webhook.name);
        let mut resync_timer = tokio::time::interval(resync);
        resync_timer.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = resync_timer.tick() => {
                    if tx.send(()).await.is_err() {
                        return;
                    }
                }
                event = stream.next() => {
                    match event {
                        Some(Ok(Event::Applied(_) | Event::Restarted(_))) => {
                            step = 0;
                            if tx.send(()).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Event::Deleted(_))) => {
                            // The configuration itself was removed; nothing
                            // to re-inject until it reappears.
                        }
                        Some(Err(error)) => {
                            warn!(name = %webhook.name, %error, "watch stream error, reopening");
                            break;
                        }
                        None => {
                            warn!(name = %webhook.name, "watch stream closed, reopening");
                            break;
                        }
                    }
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(backoff.delay(step)) => {}
        }
        step = (step + 1).min(backoff.max_steps() - 1);
    }
}

/// Injects `new_ca_pem` into every `webhooks[*].clientConfig.caBundle` entry
/// of `object`, returning whether anything actually changed. Computed
/// per-entry: two entries in the same configuration may carry different
/// pre-existing bundles.
pub fn inject_cert_to_webhook(object: &mut kube::api::DynamicObject, new_ca_pem: &str) -> bool {
    let new_certs = valid_pem_certificate_blocks(new_ca_pem.as_bytes());
    let mut changed = false;

    let Some(webhooks) = object
        .data
        .get_mut("webhooks")
        .and_then(Value::as_array_mut)
    else {
        return false;
    };

    for entry in webhooks.iter_mut() {
        let current = entry
            .pointer("/clientConfig/caBundle")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let existing_valid = valid_pem_certificate_blocks(current.as_bytes());
        let merged = remove_dup(new_certs.iter().cloned().chain(existing_valid))
            .join("\n");

        if crate::pem::pem_eq(&merged, current) {
            continue;
        }

        if let Some(client_config) = entry.get_mut("clientConfig").and_then(Value::as_object_mut) {
            client_config.insert("caBundle".to_string(), Value::String(merged));
            changed = true;
        } else if let Some(obj) = entry.as_object_mut() {
            let mut client_config = serde_json::Map::new();
            client_config.insert("caBundle".to_string(), Value::String(merged));
            obj.insert("clientConfig".to_string(), Value::Object(client_config));
            changed = true;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::api::{DynamicObject, TypeMeta};
    use serde_json::json;

    fn webhook_config(webhooks: Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "admissionregistration.k8s.io/v1".to_string(),
                kind: "ValidatingWebhookConfiguration".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                ..Default::default()
            },
            data: json!({ "webhooks": webhooks }),
        }
    }

    fn fake_ca_pem(subject: &str) -> String {
        use webhookcert_certs::ca::CertificateAuthority;
        use x509_cert::der::EncodePem;

        let ca = CertificateAuthority::builder_with_rsa()
            .subject(subject)
            .build()
            .expect("failed to build CA");
        ca.ca_cert()
            .to_pem(x509_cert::der::pem::LineEnding::LF)
            .expect("failed to PEM-encode CA")
    }

    #[test]
    fn injects_into_empty_bundle() {
        let ca_a = fake_ca_pem("CN=CA A");
        let mut object = webhook_config(json!([
            { "name": "validate", "clientConfig": { "caBundle": "" } }
        ]));

        let changed = inject_cert_to_webhook(&mut object, &ca_a);
        assert!(changed);
        let bundle = object.data["webhooks"][0]["clientConfig"]["caBundle"]
            .as_str()
            .unwrap();
        assert!(crate::pem::pem_eq(bundle, &ca_a));
    }

    #[test]
    fn merges_new_ca_ahead_of_existing() {
        let ca_a = fake_ca_pem("CN=CA A");
        let ca_b = fake_ca_pem("CN=CA B");
        let mut object = webhook_config(json!([
            { "name": "validate", "clientConfig": { "caBundle": ca_b } }
        ]));

        let changed = inject_cert_to_webhook(&mut object, &ca_a);
        assert!(changed);
        let bundle = object.data["webhooks"][0]["clientConfig"]["caBundle"]
            .as_str()
            .unwrap();
        let expected = format!("{}\n{}", ca_a.trim(), ca_b.trim());
        assert!(crate::pem::pem_eq(bundle, &expected));
    }

    #[test]
    fn duplicate_inject_is_a_noop() {
        let ca_a = fake_ca_pem("CN=CA A");
        let mut object = webhook_config(json!([
            { "name": "validate", "clientConfig": { "caBundle": ca_a } }
        ]));

        let changed = inject_cert_to_webhook(&mut object, &ca_a);
        assert!(!changed);
    }

    #[test]
    fn invalid_pem_dropped_valid_neighbor_kept() {
        let ca_a = fake_ca_pem("CN=CA A");
        let ca_b = fake_ca_pem("CN=CA B");
        let garbage = "-----BEGIN CERTIFICATE-----\nNOT-VALID\n-----END CERTIFICATE-----";
        let bundle = format!("{garbage}\n{ca_b}");
        let mut object = webhook_config(json!([
            { "name": "validate", "clientConfig": { "caBundle": bundle } }
        ]));

        let changed = inject_cert_to_webhook(&mut object, &ca_a);
        assert!(changed);
        let bundle = object.data["webhooks"][0]["clientConfig"]["caBundle"]
            .as_str()
            .unwrap();
        assert!(crate::pem::pem_eq(bundle, &format!("{}\n{}", ca_a.trim(), ca_b.trim())));
    }

    #[test]
    fn each_webhook_entry_merged_independently() {
        let ca_a = fake_ca_pem("CN=CA A");
        let ca_b = fake_ca_pem("CN=CA B");
        let mut object = webhook_config(json!([
            { "name": "validate", "clientConfig": { "caBundle": ca_b } },
            { "name": "validate-2", "clientConfig": { "caBundle": "" } },
        ]));

        inject_cert_to_webhook(&mut object, &ca_a);
        let first = object.data["webhooks"][0]["clientConfig"]["caBundle"]
            .as_str()
            .unwrap();
        let second = object.data["webhooks"][1]["clientConfig"]["caBundle"]
            .as_str()
            .unwrap();
        assert!(crate::pem::pem_eq(first, &format!("{}\n{}", ca_a.trim(), ca_b.trim())));
        assert!(crate::pem::pem_eq(second, &ca_a));
    }
}
