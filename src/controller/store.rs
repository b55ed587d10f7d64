//! Cluster access used by the reconcilers
//!
//! [`ClusterStore`] is the seam between reconciliation logic and the
//! Kubernetes API, so the state machines can be exercised against mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::trust::PullCredentials;

/// Field manager and event reporter name
pub const FIELD_MANAGER: &str = "image-trust-operator";

/// Kubernetes events published on pods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustEvent {
    Verified,
    Failed { images: Vec<String> },
    Unavailable,
    LegacyDigestMatch { images: Vec<String> },
}

impl TrustEvent {
    pub fn reason(&self) -> &'static str {
        match self {
            TrustEvent::Verified => "ImageTrustVerified",
            TrustEvent::Failed { .. } => "ImageTrustFailed",
            TrustEvent::Unavailable => "ImageTrustUnavailable",
            TrustEvent::LegacyDigestMatch { .. } => "LegacyDigestMatch",
        }
    }

    pub fn is_warning(&self) -> bool {
        !matches!(self, TrustEvent::Verified)
    }

    pub fn note(&self) -> String {
        match self {
            TrustEvent::Verified => "All container images passed trust verification".to_string(),
            TrustEvent::Failed { images } => {
                format!("Untrusted container images: {}", images.join(", "))
            }
            TrustEvent::Unavailable => {
                "Trust service unavailable, verification will be retried".to_string()
            }
            TrustEvent::LegacyDigestMatch { images } => format!(
                "Images accepted via deprecated config digest match: {}",
                images.join(", ")
            ),
        }
    }
}

/// Reads and writes the cluster objects the reconcilers work on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Live read of a namespace (bypasses any watch cache)
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// Set one label on a pod, failing with a conflict if the pod changed since it was read
    async fn patch_pod_label(&self, pod: &Pod, key: &str, value: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Fire-and-forget; failures are logged, never returned
    async fn publish_event(&self, pod: &Pod, event: TrustEvent);
}

/// [`ClusterStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
}

impl KubeStore {
    /// `instance` identifies this replica as the event reporter
    pub fn new(client: Client, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Merge patch setting one label, guarded by the resource version that was read
pub fn label_patch(pod: &Pod, key: &str, value: &str) -> Result<serde_json::Value> {
    let resource_version = pod
        .metadata
        .resource_version
        .as_deref()
        .ok_or(Error::MissingObjectKey("metadata.resourceVersion"))?;
    Ok(json!({
        "metadata": {
            "resourceVersion": resource_version,
            "labels": { key: value }
        }
    }))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_pod_label(&self, pod: &Pod, key: &str, value: &str) -> Result<()> {
        let namespace = pod
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey("metadata.name"))?;
        let patch = label_patch(pod, key, value)?;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch(name, &params, &Patch::Merge(&patch)).await?;
        debug!(pod = %name, label = %key, value = %value, "Patched pod label");
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn publish_event(&self, pod: &Pod, event: TrustEvent) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let type_ = if event.is_warning() {
            EventType::Warning
        } else {
            EventType::Normal
        };
        let object_ref = pod.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason().into(),
                    note: Some(event.note()),
                    action: "ValidateImages".into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %event.reason(), error = %e, "Failed to publish event");
        }
    }
}

/// Collect registry credentials from the pod's image pull secrets.
///
/// Secrets that cannot be read or decoded are logged and skipped.
pub async fn resolve_pull_credentials(store: &dyn ClusterStore, pod: &Pod) -> PullCredentials {
    let mut credentials = PullCredentials::new();
    let Some(namespace) = pod.metadata.namespace.as_deref() else {
        return credentials;
    };
    let references = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.image_pull_secrets.as_ref());

    for reference in references.into_iter().flatten() {
        let name = reference.name.as_str();
        if name.is_empty() {
            continue;
        }
        let secret = match store.get_secret(namespace, name).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(secret = %name, error = %e, "Skipping unreadable pull secret");
                continue;
            }
        };

        let data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        let secret_type = secret.type_.as_deref().unwrap_or_default();
        match PullCredentials::from_secret_data(secret_type, &data) {
            Some(parsed) => credentials.extend(parsed),
            None => debug!(secret = %name, "Pull secret carries no registry credentials"),
        }
    }
    credentials
}
