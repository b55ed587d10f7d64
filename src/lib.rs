pub mod config;
pub mod controller;
pub mod health;
pub mod trust;
pub mod validation;
pub mod webhooks;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    ClusterStore, Context, Error, KubeStore, NamespaceEventFilter, PodEventFilter,
    ReconcileDecision, Result, WorkloadValidationLabel, namespace_error_policy, pod_error_policy,
    reconcile_namespace, reconcile_pod,
};
pub use health::{HealthState, Metrics};
pub use trust::{TrustConfig, TrustError, TrustResult};
pub use validation::{PodValidator, ValidationResult, ValidationStatus};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    run_webhook_server,
};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::runtime::controller::Controller;
use kube::runtime::reflector::{self, reflector};
use kube::runtime::watcher::{self, Config as WatcherConfig, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::controller::admit_pod_change;
use crate::trust::{NotaryClientFactory, RegistryClient};
use crate::validation::DefaultVerifierFactory;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

pub fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Build the validator for the cluster-wide trust policy, with HTTP trust and registry clients
pub fn build_validator(system_trust: TrustConfig) -> TrustResult<PodValidator> {
    let factory = DefaultVerifierFactory::new(
        system_trust,
        Arc::new(NotaryClientFactory::new()?),
        Arc::new(RegistryClient::new()?),
    )?;
    Ok(PodValidator::new(Arc::new(factory)))
}

/// Run the pod controller with optional namespace scoping.
///
/// Watch events pass through [`PodEventFilter`] and the enrollment check
/// before they reach the reconciler, so no-op updates never trigger a
/// validation.
pub async fn run_pod_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!("Starting controller for Pod resources (scope: {})", scope_msg);

    let pods: Api<Pod> = scoped_api(client, namespace);
    let (reader, writer) = reflector::store();
    let filter = Arc::new(PodEventFilter::new());
    let store = ctx.store.clone();

    let changes = reflector(writer, watcher(pods, default_watcher_config()))
        .default_backoff()
        .filter_map(move |event| {
            let filter = filter.clone();
            let store = store.clone();
            async move {
                match event {
                    Ok(event) => {
                        let change = filter.observe(event)?;
                        admit_pod_change(store.as_ref(), change).await.map(Ok)
                    }
                    Err(e) => Some(Err(e)),
                }
            }
        });

    Controller::for_stream(changes, reader)
        .run(reconcile_pod, pod_error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled pod: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Pod no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Pod reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Pod controller stream ended unexpectedly");
}

/// Run the namespace controller.
///
/// Only a transition from not enrolled to enrolled reaches the reconciler.
pub async fn run_namespace_controller(client: Client, ctx: Arc<Context>) {
    tracing::info!("Starting controller for Namespace resources");

    let namespaces: Api<Namespace> = Api::all(client);
    let (reader, writer) = reflector::store();
    let filter = Arc::new(NamespaceEventFilter::new());

    let transitions = reflector(writer, watcher(namespaces, default_watcher_config()))
        .default_backoff()
        .filter_map(move |event: Result<watcher::Event<Namespace>, watcher::Error>| {
            let admitted = match event {
                Ok(event) => filter.observe(event).map(Ok),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(admitted)
        });

    Controller::for_stream(transitions, reader)
        .run(reconcile_namespace, namespace_error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled namespace: {}", obj.name);
                }
                Err(e) => {
                    tracing::error!("Namespace reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    tracing::error!("Namespace controller stream ended unexpectedly");
}
