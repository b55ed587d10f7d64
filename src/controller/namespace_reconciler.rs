//! Namespace reconciliation: mark every pod pending when validation is enabled

use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::decision::ReconcileDecision;
use crate::controller::error::{Error, Result};
use crate::controller::labels::{WorkloadValidationLabel, current_label};
use crate::controller::store::ClusterStore;
use crate::validation::{Enrollment, POD_STATUS_LABEL};

/// Controller name used in metrics
pub const NAMESPACE_CONTROLLER: &str = "namespace";

#[instrument(skip(namespace, ctx), fields(name = %namespace.name_any()))]
pub async fn reconcile_namespace(namespace: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let decision = mark_pods_pending(ctx.store.as_ref(), &namespace).await?;
    ctx.record_reconcile(NAMESPACE_CONTROLLER, started.elapsed());
    Ok(decision.into_action())
}

pub fn namespace_error_policy(namespace: Arc<Namespace>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        namespace = %namespace.name_any(),
        error = %error,
        "Namespace reconciliation failed"
    );
    ctx.record_error(NAMESPACE_CONTROLLER, error.kind());
    Action::await_change()
}

/// Label every pod of an enrolled namespace `pending`.
///
/// Pods already `pending` are skipped, so re-running is a no-op. A failed patch
/// does not stop the remaining pods; the pass is retried afterwards.
pub async fn mark_pods_pending(
    store: &dyn ClusterStore,
    namespace: &Namespace,
) -> Result<ReconcileDecision> {
    if !Enrollment::of(namespace).is_enrolled() {
        debug!("Namespace no longer enrolled");
        return Ok(ReconcileDecision::Done);
    }
    let name = namespace
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;

    let pods = store.list_pods(name).await?;
    let pending = WorkloadValidationLabel::Pending;
    let mut patched = 0usize;
    let mut failed = 0usize;

    for pod in pods.iter().filter(|pod| current_label(pod) != Some(pending)) {
        match store
            .patch_pod_label(pod, POD_STATUS_LABEL, pending.as_str())
            .await
        {
            Ok(()) => patched += 1,
            Err(e) => {
                warn!(pod = %pod.name_any(), error = %e, "Failed to mark pod pending");
                failed += 1;
            }
        }
    }

    info!(
        pods = pods.len(),
        patched, failed, "Marked namespace pods pending validation"
    );

    if failed > 0 {
        Ok(ReconcileDecision::RetryNow)
    } else {
        Ok(ReconcileDecision::Done)
    }
}
