//! Pod reconciliation: validate images and converge the status label

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::decision::ReconcileDecision;
use crate::controller::error::{Error, Result};
use crate::controller::labels::{WorkloadValidationLabel, current_label};
use crate::controller::store::{TrustEvent, resolve_pull_credentials};
use crate::trust::CallContext;
use crate::validation::{Enrollment, POD_STATUS_LABEL, ValidationResult, ValidationStatus};

/// Controller name used in metrics
pub const POD_CONTROLLER: &str = "pod";

#[instrument(skip(pod, ctx), fields(name = %pod.name_any(), namespace = pod.namespace().unwrap_or_default()))]
pub async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let decision = validate_and_label(&pod, &ctx).await?;
    ctx.record_reconcile(POD_CONTROLLER, started.elapsed());
    debug!(?decision, "Pod reconciled");
    Ok(decision.into_action())
}

/// Errors are fatal for this reconcile: report them and wait for the next change
pub fn pod_error_policy(pod: Arc<Pod>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_not_found() {
        debug!(pod = %pod.name_any(), "Object no longer exists: {}", error);
    } else {
        error!(
            pod = %pod.name_any(),
            namespace = pod.namespace().unwrap_or_default(),
            error = %error,
            "Pod reconciliation failed"
        );
    }
    ctx.record_error(POD_CONTROLLER, error.kind());
    Action::await_change()
}

/// One observe-decide-act pass for a pod
pub async fn validate_and_label(pod: &Pod, ctx: &Context) -> Result<ReconcileDecision> {
    let namespace_name = pod
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let namespace = ctx.store.get_namespace(&namespace_name).await?;

    // Stale labels on pods of a disabled namespace are left as they are
    if !Enrollment::of(&namespace).is_enrolled() {
        debug!("Namespace not enrolled, nothing to do");
        return Ok(ReconcileDecision::Done);
    }

    let credentials = resolve_pull_credentials(ctx.store.as_ref(), pod).await;
    let result = ctx
        .validator
        .validate_pod(&CallContext::background(), pod, &namespace, &credentials)
        .await?;

    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_validation(result.status(), result.legacy_images().len());
    }

    let Some(label) = WorkloadValidationLabel::for_status(result.status()) else {
        return Ok(ReconcileDecision::Done);
    };

    if !result.legacy_images().is_empty() {
        ctx.store
            .publish_event(
                pod,
                TrustEvent::LegacyDigestMatch {
                    images: result.legacy_images().iter().cloned().collect(),
                },
            )
            .await;
    }

    if current_label(pod) != Some(label) {
        if let Err(e) = ctx
            .store
            .patch_pod_label(pod, POD_STATUS_LABEL, label.as_str())
            .await
        {
            if e.is_conflict() {
                debug!("Pod changed since it was read, retrying");
            } else {
                warn!(error = %e, label = %label, "Failed to patch pod label, retrying");
            }
            return Ok(ReconcileDecision::RetryNow);
        }
        info!(label = %label, status = %result.status(), "Updated pod validation label");
        ctx.store.publish_event(pod, event_for(&result)).await;
    }

    Ok(match result.status() {
        ValidationStatus::ServiceUnavailable => ReconcileDecision::RetryAfter(ctx.retry_interval),
        _ => ReconcileDecision::Done,
    })
}

fn event_for(result: &ValidationResult) -> TrustEvent {
    match result.status() {
        ValidationStatus::Invalid => TrustEvent::Failed {
            images: result.invalid_images().iter().cloned().collect(),
        },
        ValidationStatus::ServiceUnavailable => TrustEvent::Unavailable,
        ValidationStatus::Valid | ValidationStatus::NoAction => TrustEvent::Verified,
    }
}
