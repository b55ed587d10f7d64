//! Admission handlers for pods
//!
//! `label_gate` rejects pods whose status label already says `failed`.
//! `trust_gate` validates images inline and annotates the admitted pod.

use std::sync::Arc;

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionResponse, Operation};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::controller::{
    ClusterStore, WorkloadValidationLabel, are_images_changed, current_label,
    resolve_pull_credentials,
};
use crate::validation::{Enrollment, PodValidator, ValidationResult, ValidationStatus};
use crate::webhooks::pipeline::{
    AdmissionHandler, Request, RequestContext, forbidden, handler_fn, internal_error,
};

/// Pod annotation written by the mutating handler
pub const ADMISSION_RESULT_ANNOTATION: &str = "image-trust.io/admission-result";

/// Audit annotation key marking a request the handlers do not act on
pub const DECISION_AUDIT_KEY: &str = "decision";

/// Explicit allow for a request outside the handlers' remit
pub fn not_applicable(req: &Request) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(req);
    response
        .audit_annotations
        .insert(DECISION_AUDIT_KEY.to_string(), "not-applicable".to_string());
    response
}

/// CREATE or UPDATE of a core pod; anything else is not ours
fn is_pod_write(req: &Request) -> bool {
    req.kind.group.is_empty()
        && req.kind.kind == "Pod"
        && matches!(req.operation, Operation::Create | Operation::Update)
}

fn decode_pod(object: &DynamicObject) -> Result<Pod, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(object)?)
}

/// For an UPDATE whose old object decodes, whether the image multiset changed
fn update_changes_images(req: &Request, pod: &Pod) -> Option<bool> {
    if !matches!(req.operation, Operation::Update) {
        return None;
    }
    let old = decode_pod(req.old_object.as_ref()?).ok()?;
    Some(are_images_changed(&old, pod))
}

/// Validating handler: deny pods labelled `failed`
pub fn label_gate() -> AdmissionHandler {
    handler_fn(|_ctx: RequestContext, req: Arc<Request>| async move { review_label(&req) })
}

/// Decide a request against the pod's current status label.
///
/// An UPDATE that changes the image multiset is let through so the controller
/// can re-validate the new images.
pub fn review_label(req: &Request) -> AdmissionResponse {
    if !is_pod_write(req) {
        return not_applicable(req);
    }
    let Some(object) = req.object.as_ref() else {
        return not_applicable(req);
    };
    let pod = match decode_pod(object) {
        Ok(pod) => pod,
        Err(e) => {
            error!(error = %e, "Failed to decode pod");
            return internal_error(req, format!("failed to decode pod: {e}"));
        }
    };

    match current_label(&pod) {
        None => not_applicable(req),
        Some(WorkloadValidationLabel::Failed) => {
            if update_changes_images(req, &pod) == Some(true) {
                debug!("Images changed on failed pod, allowing for re-validation");
                return AdmissionResponse::from(req);
            }
            info!("Denying pod with failed image validation");
            forbidden(
                req,
                "pod failed image trust validation; update its images to re-validate",
            )
        }
        Some(_) => AdmissionResponse::from(req),
    }
}

/// Mutating handler: validate images inline and record the verdict on the pod
pub fn trust_gate(store: Arc<dyn ClusterStore>, validator: PodValidator) -> AdmissionHandler {
    handler_fn(move |ctx: RequestContext, req: Arc<Request>| {
        let store = store.clone();
        let validator = validator.clone();
        async move { review_trust(store.as_ref(), &validator, &ctx, &req).await }
    })
}

/// Validate a pod write inline.
///
/// UPDATEs that keep the image multiset, such as status label patches, are
/// not re-verified.
pub async fn review_trust(
    store: &dyn ClusterStore,
    validator: &PodValidator,
    ctx: &RequestContext,
    req: &Request,
) -> AdmissionResponse {
    if !is_pod_write(req) {
        return not_applicable(req);
    }
    let Some(object) = req.object.as_ref() else {
        return not_applicable(req);
    };
    let mut pod = match decode_pod(object) {
        Ok(pod) => pod,
        Err(e) => {
            error!(error = %e, "Failed to decode pod");
            return internal_error(req, format!("failed to decode pod: {e}"));
        }
    };
    if update_changes_images(req, &pod) == Some(false) {
        debug!("Images unchanged on update, skipping trust validation");
        return not_applicable(req);
    }
    // Pods created from a controller template may not carry their namespace yet
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = req.namespace.clone();
    }
    let Some(namespace_name) = pod.metadata.namespace.clone() else {
        return internal_error(req, "pod has no namespace");
    };

    let namespace = match store.get_namespace(&namespace_name).await {
        Ok(namespace) => namespace,
        Err(e) => {
            error!(namespace = %namespace_name, error = %e, "Failed to look up namespace");
            return internal_error(req, format!("failed to look up namespace: {e}"));
        }
    };
    if !Enrollment::of(&namespace).is_enrolled() {
        return not_applicable(req);
    }

    let credentials = resolve_pull_credentials(store, &pod).await;
    let result = match validator
        .validate_pod(ctx.call(), &pod, &namespace, &credentials)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Inline validation failed");
            return internal_error(req, e.to_string());
        }
    };

    match result.status() {
        ValidationStatus::Invalid => {
            let images = result
                .invalid_images()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            info!(images = %images, "Denying pod with untrusted images");
            forbidden(req, format!("untrusted images: {images}"))
        }
        ValidationStatus::Valid | ValidationStatus::ServiceUnavailable => {
            if result.status() == ValidationStatus::ServiceUnavailable {
                warn!("Trust service unavailable, admitting pod for later validation");
            }
            annotate(req, &pod, &result)
        }
        ValidationStatus::NoAction => not_applicable(req),
    }
}

fn admission_result_value(status: ValidationStatus) -> &'static str {
    match status {
        ValidationStatus::ServiceUnavailable => "service-unavailable",
        _ => "valid",
    }
}

/// JSON patch recording the verdict, creating the annotation map when absent
pub fn annotation_patch(pod: &Pod, value: &str) -> Vec<PatchOperation> {
    let op = if pod.metadata.annotations.is_some() {
        AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations", ADMISSION_RESULT_ANNOTATION]),
            value: json!(value),
        }
    } else {
        AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations"]),
            value: json!({ ADMISSION_RESULT_ANNOTATION: value }),
        }
    };
    vec![PatchOperation::Add(op)]
}

fn annotate(req: &Request, pod: &Pod, result: &ValidationResult) -> AdmissionResponse {
    let ops = annotation_patch(pod, admission_result_value(result.status()));
    match AdmissionResponse::from(req).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to serialize patch");
            internal_error(req, format!("patch serialization error: {e}"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::controller::store::MockClusterStore;
    use crate::trust::verifier::MockImageVerifier;
    use crate::trust::{ImageVerifier, TrustError, Verification};
    use crate::validation::orchestrator::MockVerifierFactory;
    use crate::validation::{NAMESPACE_VALIDATION_LABEL, POD_STATUS_LABEL};
    use crate::webhooks::pipeline::tests::pod_request;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn pod_json(image: &str, label: Option<&str>) -> Value {
        let mut pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "team-a"},
            "spec": {"containers": [{"name": "app", "image": image}]}
        });
        if let Some(label) = label {
            pod["metadata"]["labels"] = json!({ POD_STATUS_LABEL: label });
        }
        pod
    }

    fn namespace(label: Option<&str>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("team-a".to_string()),
                labels: label.map(|v| {
                    BTreeMap::from([(NAMESPACE_VALIDATION_LABEL.to_string(), v.to_string())])
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn store_with(label: Option<&'static str>) -> MockClusterStore {
        let mut store = MockClusterStore::new();
        store
            .expect_get_namespace()
            .returning(move |_| Ok(namespace(label)));
        store
    }

    fn validator_with(outcome: fn() -> Result<Verification, TrustError>) -> PodValidator {
        let mut verifier = MockImageVerifier::new();
        verifier
            .expect_verify()
            .returning(move |_, _, _| outcome());
        let verifier: Arc<dyn ImageVerifier> = Arc::new(verifier);
        let mut factory = MockVerifierFactory::new();
        factory
            .expect_verifier_for()
            .returning(move |_| Ok(verifier.clone()));
        PodValidator::new(Arc::new(factory))
    }

    fn is_not_applicable(response: &AdmissionResponse) -> bool {
        response.allowed
            && response.audit_annotations.get(DECISION_AUDIT_KEY).map(String::as_str)
                == Some("not-applicable")
    }

    #[test]
    fn test_label_gate_denies_failed_pod_on_create() {
        let req = pod_request("CREATE", Some(pod_json("nginx:1.25", Some("failed"))), None);
        let response = review_label(&req);
        assert!(!response.allowed);
        assert_eq!(response.result.code, 403);
    }

    #[test]
    fn test_label_gate_allows_image_change_on_failed_pod() {
        let req = pod_request(
            "UPDATE",
            Some(pod_json("nginx:1.26", Some("failed"))),
            Some(pod_json("nginx:1.25", Some("failed"))),
        );
        assert!(review_label(&req).allowed);
    }

    #[test]
    fn test_label_gate_denies_failed_update_without_image_change() {
        let req = pod_request(
            "UPDATE",
            Some(pod_json("nginx:1.25", Some("failed"))),
            Some(pod_json("nginx:1.25", Some("pending"))),
        );
        assert!(!review_label(&req).allowed);
    }

    #[test]
    fn test_label_gate_not_applicable_cases() {
        let unlabelled = pod_request("CREATE", Some(pod_json("nginx:1.25", None)), None);
        assert!(is_not_applicable(&review_label(&unlabelled)));

        let delete = pod_request("DELETE", None, Some(pod_json("nginx:1.25", Some("failed"))));
        assert!(is_not_applicable(&review_label(&delete)));
    }

    #[test]
    fn test_label_gate_plain_allow_for_success() {
        let req = pod_request("CREATE", Some(pod_json("nginx:1.25", Some("success"))), None);
        let response = review_label(&req);
        assert!(response.allowed);
        assert!(!is_not_applicable(&response));
    }

    #[test]
    fn test_annotation_patch_creates_map_when_absent() {
        let pod = Pod::default();
        let ops = annotation_patch(&pod, "valid");
        let PatchOperation::Add(op) = &ops[0] else {
            panic!("expected add");
        };
        assert_eq!(op.path, PointerBuf::from_tokens(["metadata", "annotations"]));
        assert_eq!(op.value[ADMISSION_RESULT_ANNOTATION], "valid");
    }

    #[test]
    fn test_annotation_patch_escapes_key() {
        let mut pod = Pod::default();
        pod.metadata.annotations = Some(BTreeMap::new());
        let ops = annotation_patch(&pod, "service-unavailable");
        let PatchOperation::Add(op) = &ops[0] else {
            panic!("expected add");
        };
        assert_eq!(
            op.path.to_string(),
            "/metadata/annotations/image-trust.io~1admission-result"
        );
    }

    #[tokio::test]
    async fn test_trust_gate_annotates_valid_pod() {
        let store = store_with(Some("system"));
        let validator = validator_with(|| Ok(Verification::Digest));
        let req = pod_request("CREATE", Some(pod_json("nginx:1.25", None)), None);

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(response.allowed);
        let patch: Value = serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap();
        assert_eq!(patch[0]["path"], "/metadata/annotations");
        assert_eq!(patch[0]["value"][ADMISSION_RESULT_ANNOTATION], "valid");
    }

    #[tokio::test]
    async fn test_trust_gate_denies_untrusted_pod() {
        let store = store_with(Some("system"));
        let validator = validator_with(|| Err(TrustError::untrusted("no trust data")));
        let req = pod_request("CREATE", Some(pod_json("evil:latest", None)), None);

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(!response.allowed);
        assert_eq!(response.result.code, 403);
        assert!(response.result.message.contains("evil:latest"));
    }

    #[tokio::test]
    async fn test_trust_gate_admits_when_service_unavailable() {
        let store = store_with(Some("system"));
        let validator = validator_with(|| Err(TrustError::unknown("backend down")));
        let req = pod_request("CREATE", Some(pod_json("nginx:1.25", None)), None);

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(response.allowed);
        let patch: Value = serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap();
        assert_eq!(
            patch[0]["value"][ADMISSION_RESULT_ANNOTATION],
            "service-unavailable"
        );
    }

    #[tokio::test]
    async fn test_trust_gate_skips_label_only_update() {
        // Mocks without expectations panic if called
        let store = MockClusterStore::new();
        let validator = PodValidator::new(Arc::new(MockVerifierFactory::new()));
        let req = pod_request(
            "UPDATE",
            Some(pod_json("nginx:1.25", Some("pending"))),
            Some(pod_json("nginx:1.25", Some("success"))),
        );

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(is_not_applicable(&response));
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_trust_gate_validates_update_with_new_images() {
        let store = store_with(Some("system"));
        let validator = validator_with(|| Err(TrustError::untrusted("no trust data")));
        let req = pod_request(
            "UPDATE",
            Some(pod_json("evil:latest", Some("success"))),
            Some(pod_json("nginx:1.25", Some("success"))),
        );

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(!response.allowed);
        assert_eq!(response.result.code, 403);
    }

    #[tokio::test]
    async fn test_trust_gate_skips_unenrolled_namespace() {
        let store = store_with(None);
        let validator = PodValidator::new(Arc::new(MockVerifierFactory::new()));
        let req = pod_request("CREATE", Some(pod_json("nginx:1.25", None)), None);

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(is_not_applicable(&response));
    }

    #[tokio::test]
    async fn test_trust_gate_misconfigured_user_namespace_is_internal_error() {
        let store = store_with(Some("user"));
        let validator = PodValidator::new(Arc::new(MockVerifierFactory::new()));
        let req = pod_request("CREATE", Some(pod_json("nginx:1.25", None)), None);

        let response = review_trust(&store, &validator, &RequestContext::default(), &req).await;
        assert!(!response.allowed);
        assert_eq!(response.result.code, 500);
    }
}
