//! Admission handlers and the decorator chain through the public webhook API

use std::sync::Arc;
use std::time::Duration;

use image_trust_operator::webhooks::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, RequestContext, default_timeout_response,
    handler_fn, label_gate, review_label, with_logging, with_timeout, with_timing,
};
use kube::core::DynamicObject;
use serde_json::{Value, json};

fn pod_object(image: &str, status: Option<&str>) -> Value {
    let mut pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "web", "namespace": "team-a"},
        "spec": {"containers": [{"name": "app", "image": image}]}
    });
    if let Some(status) = status {
        pod["metadata"]["labels"] = json!({"image-trust.io/validation-status": status});
    }
    pod
}

fn request(
    kind: &str,
    operation: &str,
    object: Option<Value>,
    old_object: Option<Value>,
) -> AdmissionRequest<DynamicObject> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "0b7f1c3e-9a21-4d55-8f3a-2c4e6b8d0f11",
            "kind": {"group": "", "version": "v1", "kind": kind},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "name": "web",
            "namespace": "team-a",
            "operation": operation,
            "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
            "object": object,
            "oldObject": old_object,
            "dryRun": false
        }
    }))
    .unwrap();
    review.try_into().unwrap()
}

#[test]
fn test_label_gate_verdicts() {
    let denied = review_label(&request(
        "Pod",
        "CREATE",
        Some(pod_object("nginx:1.25", Some("failed"))),
        None,
    ));
    assert!(!denied.allowed);
    assert_eq!(denied.result.code, 403);

    let pending = review_label(&request(
        "Pod",
        "CREATE",
        Some(pod_object("nginx:1.25", Some("pending"))),
        None,
    ));
    assert!(pending.allowed);
}

#[test]
fn test_label_gate_ignores_other_kinds() {
    let response = review_label(&request(
        "ConfigMap",
        "CREATE",
        Some(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "web"}})),
        None,
    ));
    assert!(response.allowed);
    assert_eq!(
        response.audit_annotations.get("decision").map(String::as_str),
        Some("not-applicable")
    );
}

#[tokio::test]
async fn test_composed_label_gate_keeps_request_uid() {
    let handler = with_logging(with_timing(
        "label_gate",
        None,
        with_timeout(
            Duration::from_secs(5),
            Arc::new(default_timeout_response),
            label_gate(),
        ),
    ));
    let req = request("Pod", "CREATE", Some(pod_object("nginx:1.25", Some("failed"))), None);
    let response = handler(RequestContext::default(), Arc::new(req)).await;

    assert!(!response.allowed);
    let review = response.into_review();
    assert_eq!(
        review.response.unwrap().uid,
        "0b7f1c3e-9a21-4d55-8f3a-2c4e6b8d0f11"
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_preempts_slow_handler() {
    let slow = handler_fn(|_ctx, req: Arc<AdmissionRequest<DynamicObject>>| async move {
        tokio::time::sleep(Duration::from_secs(120)).await;
        AdmissionResponse::from(req.as_ref())
    });
    let handler = with_timeout(
        Duration::from_secs(10),
        Arc::new(default_timeout_response),
        slow,
    );
    let req = request("Pod", "CREATE", Some(pod_object("nginx:1.25", None)), None);
    let response = handler(RequestContext::default(), Arc::new(req)).await;

    assert!(!response.allowed);
    assert_eq!(response.result.code, 504);
    assert!(response.result.message.contains("timed out"));
}
