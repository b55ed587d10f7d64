//! Pod image collection and result aggregation

use image_trust_operator::trust::{TrustError, Verification};
use image_trust_operator::validation::{
    ValidationResult, ValidationStatus, aggregate, collect_images, pod_images,
};

use crate::common::PodBuilder;

fn outcome(image: &str, result: Result<Verification, TrustError>) -> (String, Result<Verification, TrustError>) {
    (image.to_string(), result)
}

#[test]
fn test_images_include_init_containers_first() {
    let pod = PodBuilder::new("web")
        .init_image("busybox:1.36")
        .image("nginx:1.25")
        .image("busybox:1.36")
        .build();

    assert_eq!(
        pod_images(&pod),
        vec!["busybox:1.36", "nginx:1.25", "busybox:1.36"]
    );
    assert_eq!(collect_images(&pod).len(), 2);
}

#[test]
fn test_invalid_takes_precedence_and_lists_every_bad_image() {
    let result = aggregate([
        outcome("a:1", Err(TrustError::untrusted("hash mismatch"))),
        outcome("b:1", Err(TrustError::unknown("timeout"))),
        outcome("c:1", Ok(Verification::Digest)),
        outcome("d:1", Err(TrustError::untrusted("no trust data"))),
    ]);
    assert_eq!(result.status(), ValidationStatus::Invalid);
    assert_eq!(
        result.invalid_images().iter().cloned().collect::<Vec<_>>(),
        vec!["a:1", "d:1"]
    );
}

#[test]
fn test_unknown_without_invalid_is_unavailable() {
    let result = aggregate([
        outcome("a:1", Ok(Verification::Bypassed)),
        outcome("b:1", Err(TrustError::unknown("connection refused"))),
    ]);
    assert_eq!(result.status(), ValidationStatus::ServiceUnavailable);
    assert!(result.invalid_images().is_empty());
}

#[test]
fn test_all_verified_is_valid_with_legacy_matches_recorded() {
    let result = aggregate([
        outcome("a:1", Ok(Verification::Digest)),
        outcome("b:1", Ok(Verification::LegacyConfigDigest)),
    ]);
    assert_eq!(result.status(), ValidationStatus::Valid);
    assert!(result.legacy_images().contains("b:1"));
}

#[test]
fn test_invalid_result_requires_images() {
    assert!(ValidationResult::invalid(Vec::<String>::new()).is_none());
    let result = ValidationResult::invalid(["x:1".to_string()]).unwrap();
    assert_eq!(result.status(), ValidationStatus::Invalid);
    assert_eq!(ValidationStatus::ServiceUnavailable.as_str(), "service_unavailable");
}
