//! Pod and namespace event filtering

use image_trust_operator::controller::{
    NamespaceEventFilter, PodChange, PodEventFilter, WorkloadValidationLabel, are_images_changed,
    current_label, is_enablement_transition, is_pod_update_relevant,
};
use image_trust_operator::validation::ValidationStatus;
use kube::runtime::watcher::Event;

use crate::common::{PodBuilder, namespace};

#[test]
fn test_image_change_ignores_order_but_not_multiplicity() {
    let old = PodBuilder::new("web").image("nginx:1.25").image("envoy:1.30").build();
    let reordered = PodBuilder::new("web").image("envoy:1.30").image("nginx:1.25").build();
    let duplicated = PodBuilder::new("web")
        .image("nginx:1.25")
        .image("nginx:1.25")
        .image("envoy:1.30")
        .build();

    assert!(!are_images_changed(&old, &reordered));
    assert!(are_images_changed(&old, &duplicated));
}

#[test]
fn test_update_relevance() {
    let validated = PodBuilder::new("web").image("nginx:1.25").status("success").build();
    let resynced = PodBuilder::new("web").image("nginx:1.25").status("success").build();
    assert!(!is_pod_update_relevant(&validated, &resynced));

    let bumped = PodBuilder::new("web")
        .image("nginx:1.25")
        .status("success")
        .resource_version("2")
        .build();
    assert!(!is_pod_update_relevant(&validated, &bumped));

    let new_image = PodBuilder::new("web")
        .image("nginx:1.26")
        .status("success")
        .resource_version("2")
        .build();
    assert!(is_pod_update_relevant(&validated, &new_image));

    let marked_pending = PodBuilder::new("web")
        .image("nginx:1.25")
        .status("pending")
        .resource_version("3")
        .build();
    assert!(is_pod_update_relevant(&bumped, &marked_pending));
}

#[test]
fn test_enablement_transition() {
    let off = namespace("team-a", None, &[]);
    let system = namespace("team-a", Some("system"), &[]);
    let user = namespace("team-a", Some("user"), &[]);

    assert!(is_enablement_transition(&off, &system));
    assert!(is_enablement_transition(&off, &user));
    assert!(!is_enablement_transition(&system, &user));
    assert!(!is_enablement_transition(&system, &off));
}

#[test]
fn test_pod_filter_creates_then_filters_noise() {
    let filter = PodEventFilter::new();
    let pod = PodBuilder::new("web").image("nginx:1.25").status("success").build();

    assert!(matches!(
        filter.observe(Event::Apply(pod.clone())),
        Some(PodChange::Created(_))
    ));
    assert!(filter.observe(Event::Apply(pod.clone())).is_none());

    let moved = PodBuilder::new("web")
        .image("nginx:1.26")
        .status("success")
        .resource_version("2")
        .build();
    assert!(matches!(
        filter.observe(Event::Apply(moved.clone())),
        Some(PodChange::Updated(_))
    ));

    assert!(filter.observe(Event::Delete(moved.clone())).is_none());
    assert!(matches!(
        filter.observe(Event::Apply(moved)),
        Some(PodChange::Created(_))
    ));
}

#[test]
fn test_namespace_filter_admits_only_enrollment() {
    let filter = NamespaceEventFilter::new();
    assert!(filter.observe(Event::Apply(namespace("team-a", None, &[]))).is_none());
    assert!(filter.observe(Event::Apply(namespace("team-a", None, &[]))).is_none());
    assert!(
        filter
            .observe(Event::Apply(namespace("team-a", Some("system"), &[])))
            .is_some()
    );
    assert!(
        filter
            .observe(Event::Apply(namespace("team-a", Some("user"), &[])))
            .is_none()
    );
}

#[test]
fn test_status_to_label() {
    assert_eq!(
        WorkloadValidationLabel::for_status(ValidationStatus::Valid),
        Some(WorkloadValidationLabel::Success)
    );
    assert_eq!(
        WorkloadValidationLabel::for_status(ValidationStatus::Invalid),
        Some(WorkloadValidationLabel::Failed)
    );
    assert_eq!(
        WorkloadValidationLabel::for_status(ValidationStatus::ServiceUnavailable),
        Some(WorkloadValidationLabel::Pending)
    );
    assert_eq!(WorkloadValidationLabel::for_status(ValidationStatus::NoAction), None);

    let pod = PodBuilder::new("web").status("bogus").build();
    assert_eq!(current_label(&pod), None);
}
