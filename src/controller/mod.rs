pub mod context;
pub mod decision;
pub mod error;
pub mod filters;
pub mod labels;
pub mod namespace_reconciler;
pub mod pod_reconciler;
pub mod store;

pub use context::{Context, DEFAULT_RETRY_INTERVAL};
pub use decision::ReconcileDecision;
pub use error::{Error, Result};
pub use filters::{
    NamespaceEventFilter, PodChange, PodEventFilter, admit_pod_change, are_images_changed,
    is_enablement_transition, is_pod_update_relevant,
};
pub use labels::{WorkloadValidationLabel, current_label};
pub use namespace_reconciler::{mark_pods_pending, namespace_error_policy, reconcile_namespace};
pub use pod_reconciler::{pod_error_policy, reconcile_pod, validate_and_label};
pub use store::{ClusterStore, FIELD_MANAGER, KubeStore, TrustEvent, resolve_pull_credentials};
