//! Workload-level validation
//!
//! Turns per-image trust verdicts into one decision for a pod and picks the
//! trust policy (system or namespace supplied) that applies to it.

pub mod namespace;
pub mod orchestrator;

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;

pub use namespace::{Enrollment, NamespaceValidationMode, user_trust_config};
pub use orchestrator::{DefaultVerifierFactory, PodValidator, VerifierFactory, aggregate};

/// Namespace label enrolling a namespace in validation
pub const NAMESPACE_VALIDATION_LABEL: &str = "image-trust.io/validation";
/// Pod label carrying the persisted verdict
pub const POD_STATUS_LABEL: &str = "image-trust.io/validation-status";

/// Namespace annotation: trust server URL (required for user-managed namespaces)
pub const NOTARY_URL_ANNOTATION: &str = "image-trust.io/notary-url";
/// Namespace annotation: comma separated allowed repository prefixes
pub const ALLOWED_REGISTRIES_ANNOTATION: &str = "image-trust.io/allowed-registries";
/// Namespace annotation: per-call timeout
pub const TIMEOUT_ANNOTATION: &str = "image-trust.io/timeout";
/// Namespace annotation: reject legacy config-digest matches
pub const STRICT_MODE_ANNOTATION: &str = "image-trust.io/strict-mode";

/// Workload-level decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStatus {
    /// At least one image is untrusted
    Invalid,
    /// No image is untrusted but at least one could not be verified
    ServiceUnavailable,
    /// Every image verified
    Valid,
    /// Namespace is not enrolled in validation
    NoAction,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Invalid => "invalid",
            ValidationStatus::ServiceUnavailable => "service_unavailable",
            ValidationStatus::Valid => "valid",
            ValidationStatus::NoAction => "no_action",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating one pod.
///
/// The set of invalid images is non-empty exactly when the status is
/// [`ValidationStatus::Invalid`]; the constructors keep it that way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    status: ValidationStatus,
    invalid_images: BTreeSet<String>,
    legacy_images: BTreeSet<String>,
}

impl ValidationResult {
    pub fn no_action() -> Self {
        Self::with_status(ValidationStatus::NoAction)
    }

    pub fn valid() -> Self {
        Self::with_status(ValidationStatus::Valid)
    }

    pub fn service_unavailable() -> Self {
        Self::with_status(ValidationStatus::ServiceUnavailable)
    }

    /// An invalid result; `None` when `images` is empty
    pub fn invalid<I>(images: I) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let invalid_images: BTreeSet<String> = images.into_iter().collect();
        if invalid_images.is_empty() {
            return None;
        }
        Some(Self {
            status: ValidationStatus::Invalid,
            invalid_images,
            legacy_images: BTreeSet::new(),
        })
    }

    fn with_status(status: ValidationStatus) -> Self {
        Self {
            status,
            invalid_images: BTreeSet::new(),
            legacy_images: BTreeSet::new(),
        }
    }

    /// Record images accepted through the legacy config-digest path
    pub fn with_legacy_images(mut self, images: BTreeSet<String>) -> Self {
        self.legacy_images = images;
        self
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn invalid_images(&self) -> &BTreeSet<String> {
        &self.invalid_images
    }

    pub fn legacy_images(&self) -> &BTreeSet<String> {
        &self.legacy_images
    }
}

/// Every container image of a pod, init containers first, duplicates kept
pub fn pod_images(pod: &Pod) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .filter_map(|c| c.image.clone())
        .collect()
}

/// Distinct container images of a pod
pub fn collect_images(pod: &Pod) -> BTreeSet<String> {
    pod_images(pod).into_iter().collect()
}
