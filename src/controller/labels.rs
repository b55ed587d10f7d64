//! Pod validation-status label vocabulary

use k8s_openapi::api::core::v1::Pod;

use crate::validation::{POD_STATUS_LABEL, ValidationStatus};

/// Persisted verdict on a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadValidationLabel {
    Pending,
    Success,
    Failed,
}

impl WorkloadValidationLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadValidationLabel::Pending => "pending",
            WorkloadValidationLabel::Success => "success",
            WorkloadValidationLabel::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(WorkloadValidationLabel::Pending),
            "success" => Some(WorkloadValidationLabel::Success),
            "failed" => Some(WorkloadValidationLabel::Failed),
            _ => None,
        }
    }

    /// Label to write for a validation outcome; `NoAction` writes nothing
    pub fn for_status(status: ValidationStatus) -> Option<Self> {
        match status {
            ValidationStatus::Invalid => Some(WorkloadValidationLabel::Failed),
            ValidationStatus::Valid => Some(WorkloadValidationLabel::Success),
            ValidationStatus::ServiceUnavailable => Some(WorkloadValidationLabel::Pending),
            ValidationStatus::NoAction => None,
        }
    }
}

impl std::fmt::Display for WorkloadValidationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current label on a pod; unrecognised values count as absent
pub fn current_label(pod: &Pod) -> Option<WorkloadValidationLabel> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(POD_STATUS_LABEL))
        .and_then(|value| WorkloadValidationLabel::parse(value))
}
