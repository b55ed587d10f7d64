//! Namespace enrollment and per-namespace trust configuration

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;

use crate::trust::config::{
    DEFAULT_REQUEST_TIMEOUT, parse_duration, parse_flag, parse_prefix_list, parse_server_url,
};
use crate::trust::{TrustConfig, TrustError, TrustResult};
use crate::validation::{
    ALLOWED_REGISTRIES_ANNOTATION, NAMESPACE_VALIDATION_LABEL, NOTARY_URL_ANNOTATION,
    STRICT_MODE_ANNOTATION, TIMEOUT_ANNOTATION,
};

/// Enrollment read from the namespace label alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrollment {
    NotEnrolled,
    System,
    User,
}

impl Enrollment {
    /// `enabled` is the legacy spelling of `system`
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some("enabled") | Some("system") => Enrollment::System,
            Some("user") => Enrollment::User,
            _ => Enrollment::NotEnrolled,
        }
    }

    pub fn of(namespace: &Namespace) -> Self {
        let value = namespace
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(NAMESPACE_VALIDATION_LABEL))
            .map(String::as_str);
        Self::from_label(value)
    }

    pub fn is_enrolled(&self) -> bool {
        !matches!(self, Enrollment::NotEnrolled)
    }
}

/// Which trust policy governs the pods of a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceValidationMode {
    Disabled,
    SystemManaged,
    /// Policy supplied by the namespace's own annotations
    UserManaged(TrustConfig),
}

impl NamespaceValidationMode {
    /// Derive the mode from the namespace's label and annotations.
    ///
    /// A user-managed namespace with malformed annotations is a configuration error.
    pub fn from_namespace(namespace: &Namespace) -> TrustResult<Self> {
        match Enrollment::of(namespace) {
            Enrollment::NotEnrolled => Ok(NamespaceValidationMode::Disabled),
            Enrollment::System => Ok(NamespaceValidationMode::SystemManaged),
            Enrollment::User => {
                let empty = BTreeMap::new();
                let annotations = namespace.metadata.annotations.as_ref().unwrap_or(&empty);
                user_trust_config(annotations).map(NamespaceValidationMode::UserManaged)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, NamespaceValidationMode::Disabled)
    }
}

/// Build a trust configuration from namespace annotations.
///
/// Missing allow-list is empty, missing timeout is 30s, missing strict-mode is true.
pub fn user_trust_config(annotations: &BTreeMap<String, String>) -> TrustResult<TrustConfig> {
    let raw_url = annotations.get(NOTARY_URL_ANNOTATION).ok_or_else(|| {
        TrustError::Configuration(format!(
            "user-managed namespace requires the {} annotation",
            NOTARY_URL_ANNOTATION
        ))
    })?;
    let trust_server_url = parse_server_url(raw_url)?;

    let allowed_registry_prefixes = annotations
        .get(ALLOWED_REGISTRIES_ANNOTATION)
        .map(|raw| parse_prefix_list(raw))
        .unwrap_or_default();

    let request_timeout = match annotations.get(TIMEOUT_ANNOTATION) {
        Some(raw) => parse_duration(raw)
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| {
                TrustError::Configuration(format!(
                    "invalid {} '{}': expected a positive duration",
                    TIMEOUT_ANNOTATION, raw
                ))
            })?,
        None => DEFAULT_REQUEST_TIMEOUT,
    };

    let strict = match annotations.get(STRICT_MODE_ANNOTATION) {
        Some(raw) => parse_flag(raw).ok_or_else(|| {
            TrustError::Configuration(format!("invalid {} '{}'", STRICT_MODE_ANNOTATION, raw))
        })?,
        None => true,
    };

    Ok(TrustConfig {
        trust_server_url: Some(trust_server_url),
        allowed_registry_prefixes,
        request_timeout,
        strict,
    })
}
