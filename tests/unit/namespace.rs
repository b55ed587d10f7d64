//! Namespace enrollment and user-managed trust policy

use std::time::Duration;

use image_trust_operator::validation::{
    ALLOWED_REGISTRIES_ANNOTATION, Enrollment, NOTARY_URL_ANNOTATION, NamespaceValidationMode,
    STRICT_MODE_ANNOTATION, TIMEOUT_ANNOTATION,
};

use crate::common::namespace;

#[test]
fn test_enrollment_labels() {
    assert_eq!(Enrollment::from_label(Some("enabled")), Enrollment::System);
    assert_eq!(Enrollment::from_label(Some("system")), Enrollment::System);
    assert_eq!(Enrollment::from_label(Some("user")), Enrollment::User);
    assert_eq!(Enrollment::from_label(Some("Enabled")), Enrollment::NotEnrolled);
    assert_eq!(Enrollment::from_label(None), Enrollment::NotEnrolled);
}

#[test]
fn test_system_namespace_ignores_annotations() {
    let ns = namespace("team-a", Some("system"), &[(TIMEOUT_ANNOTATION, "garbage")]);
    assert_eq!(
        NamespaceValidationMode::from_namespace(&ns).unwrap(),
        NamespaceValidationMode::SystemManaged
    );
}

#[test]
fn test_user_namespace_policy_from_annotations() {
    let ns = namespace(
        "team-a",
        Some("user"),
        &[
            (NOTARY_URL_ANNOTATION, "https://notary.team-a.svc:4443"),
            (ALLOWED_REGISTRIES_ANNOTATION, "registry.team-a/"),
            (TIMEOUT_ANNOTATION, "5s"),
            (STRICT_MODE_ANNOTATION, "false"),
        ],
    );
    let NamespaceValidationMode::UserManaged(config) =
        NamespaceValidationMode::from_namespace(&ns).unwrap()
    else {
        panic!("expected a user-managed namespace");
    };
    assert_eq!(
        config.trust_server_url.unwrap().host_str(),
        Some("notary.team-a.svc")
    );
    assert_eq!(config.allowed_registry_prefixes, vec!["registry.team-a/"]);
    assert_eq!(config.request_timeout, Duration::from_secs(5));
    assert!(!config.strict);
}

#[test]
fn test_user_namespace_defaults() {
    let ns = namespace(
        "team-a",
        Some("user"),
        &[(NOTARY_URL_ANNOTATION, "http://notary:4443")],
    );
    let NamespaceValidationMode::UserManaged(config) =
        NamespaceValidationMode::from_namespace(&ns).unwrap()
    else {
        panic!("expected a user-managed namespace");
    };
    assert!(config.allowed_registry_prefixes.is_empty());
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert!(config.strict);
}

#[test]
fn test_user_namespace_misconfiguration() {
    let missing_url = namespace("team-a", Some("user"), &[]);
    assert!(
        NamespaceValidationMode::from_namespace(&missing_url)
            .unwrap_err()
            .is_configuration()
    );

    let bad_strict = namespace(
        "team-a",
        Some("user"),
        &[
            (NOTARY_URL_ANNOTATION, "http://notary:4443"),
            (STRICT_MODE_ANNOTATION, "sometimes"),
        ],
    );
    assert!(NamespaceValidationMode::from_namespace(&bad_strict).is_err());
}
