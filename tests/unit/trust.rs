//! Image references, allow-lists, digests and pull credentials

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image_trust_operator::trust::config::{parse_duration, parse_flag, parse_prefix_list};
use image_trust_operator::trust::credentials::DOCKER_CONFIG_JSON_TYPE;
use image_trust_operator::trust::image::RepositoryLocation;
use image_trust_operator::trust::{Digest, ImageReference, PullCredentials, TrustConfig};

#[test]
fn test_private_registry_location() {
    let image = ImageReference::parse("registry.example.com:5000").unwrap();
    assert_eq!(image.repository, "registry.example.com");
    assert_eq!(image.tag, "5000");

    let location = RepositoryLocation::from_repository("quay.io/coreos/etcd");
    assert_eq!(location.registry, "quay.io");
    assert_eq!(location.gun(), "quay.io/coreos/etcd");
    assert_eq!(location.api_host(), "quay.io");
}

#[test]
fn test_docker_hub_aliases_share_a_collection() {
    let aliased = RepositoryLocation::from_repository("index.docker.io/library/redis");
    let plain = RepositoryLocation::from_repository("redis");
    assert_eq!(aliased.gun(), plain.gun());

    let user = RepositoryLocation::from_repository("someuser/app");
    assert_eq!(user.gun(), "docker.io/someuser/app");
}

#[test]
fn test_allow_list_uses_repository_prefix() {
    let config = TrustConfig {
        allowed_registry_prefixes: parse_prefix_list("registry.internal/, gcr.io/distroless"),
        ..Default::default()
    };
    assert!(config.is_allowed("registry.internal/team/api:2.1"));
    assert!(config.is_allowed("gcr.io/distroless/static:nonroot"));
    assert!(!config.is_allowed("docker.io/library/nginx:1.25"));
}

#[test]
fn test_config_value_parsers() {
    assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
    assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    assert_eq!(parse_duration("fast"), None);
    assert_eq!(parse_flag("True"), Some(true));
    assert_eq!(parse_flag("no"), None);
}

#[test]
fn test_digest_match_is_exact() {
    let manifest = br#"{"schemaVersion":2}"#;
    let digest = Digest::of(manifest);
    assert!(digest.matches(Digest::of(manifest).as_bytes()));
    assert!(!digest.matches(Digest::of(b"other").as_bytes()));
    assert!(!digest.matches(&digest.as_bytes()[..16]));

    let parsed = Digest::parse(&digest.to_string()).unwrap();
    assert_eq!(parsed, digest);
}

#[test]
fn test_pull_credentials_from_docker_config() {
    let config = serde_json::json!({
        "auths": {
            "https://index.docker.io/v1/": {"auth": BASE64.encode("bob:hunter2")},
            "registry.example.com": {"username": "ci", "password": "token"}
        }
    });
    let data = BTreeMap::from([(
        ".dockerconfigjson".to_string(),
        serde_json::to_vec(&config).unwrap(),
    )]);

    let credentials = PullCredentials::from_secret_data(DOCKER_CONFIG_JSON_TYPE, &data).unwrap();
    assert_eq!(credentials.len(), 2);
    assert_eq!(credentials.for_registry("docker.io").unwrap().username, "bob");
    assert_eq!(
        credentials
            .for_registry("registry.example.com")
            .unwrap()
            .password,
        "token"
    );
    assert!(PullCredentials::from_secret_data("Opaque", &data).is_none());
}
