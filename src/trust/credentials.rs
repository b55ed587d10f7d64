//! Registry pull credentials passed through from workload pull secrets
//!
//! Supports both `kubernetes.io/dockerconfigjson` (`{"auths": {...}}`) and the
//! legacy `kubernetes.io/dockercfg` layout (the auths map at the top level).

use std::collections::{BTreeMap, HashMap};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::trust::image::canonical_registry;

/// Secret type holding a `.dockerconfigjson` key
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Legacy secret type holding a `.dockercfg` key
pub const DOCKER_CFG_TYPE: &str = "kubernetes.io/dockercfg";

/// Username/password pair for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials keyed by canonical registry host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullCredentials {
    by_registry: HashMap<String, RegistryCredential>,
}

impl PullCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_registry.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_registry.len()
    }

    /// Credential for a canonical registry host
    pub fn for_registry(&self, registry: &str) -> Option<&RegistryCredential> {
        self.by_registry.get(registry)
    }

    /// Add a credential; the first credential seen for a registry wins
    pub fn insert(&mut self, server: &str, credential: RegistryCredential) {
        self.by_registry
            .entry(registry_key(server))
            .or_insert(credential);
    }

    /// Merge credentials from another set without overriding existing entries
    pub fn extend(&mut self, other: PullCredentials) {
        for (registry, credential) in other.by_registry {
            self.by_registry.entry(registry).or_insert(credential);
        }
    }

    /// Parse the data of a pull secret.
    ///
    /// Returns `None` when the secret type is not a docker config type or the
    /// payload cannot be decoded.
    pub fn from_secret_data(secret_type: &str, data: &BTreeMap<String, Vec<u8>>) -> Option<Self> {
        let auths: BTreeMap<String, AuthEntry> = match secret_type {
            DOCKER_CONFIG_JSON_TYPE => {
                let raw = data.get(".dockerconfigjson")?;
                serde_json::from_slice::<DockerConfigJson>(raw).ok()?.auths
            }
            DOCKER_CFG_TYPE => {
                let raw = data.get(".dockercfg")?;
                serde_json::from_slice(raw).ok()?
            }
            _ => return None,
        };

        let mut credentials = Self::new();
        for (server, entry) in auths {
            if let Some(credential) = entry.into_credential() {
                credentials.insert(&server, credential);
            }
        }
        Some(credentials)
    }
}

#[derive(Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Deserialize)]
struct AuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl AuthEntry {
    fn into_credential(self) -> Option<RegistryCredential> {
        if let (Some(username), Some(password)) = (self.username, self.password) {
            return Some(RegistryCredential { username, password });
        }
        let decoded = BASE64.decode(self.auth?.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(RegistryCredential {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Reduce a docker config server key (`https://index.docker.io/v1/`) to a registry host
fn registry_key(server: &str) -> String {
    let without_scheme = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    canonical_registry(host)
}
