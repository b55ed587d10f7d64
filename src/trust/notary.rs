//! Trust-metadata backend (Notary server, TUF over HTTP)
//!
//! The backend answers one question: which content hash is signed for a tag
//! of a repository. A client is created per verification through
//! [`TrustBackendFactory::connect`], which probes the server first so an
//! unreachable trust service fails fast and distinguishably.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::trust::error::{TrustError, TrustResult};
use crate::trust::image::ImageReference;

/// Health endpoint probed before any lookup
pub const HEALTH_PATH: &str = "_notary_server/health";

/// Roles consulted for signed targets, in order
const TARGET_ROLES: [&str; 2] = ["targets/releases", "targets"];

/// Lookup of signed target hashes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrustBackend: Send + Sync {
    /// Signed sha256 hash of `image.tag` within the repository's trust collection
    async fn target_hash(&self, image: &ImageReference) -> TrustResult<Vec<u8>>;
}

/// Creates trust backends bound to one server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrustBackendFactory: Send + Sync {
    /// Probe the server and return a client for it
    async fn connect(&self, server_url: &Url, timeout: Duration)
    -> TrustResult<Arc<dyn TrustBackend>>;
}

/// Factory producing HTTP clients for Notary servers
#[derive(Clone)]
pub struct NotaryClientFactory {
    http: reqwest::Client,
}

impl NotaryClientFactory {
    pub fn new() -> TrustResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("image-trust-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl TrustBackendFactory for NotaryClientFactory {
    #[instrument(skip(self), fields(server = %server_url))]
    async fn connect(
        &self,
        server_url: &Url,
        timeout: Duration,
    ) -> TrustResult<Arc<dyn TrustBackend>> {
        let base = server_url.as_str().trim_end_matches('/').to_string();
        let probe_url = format!("{}/{}", base, HEALTH_PATH);

        let started = tokio::time::Instant::now();
        let response = self
            .http
            .get(&probe_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TrustError::ServiceUnreachable {
                url: base.clone(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Trust server probe finished"
        );

        if !probe_accepts(status) {
            return Err(TrustError::ServiceUnreachable {
                url: base,
                reason: format!("health probe returned {}", status),
            });
        }

        Ok(Arc::new(NotaryClient {
            http: self.http.clone(),
            base,
            timeout,
        }))
    }
}

/// A 401 still proves the server is up; it only needs credentials
fn probe_accepts(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::UNAUTHORIZED
}

/// HTTP client for one Notary server
pub struct NotaryClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl NotaryClient {
    fn role_url(&self, gun: &str, role: &str) -> String {
        format!("{}/v2/{}/_trust/tuf/{}.json", self.base, gun, role)
    }
}

#[async_trait]
impl TrustBackend for NotaryClient {
    #[instrument(skip(self), fields(image = %image))]
    async fn target_hash(&self, image: &ImageReference) -> TrustResult<Vec<u8>> {
        let gun = image.location().gun();

        for role in TARGET_ROLES {
            let started = tokio::time::Instant::now();
            let response = self
                .http
                .get(self.role_url(&gun, role))
                .timeout(self.timeout)
                .send()
                .await?;
            let status = response.status();
            debug!(
                role,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetched trust metadata"
            );

            if status == StatusCode::NOT_FOUND {
                continue;
            }
            if !status.is_success() {
                return Err(TrustError::unknown(format!(
                    "trust server returned {} for {} role of {}",
                    status, role, gun
                )));
            }

            let body = response.bytes().await?;
            if let Some(hash) = target_hash_from_role(&body, &image.tag)? {
                return Ok(hash);
            }
        }

        Err(TrustError::untrusted(format!(
            "no trust data for {}:{}",
            gun, image.tag
        )))
    }
}

#[derive(Deserialize)]
struct SignedRole {
    signed: RoleBody,
    #[serde(default)]
    signatures: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RoleBody {
    #[serde(default)]
    targets: HashMap<String, TargetEntry>,
}

#[derive(Deserialize)]
struct TargetEntry {
    #[serde(default)]
    hashes: HashMap<String, String>,
}

/// Extract the signed sha256 hash of `tag` from a TUF role document.
///
/// `Ok(None)` means the role is well formed but does not list the tag.
pub fn target_hash_from_role(body: &[u8], tag: &str) -> TrustResult<Option<Vec<u8>>> {
    let role: SignedRole = serde_json::from_slice(body)
        .map_err(|e| TrustError::unknown(format!("malformed trust metadata: {}", e)))?;

    if role.signatures.is_empty() {
        return Err(TrustError::untrusted("trust metadata carries no signatures"));
    }

    let Some(target) = role.signed.targets.get(tag) else {
        return Ok(None);
    };

    let encoded = target.hashes.get("sha256").ok_or_else(|| {
        TrustError::untrusted(format!("signed target '{}' has no sha256 hash", tag))
    })?;
    let hash = BASE64
        .decode(encoded)
        .map_err(|e| TrustError::unknown(format!("undecodable target hash: {}", e)))?;
    if hash.len() != 32 {
        return Err(TrustError::unknown(format!(
            "target hash for '{}' is {} bytes, expected 32",
            tag,
            hash.len()
        )));
    }
    Ok(Some(hash))
}
